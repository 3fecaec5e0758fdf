// src/error.rs

//! Unified error handling for the ticket pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Session login against the tracker failed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A search query could not be completed
    #[error("Query error: {0}")]
    Query(String),

    /// The tracker answered with an unexpected HTTP status
    #[error("Unexpected status {code} for {context}")]
    Status { code: u16, context: String },

    /// Network-level failure (timeout, connection refused, ...)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Record store transaction or write failed
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid cursor bounds for a store slice
    #[error("Invalid range [{low}, {high}) for store of {count} records")]
    Range { low: i64, high: i64, count: usize },

    /// Key lookup found nothing
    #[error("Ticket not found: {0}")]
    NotFound(String),

    /// A scoring service refused the request because of its rate limit
    #[error("Rate limit exceeded for scorer {scorer}")]
    RateLimitExceeded { scorer: String },

    /// A scoring service failed for a reason other than rate limiting
    #[error("Scoring error in {scorer}: {message}")]
    Scoring { scorer: String, message: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The run was interrupted by a signal
    #[error("Interrupted")]
    Interrupted,
}

impl AppError {
    /// Create an authentication error.
    pub fn authentication(message: impl fmt::Display) -> Self {
        Self::Authentication(message.to_string())
    }

    /// Create a query error.
    pub fn query(message: impl fmt::Display) -> Self {
        Self::Query(message.to_string())
    }

    /// Create a status error with the request it belongs to.
    pub fn status(code: u16, context: impl Into<String>) -> Self {
        Self::Status {
            code,
            context: context.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl fmt::Display) -> Self {
        Self::Decode(message.to_string())
    }

    /// Create a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a scoring error for the named scorer.
    pub fn scoring(scorer: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Scoring {
            scorer: scorer.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error must abort the whole run.
    ///
    /// Per-page and per-ticket failures are counted and logged instead.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_)
                | Self::Config(_)
                | Self::Validation(_)
                | Self::Interrupted
        )
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_is_fatal() {
        assert!(AppError::authentication("bad credentials").is_fatal());
        assert!(AppError::config("workers > 100").is_fatal());
    }

    #[test]
    fn test_page_errors_are_not_fatal() {
        assert!(!AppError::status(502, "page 3").is_fatal());
        assert!(!AppError::decode("unexpected EOF").is_fatal());
        assert!(!AppError::store("disk full").is_fatal());
    }

    #[test]
    fn test_range_message() {
        let err = AppError::Range {
            low: 5,
            high: 3,
            count: 10,
        };
        assert_eq!(
            err.to_string(),
            "Invalid range [5, 3) for store of 10 records"
        );
    }
}
