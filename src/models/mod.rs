// src/models/mod.rs

//! Domain models for the ticket pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod page;
mod ticket;

// Re-export all public types
pub use config::{
    Config, Credentials, EnrichmentConfig, FetchConfig, LoggingConfig, MAX_WORKERS,
    ServiceConfig, StoreConfig, TrackerConfig,
};
pub use page::{Page, PagePlan, SearchResponse};
pub use ticket::{
    Attachment, AttachmentCategory, Author, Changelog, ChangelogHistory, ChangelogItem, Comment,
    Comments, Derived, Fields, HIGH_PRIORITY_MAX_RANK, IssueType, Priority, Status, Ticket,
    tracker_time,
};

/// Counters gathered over one fetch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Authoritative ticket count the run was planned against
    pub total_count: usize,
    pub pages_total: usize,
    pub pages_failed: usize,
    pub tickets_fetched: usize,
    pub tickets_stored: usize,
    /// Pages whose tickets were fetched but could not be written
    pub store_failures: usize,
}
