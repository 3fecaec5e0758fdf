//! Application configuration structures.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{AppError, Result};

/// Hard cap on concurrent fetch workers. The tracker starts dropping
/// connections above this.
pub const MAX_WORKERS: usize = 100;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tracker endpoint and HTTP behavior
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Fetch run settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Record store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// External scoring services
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration, or return defaults when `path` does not exist.
    ///
    /// A file that exists but cannot be read or parsed is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.tracker.base_url)
            .map_err(|e| AppError::validation(format!("tracker.base_url is invalid: {e}")))?;
        if self.tracker.user_agent.trim().is_empty() {
            return Err(AppError::validation("tracker.user_agent is empty"));
        }
        if self.tracker.request_timeout_secs == 0 || self.tracker.connect_timeout_secs == 0 {
            return Err(AppError::validation("tracker timeouts must be > 0"));
        }
        if self.fetch.project.trim().is_empty() {
            return Err(AppError::validation("fetch.project is empty"));
        }
        if self.fetch.workers == 0 {
            return Err(AppError::validation("fetch.workers must be > 0"));
        }
        if self.fetch.workers > MAX_WORKERS {
            return Err(AppError::config(format!(
                "fetch.workers is {} but cannot exceed {}",
                self.fetch.workers, MAX_WORKERS
            )));
        }
        if self.store.scan_batch == 0 {
            return Err(AppError::validation("store.scan_batch must be > 0"));
        }
        if self.enrichment.chunk_size == 0 {
            return Err(AppError::validation("enrichment.chunk_size must be > 0"));
        }
        for (name, service) in self.enrichment.services() {
            Url::parse(&service.endpoint).map_err(|e| {
                AppError::validation(format!("enrichment.{name}.endpoint is invalid: {e}"))
            })?;
            if service.batch_size == 0 {
                return Err(AppError::validation(format!(
                    "enrichment.{name}.batch_size must be > 0"
                )));
            }
        }
        Ok(())
    }
}

/// Tracker endpoint and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Base URL of the tracker instance
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Path of the search endpoint, relative to `base_url`
    #[serde(default = "defaults::search_path")]
    pub search_path: String,

    /// Path of the session (login) endpoint, relative to `base_url`
    #[serde(default = "defaults::session_path")]
    pub session_path: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// TCP connect timeout in seconds
    #[serde(default = "defaults::connect_timeout")]
    pub connect_timeout_secs: u64,

    /// TCP keep-alive interval in seconds
    #[serde(default = "defaults::keep_alive")]
    pub keep_alive_secs: u64,

    /// Overall per-request timeout in seconds
    #[serde(default = "defaults::request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            search_path: defaults::search_path(),
            session_path: defaults::session_path(),
            user_agent: defaults::user_agent(),
            connect_timeout_secs: defaults::connect_timeout(),
            keep_alive_secs: defaults::keep_alive(),
            request_timeout_secs: defaults::request_timeout(),
        }
    }
}

/// Fetch run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Tracker project key
    #[serde(default = "defaults::project")]
    pub project: String,

    /// Number of concurrent page workers (at most [`MAX_WORKERS`])
    #[serde(default = "defaults::workers")]
    pub workers: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            project: defaults::project(),
            workers: defaults::workers(),
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the store file
    #[serde(default = "defaults::db_path")]
    pub path: PathBuf,

    /// Records read per round trip during full scans
    #[serde(default = "defaults::scan_batch")]
    pub scan_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: defaults::db_path(),
            scan_batch: defaults::scan_batch(),
        }
    }
}

/// Scoring service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Tickets loaded from the store per enrichment round
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: usize,

    #[serde(
        default = "defaults::language_tool",
        deserialize_with = "overlay::language_tool"
    )]
    pub language_tool: ServiceConfig,

    #[serde(
        default = "defaults::bing_spell_check",
        deserialize_with = "overlay::bing_spell_check"
    )]
    pub bing_spell_check: ServiceConfig,

    #[serde(default = "defaults::sentiment", deserialize_with = "overlay::sentiment")]
    pub sentiment: ServiceConfig,
}

impl EnrichmentConfig {
    /// All service sections with their config names.
    pub fn services(&self) -> [(&'static str, &ServiceConfig); 3] {
        [
            ("language_tool", &self.language_tool),
            ("bing_spell_check", &self.bing_spell_check),
            ("sentiment", &self.sentiment),
        ]
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::chunk_size(),
            language_tool: defaults::language_tool(),
            bing_spell_check: defaults::bing_spell_check(),
            sentiment: defaults::sentiment(),
        }
    }
}

/// Endpoint and documented rate limit of one scoring service.
///
/// Inside `[enrichment]` each field falls back to that service's default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub endpoint: String,

    /// Requests allowed per window
    pub batch_size: usize,

    /// Rate-limit window in seconds
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// Secrets read from the environment, never from the config file.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub bing_key: Option<String>,
    pub gcp_key: Option<String>,
}

impl Credentials {
    pub const USERNAME_VAR: &'static str = "JIRA_USERNAME";
    pub const PASSWORD_VAR: &'static str = "JIRA_PASSWORD";
    pub const BING_KEY_VAR: &'static str = "BING_SPELLCHECK_KEY";
    pub const GCP_KEY_VAR: &'static str = "GCP_LANGUAGE_API_KEY";

    /// Read credentials from the process environment.
    pub fn from_env() -> Self {
        let non_empty = |var: &str| env::var(var).ok().filter(|v| !v.trim().is_empty());
        Self {
            username: non_empty(Self::USERNAME_VAR).unwrap_or_default(),
            password: non_empty(Self::PASSWORD_VAR).unwrap_or_default(),
            bing_key: non_empty(Self::BING_KEY_VAR),
            gcp_key: non_empty(Self::GCP_KEY_VAR),
        }
    }
}

/// Per-service field fallbacks for the `[enrichment.*]` tables.
mod overlay {
    use super::{Deserialize, Deserializer, ServiceConfig, defaults};

    #[derive(Deserialize)]
    struct PartialService {
        endpoint: Option<String>,
        batch_size: Option<usize>,
        window_secs: Option<u64>,
    }

    fn over<'de, D>(deserializer: D, base: ServiceConfig) -> Result<ServiceConfig, D::Error>
    where
        D: Deserializer<'de>,
    {
        let partial = PartialService::deserialize(deserializer)?;
        Ok(ServiceConfig {
            endpoint: partial.endpoint.unwrap_or(base.endpoint),
            batch_size: partial.batch_size.unwrap_or(base.batch_size),
            window_secs: partial.window_secs.unwrap_or(base.window_secs),
        })
    }

    pub fn language_tool<'de, D: Deserializer<'de>>(d: D) -> Result<ServiceConfig, D::Error> {
        over(d, defaults::language_tool())
    }

    pub fn bing_spell_check<'de, D: Deserializer<'de>>(d: D) -> Result<ServiceConfig, D::Error> {
        over(d, defaults::bing_spell_check())
    }

    pub fn sentiment<'de, D: Deserializer<'de>>(d: D) -> Result<ServiceConfig, D::Error> {
        over(d, defaults::sentiment())
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::ServiceConfig;

    // Tracker defaults
    pub fn base_url() -> String {
        "https://issues.apache.org/jira".into()
    }
    pub fn search_path() -> String {
        "rest/api/2/search".into()
    }
    pub fn session_path() -> String {
        "rest/auth/1/session".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; ticketguru/0.1)".into()
    }
    pub fn connect_timeout() -> u64 {
        30
    }
    pub fn keep_alive() -> u64 {
        30
    }
    pub fn request_timeout() -> u64 {
        90
    }

    // Fetch defaults
    pub fn project() -> String {
        "KAFKA".into()
    }
    pub fn workers() -> usize {
        super::MAX_WORKERS
    }

    // Store defaults
    pub fn db_path() -> PathBuf {
        PathBuf::from("tickets.db")
    }
    pub fn scan_batch() -> usize {
        256
    }

    // Enrichment defaults
    pub fn chunk_size() -> usize {
        10_000
    }
    pub fn language_tool() -> ServiceConfig {
        ServiceConfig {
            endpoint: "https://api.languagetool.org/v2/check".into(),
            batch_size: 20,
            window_secs: 60,
        }
    }
    pub fn bing_spell_check() -> ServiceConfig {
        ServiceConfig {
            endpoint: "https://api.cognitive.microsoft.com/bing/v7.0/SpellCheck".into(),
            batch_size: 100,
            window_secs: 1,
        }
    }
    pub fn sentiment() -> ServiceConfig {
        ServiceConfig {
            endpoint: "https://language.googleapis.com/v1/documents:analyzeSentiment".into(),
            batch_size: 600,
            window_secs: 60,
        }
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_too_many_workers() {
        let mut config = Config::default();
        config.fetch.workers = MAX_WORKERS + 1;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.fetch.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let mut config = Config::default();
        config.tracker.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [fetch]
            project = "HADOOP"

            [enrichment.language_tool]
            endpoint = "http://localhost:8081/v2/check"
            batch_size = 5
            window_secs = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.fetch.project, "HADOOP");
        assert_eq!(config.fetch.workers, MAX_WORKERS);
        assert_eq!(config.tracker.request_timeout_secs, 90);
        assert_eq!(config.enrichment.language_tool.batch_size, 5);
        assert_eq!(config.enrichment.sentiment.batch_size, 600);
    }

    #[test]
    fn partial_service_table_keeps_that_services_defaults() {
        let config: Config = toml::from_str(
            r#"
            [enrichment.sentiment]
            endpoint = "http://localhost:9000/sentiment"

            [enrichment.bing_spell_check]
            batch_size = 10
            "#,
        )
        .unwrap();

        let sentiment = &config.enrichment.sentiment;
        assert_eq!(sentiment.endpoint, "http://localhost:9000/sentiment");
        assert_eq!(sentiment.batch_size, 600);
        assert_eq!(sentiment.window_secs, 60);

        let bing = &config.enrichment.bing_spell_check;
        assert_eq!(bing.batch_size, 10);
        assert_eq!(bing.window_secs, 1);
        assert!(bing.endpoint.ends_with("/bing/v7.0/SpellCheck"));
    }

    #[test]
    fn load_or_default_on_missing_file() {
        let config = Config::load_or_default("/definitely/not/here.toml").unwrap();
        assert_eq!(config.fetch.project, "KAFKA");
    }

    #[test]
    fn load_or_default_reads_existing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("ticketguru.toml");
        fs::write(&path, "[fetch]\nproject = \"HADOOP\"\n").unwrap();

        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.fetch.project, "HADOOP");
    }

    #[test]
    fn load_or_default_rejects_malformed_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("ticketguru.toml");
        fs::write(&path, "[fetch\nproject = ").unwrap();

        assert!(Config::load_or_default(&path).is_err());
    }
}
