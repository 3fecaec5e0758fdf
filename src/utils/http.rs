// src/utils/http.rs

//! HTTP client utilities.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use url::Url;

use crate::error::Result;
use crate::models::TrackerConfig;

/// Create the shared asynchronous HTTP client for tracker calls.
///
/// Cookies set by the session endpoint land in `jar` and are replayed on
/// every later request made through this client.
pub fn create_client(config: &TrackerConfig, jar: Arc<Jar>) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .cookie_provider(jar)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .tcp_keepalive(Duration::from_secs(config.keep_alive_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;
    Ok(client)
}

/// Create a plain client for third-party scoring services.
pub fn create_service_client(config: &TrackerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;
    Ok(client)
}

/// Join a relative endpoint path onto a base URL, keeping the base's path.
///
/// `https://host/jira` + `rest/api/2/search` gives
/// `https://host/jira/rest/api/2/search`.
pub fn endpoint(base_url: &str, path: &str) -> Result<Url> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}
