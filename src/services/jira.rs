// src/services/jira.rs

//! Tracker REST client.
//!
//! Authenticates once against the session endpoint, then serves count and
//! page queries through the search endpoint. The client and its cookie jar
//! are shared by all fetch workers.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Credentials, Page, SearchResponse, TrackerConfig};
use crate::utils::http;

/// Fields requested for every ticket in a page.
pub const TICKET_FIELDS: &[&str] = &[
    "summary",
    "description",
    "comment",
    "attachment",
    "priority",
    "status",
    "issuetype",
    "created",
    "duedate",
    "timespent",
    "timeestimate",
];

/// Source of paginated tickets.
///
/// Implementations must be safe to call from many workers at once and
/// idempotent for identical inputs.
#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Total number of tickets in `project`.
    async fn count_tickets(&self, project: &str) -> Result<usize>;

    /// Page `index` of `project`, holding up to `page_size` tickets
    /// starting at `index * page_size`.
    async fn fetch_page(&self, project: &str, index: usize, page_size: usize) -> Result<Page>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Body returned by a successful login.
#[derive(Debug, Default, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    session: Option<SessionCookie>,
}

#[derive(Debug, Deserialize)]
struct SessionCookie {
    name: String,
    value: String,
}

/// Authenticated client for the tracker instance.
pub struct JiraClient {
    client: Client,
    jar: Arc<Jar>,
    base_url: Url,
    search_url: Url,
    session_url: Url,
}

impl JiraClient {
    /// Create a client for the configured tracker instance.
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = http::create_client(config, Arc::clone(&jar))?;

        Ok(Self {
            client,
            jar,
            base_url: Url::parse(&config.base_url)?,
            search_url: http::endpoint(&config.base_url, &config.search_path)?,
            session_url: http::endpoint(&config.base_url, &config.session_path)?,
        })
    }

    /// Log in and keep the session cookies for all later requests.
    ///
    /// Any failure here is fatal for the run; there is no retry.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Err(AppError::authentication(format!(
                "{} and {} must be set",
                Credentials::USERNAME_VAR,
                Credentials::PASSWORD_VAR
            )));
        }

        let response = self
            .client
            .post(self.session_url.clone())
            .json(&LoginRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await
            .map_err(|e| AppError::authentication(format!("session request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::authentication(format!(
                "session endpoint answered {status}"
            )));
        }

        // Cookies from Set-Cookie are already in the jar; the JSON body may
        // carry the session cookie as well.
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                log::debug!("Could not read session body, relying on Set-Cookie: {}", e);
                String::new()
            }
        };
        if let Ok(SessionResponse {
            session: Some(cookie),
        }) = serde_json::from_str::<SessionResponse>(&body)
        {
            self.jar
                .add_cookie_str(&format!("{}={}", cookie.name, cookie.value), &self.base_url);
        }

        log::info!("Authenticated against {}", self.base_url);
        Ok(())
    }

    fn jql(project: &str) -> String {
        format!("project={project}")
    }

    /// Search URL for one page of `project`.
    pub fn page_url(&self, project: &str, index: usize, page_size: usize) -> Url {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("jql", &Self::jql(project))
            .append_pair("startAt", &(index * page_size).to_string())
            .append_pair("maxResults", &page_size.to_string())
            .append_pair("fields", &TICKET_FIELDS.join(","))
            .append_pair("expand", "changelog");
        url
    }

    fn count_url(&self, project: &str) -> Url {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("jql", &Self::jql(project))
            .append_pair("maxResults", "0");
        url
    }
}

#[async_trait]
impl TicketSource for JiraClient {
    async fn count_tickets(&self, project: &str) -> Result<usize> {
        let response = self.client.get(self.count_url(project)).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AppError::query(format!(
                "status {} received when counting tickets of {project}",
                status.as_u16()
            )));
        }

        let body = response.text().await?;
        let search: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::query(format!("could not decode count response: {e}")))?;

        log::debug!("Project {} has {} tickets", project, search.total);
        Ok(search.total)
    }

    async fn fetch_page(&self, project: &str, index: usize, page_size: usize) -> Result<Page> {
        let url = self.page_url(project, index, page_size);
        log::debug!("Fetching page {} ({} tickets) from {}", index, page_size, url);

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AppError::status(status.as_u16(), format!("page {index}")));
        }

        let body = response.text().await?;
        let search: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::decode(format!("page {index}: {e}")))?;

        Ok(Page::from_response(index, search))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> TrackerConfig {
        TrackerConfig {
            base_url: server.uri(),
            request_timeout_secs: 5,
            ..TrackerConfig::default()
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "reporter".into(),
            password: "hunter2".into(),
            ..Credentials::default()
        }
    }

    #[test]
    fn test_page_url() {
        let client = JiraClient::new(&TrackerConfig::default()).unwrap();
        let url = client.page_url("KAFKA", 3, 25);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/jira/rest/api/2/search");
        assert!(pairs.contains(&("jql".into(), "project=KAFKA".into())));
        assert!(pairs.contains(&("startAt".into(), "75".into())));
        assert!(pairs.contains(&("maxResults".into(), "25".into())));
        assert!(pairs.contains(&("expand".into(), "changelog".into())));
    }

    #[tokio::test]
    async fn test_authenticate_keeps_session_cookie() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/auth/1/session"))
            .and(body_json(json!({"username": "reporter", "password": "hunter2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "session": {"name": "JSESSIONID", "value": "abc123"}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(header("cookie", "JSESSIONID=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 7})))
            .mount(&server)
            .await;

        let client = JiraClient::new(&config_for(&server)).unwrap();
        client.authenticate(&credentials()).await.unwrap();

        assert_eq!(client.count_tickets("KAFKA").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_authenticate_falls_back_to_set_cookie() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/auth/1/session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "JSESSIONID=jar42; Path=/")
                    .set_body_string("<html>welcome</html>"),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(header("cookie", "JSESSIONID=jar42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 3})))
            .expect(1)
            .mount(&server)
            .await;

        let client = JiraClient::new(&config_for(&server)).unwrap();
        client.authenticate(&credentials()).await.unwrap();

        assert_eq!(client.count_tickets("KAFKA").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/auth/1/session"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = JiraClient::new(&config_for(&server)).unwrap();
        let err = client.authenticate(&credentials()).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_authenticate_requires_credentials() {
        let client = JiraClient::new(&TrackerConfig::default()).unwrap();
        let err = client
            .authenticate(&Credentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_count_non_200_is_query_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = JiraClient::new(&config_for(&server)).unwrap();
        assert!(matches!(
            client.count_tickets("KAFKA").await,
            Err(AppError::Query(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_page_decodes_tickets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("startAt", "50"))
            .and(query_param("maxResults", "25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "startAt": 50,
                "maxResults": 25,
                "total": 250,
                "issues": [
                    {"key": "KAFKA-51", "fields": {"summary": "first"}},
                    {"key": "KAFKA-52", "fields": {"summary": "second"}}
                ]
            })))
            .mount(&server)
            .await;

        let client = JiraClient::new(&config_for(&server)).unwrap();
        let page = client.fetch_page("KAFKA", 2, 25).await.unwrap();

        assert_eq!(page.index, 2);
        assert_eq!(page.start_at, 50);
        assert_eq!(page.total, 250);
        let keys: Vec<_> = page.tickets.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, ["KAFKA-51", "KAFKA-52"]);
    }

    #[tokio::test]
    async fn test_fetch_page_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("startAt", "0"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startAt", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let client = JiraClient::new(&config_for(&server)).unwrap();
        assert!(matches!(
            client.fetch_page("KAFKA", 0, 10).await,
            Err(AppError::Status { code: 500, .. })
        ));
        assert!(matches!(
            client.fetch_page("KAFKA", 1, 10).await,
            Err(AppError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_page_transport_error() {
        let config = TrackerConfig {
            // Nothing listens on the discard port.
            base_url: "http://127.0.0.1:9".into(),
            connect_timeout_secs: 1,
            request_timeout_secs: 2,
            ..TrackerConfig::default()
        };
        let client = JiraClient::new(&config).unwrap();
        assert!(matches!(
            client.fetch_page("KAFKA", 0, 10).await,
            Err(AppError::Transport(_))
        ));
    }
}
