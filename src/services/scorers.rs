// src/services/scorers.rs

//! External text scorers.
//!
//! Each scorer wraps one third-party service and turns a ticket's text into
//! a number. Calls are grouped into batches sized to the service's rate
//! limit; the next batch waits for the window to pass.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Credentials, EnrichmentConfig, ServiceConfig, Ticket};

/// Requests allowed per time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub batch_size: usize,
    pub window: Duration,
}

impl From<&ServiceConfig> for RateLimit {
    fn from(service: &ServiceConfig) -> Self {
        Self {
            batch_size: service.batch_size.max(1),
            window: Duration::from_secs(service.window_secs),
        }
    }
}

/// A pluggable external scoring service.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Stable name, used as the key in `Derived::scores`.
    fn name(&self) -> &'static str;

    fn rate_limit(&self) -> RateLimit;

    /// Score one ticket. `Ok(None)` means there is nothing to score.
    async fn score(&self, ticket: &Ticket) -> Result<Option<f64>>;
}

/// One ticket that could not be scored.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreFailure {
    pub key: String,
    pub message: String,
}

/// Result of running one scorer over a set of tickets.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScoreReport {
    /// New scores by ticket key
    pub scores: BTreeMap<String, f64>,

    pub failures: Vec<ScoreFailure>,

    /// Tickets already scored, with nothing to score, or rate limited
    pub skipped: usize,
}

impl ScoreReport {
    fn absorb(&mut self, scorer: &str, key: String, result: Result<Option<f64>>) {
        match result {
            Ok(Some(score)) => {
                self.scores.insert(key, score);
            }
            Ok(None) => self.skipped += 1,
            Err(AppError::RateLimitExceeded { .. }) => {
                log::warn!("{} rate limited on {}, skipping", scorer, key);
                self.skipped += 1;
            }
            Err(error) => {
                log::warn!("{} failed on {}: {}", scorer, key, error);
                self.failures.push(ScoreFailure {
                    key,
                    message: error.to_string(),
                });
            }
        }
    }
}

/// Keeps one scorer's rate window across calls.
///
/// A pacer lives for the whole run, so a batch issued by a later call still
/// waits out the window of the batch that finished before it.
#[derive(Debug)]
pub struct Pacer {
    limit: RateLimit,
    last_batch: Option<Instant>,
}

impl Pacer {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            last_batch: None,
        }
    }

    /// One pacer per scorer, in the same order.
    pub fn for_scorers(scorers: &[Box<dyn Scorer>]) -> Vec<Self> {
        scorers.iter().map(|s| Self::new(s.rate_limit())).collect()
    }

    fn batch_size(&self) -> usize {
        self.limit.batch_size.max(1)
    }

    /// Sleep until the window since the last finished batch has passed.
    async fn wait(&self, scorer: &str) {
        let Some(last) = self.last_batch else {
            return;
        };
        let ready = last + self.limit.window;
        let remaining = ready.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            log::debug!("{} waiting {:?} for its rate window", scorer, remaining);
            tokio::time::sleep_until(ready).await;
        }
    }

    fn finish_batch(&mut self) {
        self.last_batch = Some(Instant::now());
    }
}

/// Run `scorer` over every ticket that does not carry its score yet.
pub async fn score_tickets(
    scorer: &dyn Scorer,
    tickets: &[Ticket],
    pacer: &mut Pacer,
) -> ScoreReport {
    let name = scorer.name();
    let mut report = ScoreReport::default();

    let mut pending = Vec::new();
    for ticket in tickets {
        if ticket.has_score(name) {
            report.skipped += 1;
        } else {
            pending.push(ticket);
        }
    }

    for batch in pending.chunks(pacer.batch_size()) {
        pacer.wait(name).await;

        let results = join_all(batch.iter().map(|ticket| async move {
            (ticket.key.clone(), scorer.score(ticket).await)
        }))
        .await;
        pacer.finish_batch();

        for (key, result) in results {
            report.absorb(name, key, result);
        }
    }

    report
}

/// Run every scorer over `tickets` concurrently, keyed by scorer name.
///
/// `pacers` pairs with `scorers` by position; see [`Pacer::for_scorers`].
pub async fn score_all(
    tickets: &[Ticket],
    scorers: &[Box<dyn Scorer>],
    pacers: &mut [Pacer],
) -> BTreeMap<String, ScoreReport> {
    debug_assert_eq!(scorers.len(), pacers.len());
    join_all(scorers.iter().zip(pacers.iter_mut()).map(|(scorer, pacer)| async move {
        let report = score_tickets(scorer.as_ref(), tickets, pacer).await;
        (scorer.name().to_string(), report)
    }))
    .await
    .into_iter()
    .collect()
}

/// Map error statuses onto scoring errors.
fn check_status(scorer: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AppError::RateLimitExceeded {
            scorer: scorer.to_string(),
        });
    }
    if !status.is_success() {
        return Err(AppError::scoring(scorer, format!("status {status}")));
    }
    Ok(response)
}

async fn send(scorer: &str, request: reqwest::RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| AppError::scoring(scorer, e))?;
    check_status(scorer, response)
}

// ============================================================================
// LanguageTool
// ============================================================================

#[derive(Deserialize)]
struct LanguageToolResponse {
    #[serde(default)]
    matches: Vec<serde_json::Value>,
}

/// Grammar check; the score is the number of rule matches in summary and
/// description.
pub struct LanguageToolScorer {
    client: Client,
    endpoint: Url,
    limit: RateLimit,
}

impl LanguageToolScorer {
    pub const NAME: &'static str = "language_tool";
    const LANGUAGE: &'static str = "en-US";

    pub fn new(client: Client, service: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client,
            endpoint: Url::parse(&service.endpoint)?,
            limit: service.into(),
        })
    }
}

#[async_trait]
impl Scorer for LanguageToolScorer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn rate_limit(&self) -> RateLimit {
        self.limit
    }

    async fn score(&self, ticket: &Ticket) -> Result<Option<f64>> {
        let text = ticket.summary_and_description();
        if text.trim().is_empty() {
            return Ok(None);
        }

        let request = self
            .client
            .post(self.endpoint.clone())
            .form(&[("language", Self::LANGUAGE), ("text", text.as_str())]);
        let body: LanguageToolResponse = send(Self::NAME, request)
            .await?
            .json()
            .await
            .map_err(|e| AppError::scoring(Self::NAME, e))?;

        Ok(Some(body.matches.len() as f64))
    }
}

// ============================================================================
// Bing Spell Check
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpellCheckResponse {
    #[serde(default)]
    flagged_tokens: Vec<serde_json::Value>,
}

/// Spelling check; the score is the number of flagged tokens.
pub struct BingSpellCheckScorer {
    client: Client,
    endpoint: Url,
    key: String,
    limit: RateLimit,
}

impl BingSpellCheckScorer {
    pub const NAME: &'static str = "bing_spell_check";
    const KEY_HEADER: &'static str = "Ocp-Apim-Subscription-Key";

    pub fn new(client: Client, service: &ServiceConfig, key: impl Into<String>) -> Result<Self> {
        let mut endpoint = Url::parse(&service.endpoint)?;
        endpoint
            .query_pairs_mut()
            .append_pair("mkt", "en-US")
            .append_pair("mode", "proof");

        Ok(Self {
            client,
            endpoint,
            key: key.into(),
            limit: service.into(),
        })
    }
}

#[async_trait]
impl Scorer for BingSpellCheckScorer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn rate_limit(&self) -> RateLimit {
        self.limit
    }

    async fn score(&self, ticket: &Ticket) -> Result<Option<f64>> {
        let text = ticket.summary_and_description();
        if text.trim().is_empty() {
            return Ok(None);
        }

        let request = self
            .client
            .post(self.endpoint.clone())
            .header(Self::KEY_HEADER, &self.key)
            .form(&[("Text", text.as_str())]);
        let body: SpellCheckResponse = send(Self::NAME, request)
            .await?
            .json()
            .await
            .map_err(|e| AppError::scoring(Self::NAME, e))?;

        Ok(Some(body.flagged_tokens.len() as f64))
    }
}

// ============================================================================
// Sentiment
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentimentResponse {
    document_sentiment: DocumentSentiment,
}

#[derive(Deserialize)]
struct DocumentSentiment {
    score: f64,
}

/// Document sentiment of all comment bodies, in `[-1, 1]`.
pub struct SentimentScorer {
    client: Client,
    endpoint: Url,
    limit: RateLimit,
}

impl SentimentScorer {
    pub const NAME: &'static str = "sentiment";

    pub fn new(client: Client, service: &ServiceConfig, key: &str) -> Result<Self> {
        let mut endpoint = Url::parse(&service.endpoint)?;
        endpoint.query_pairs_mut().append_pair("key", key);

        Ok(Self {
            client,
            endpoint,
            limit: service.into(),
        })
    }
}

#[async_trait]
impl Scorer for SentimentScorer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn rate_limit(&self) -> RateLimit {
        self.limit
    }

    async fn score(&self, ticket: &Ticket) -> Result<Option<f64>> {
        let text = ticket.concatenated_comments();
        if text.trim().is_empty() {
            return Ok(None);
        }

        let request = self.client.post(self.endpoint.clone()).json(&json!({
            "document": {"type": "PLAIN_TEXT", "content": text},
            "encodingType": "UTF8",
        }));
        let body: SentimentResponse = send(Self::NAME, request)
            .await?
            .json()
            .await
            .map_err(|e| AppError::scoring(Self::NAME, e))?;

        Ok(Some(body.document_sentiment.score))
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Which scorers an enrichment run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerKind {
    Grammar,
    Spelling,
    Sentiment,
    All,
}

impl FromStr for ScorerKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "grammar" => Ok(Self::Grammar),
            "spelling" => Ok(Self::Spelling),
            "sentiment" => Ok(Self::Sentiment),
            "all" => Ok(Self::All),
            other => Err(AppError::config(format!(
                "unknown scorer type '{other}' (expected grammar, spelling, sentiment or all)"
            ))),
        }
    }
}

impl fmt::Display for ScorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Grammar => "grammar",
            Self::Spelling => "spelling",
            Self::Sentiment => "sentiment",
            Self::All => "all",
        };
        f.write_str(name)
    }
}

impl ScorerKind {
    fn includes(self, other: ScorerKind) -> bool {
        self == Self::All || self == other
    }
}

/// Build the scorers selected by `kind`.
///
/// Fails with a config error when a selected service has no API key.
pub fn build_scorers(
    kind: ScorerKind,
    client: Client,
    config: &EnrichmentConfig,
    credentials: &Credentials,
) -> Result<Vec<Box<dyn Scorer>>> {
    let mut scorers: Vec<Box<dyn Scorer>> = Vec::new();

    if kind.includes(ScorerKind::Grammar) {
        scorers.push(Box::new(LanguageToolScorer::new(
            client.clone(),
            &config.language_tool,
        )?));
    }

    if kind.includes(ScorerKind::Spelling) {
        let key = credentials.bing_key.as_deref().ok_or_else(|| {
            AppError::config(format!("{} is not set", Credentials::BING_KEY_VAR))
        })?;
        scorers.push(Box::new(BingSpellCheckScorer::new(
            client.clone(),
            &config.bing_spell_check,
            key,
        )?));
    }

    if kind.includes(ScorerKind::Sentiment) {
        let key = credentials.gcp_key.as_deref().ok_or_else(|| {
            AppError::config(format!("{} is not set", Credentials::GCP_KEY_VAR))
        })?;
        scorers.push(Box::new(SentimentScorer::new(client, &config.sentiment, key)?));
    }

    Ok(scorers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comment, Comments};
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer, route: &str, batch_size: usize) -> ServiceConfig {
        ServiceConfig {
            endpoint: format!("{}{}", server.uri(), route),
            batch_size,
            window_secs: 0,
        }
    }

    fn ticket(key: &str, summary: &str) -> Ticket {
        let mut ticket = Ticket::new(key);
        ticket.fields.summary = summary.to_string();
        ticket
    }

    fn matches(n: usize) -> serde_json::Value {
        json!({ "matches": vec![json!({"message": "x"}); n] })
    }

    #[tokio::test]
    async fn test_language_tool_counts_matches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/check"))
            .and(body_string_contains("language=en-US"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches(3)))
            .expect(5)
            .mount(&server)
            .await;

        let scorer = LanguageToolScorer::new(Client::new(), &service(&server, "/v2/check", 2)).unwrap();
        let tickets: Vec<_> = (0..5)
            .map(|i| ticket(&format!("KAFKA-{i}"), "teh broker crash"))
            .collect();

        let report = score_tickets(&scorer, &tickets, &mut Pacer::new(scorer.rate_limit())).await;
        assert_eq!(report.scores.len(), 5);
        assert!(report.scores.values().all(|s| *s == 3.0));
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_already_scored_tickets_make_no_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches(1)))
            .expect(0)
            .mount(&server)
            .await;

        let scorer = LanguageToolScorer::new(Client::new(), &service(&server, "/v2/check", 20)).unwrap();
        let mut scored = ticket("KAFKA-1", "already done");
        scored.set_score(LanguageToolScorer::NAME, 4.0);

        let mut pacer = Pacer::new(scorer.rate_limit());
        let report = score_tickets(&scorer, &[scored.clone()], &mut pacer).await;
        assert!(report.scores.is_empty());
        assert_eq!(report.skipped, 1);
        assert_eq!(scored.score(LanguageToolScorer::NAME), Some(4.0));
    }

    #[tokio::test]
    async fn test_single_failure_does_not_stop_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches(0)))
            .mount(&server)
            .await;

        let scorer = LanguageToolScorer::new(Client::new(), &service(&server, "/v2/check", 10)).unwrap();
        let tickets = [
            ticket("KAFKA-1", "fine"),
            ticket("KAFKA-2", "broken"),
            ticket("KAFKA-3", "limited"),
            ticket("KAFKA-4", "fine too"),
        ];

        let report = score_tickets(&scorer, &tickets, &mut Pacer::new(scorer.rate_limit())).await;
        assert_eq!(report.scores.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, "KAFKA-2");
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_bing_sends_key_and_counts_flagged_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/spellcheck"))
            .and(header("Ocp-Apim-Subscription-Key", "secret"))
            .and(query_param("mode", "proof"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "flaggedTokens": [{"token": "teh"}, {"token": "brokr"}]
            })))
            .mount(&server)
            .await;

        let scorer =
            BingSpellCheckScorer::new(Client::new(), &service(&server, "/spellcheck", 100), "secret")
                .unwrap();
        let score = scorer.score(&ticket("KAFKA-1", "teh brokr")).await.unwrap();
        assert_eq!(score, Some(2.0));
    }

    #[tokio::test]
    async fn test_sentiment_reads_document_score_and_skips_silent_tickets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/documents:analyzeSentiment"))
            .and(query_param("key", "gcp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documentSentiment": {"score": -0.4, "magnitude": 1.2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let scorer =
            SentimentScorer::new(Client::new(), &service(&server, "/documents:analyzeSentiment", 600), "gcp")
                .unwrap();

        let mut discussed = ticket("KAFKA-1", "crash");
        discussed.fields.comments = Comments {
            comments: vec![Comment {
                body: "This is still broken and annoying".into(),
                ..Comment::default()
            }],
        };
        let silent = ticket("KAFKA-2", "crash");

        let mut pacer = Pacer::new(scorer.rate_limit());
        let report = score_tickets(&scorer, &[discussed, silent], &mut pacer).await;
        assert_eq!(report.scores.get("KAFKA-1"), Some(&-0.4));
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_score_all_keys_reports_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches(2)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/spellcheck"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"flaggedTokens": []})))
            .mount(&server)
            .await;

        let scorers: Vec<Box<dyn Scorer>> = vec![
            Box::new(LanguageToolScorer::new(Client::new(), &service(&server, "/v2/check", 5)).unwrap()),
            Box::new(
                BingSpellCheckScorer::new(Client::new(), &service(&server, "/spellcheck", 5), "k")
                    .unwrap(),
            ),
        ];

        let mut pacers = Pacer::for_scorers(&scorers);
        let reports = score_all(&[ticket("KAFKA-1", "text")], &scorers, &mut pacers).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports["language_tool"].scores["KAFKA-1"], 2.0);
        assert_eq!(reports["bing_spell_check"].scores["KAFKA-1"], 0.0);
    }

    #[tokio::test]
    async fn test_batches_wait_out_the_window() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches(1)))
            .expect(3)
            .mount(&server)
            .await;

        let windowed = ServiceConfig {
            window_secs: 1,
            ..service(&server, "/v2/check", 1)
        };
        let scorer = LanguageToolScorer::new(Client::new(), &windowed).unwrap();
        let tickets: Vec<_> = (0..3)
            .map(|i| ticket(&format!("KAFKA-{i}"), "teh broker"))
            .collect();

        let started = Instant::now();
        let report = score_tickets(&scorer, &tickets, &mut Pacer::new(scorer.rate_limit())).await;

        assert_eq!(report.scores.len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_pacer_carries_the_window_into_the_next_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches(1)))
            .expect(2)
            .mount(&server)
            .await;

        let windowed = ServiceConfig {
            window_secs: 1,
            ..service(&server, "/v2/check", 5)
        };
        let scorer = LanguageToolScorer::new(Client::new(), &windowed).unwrap();
        let mut pacer = Pacer::new(scorer.rate_limit());

        let started = Instant::now();
        score_tickets(&scorer, &[ticket("KAFKA-1", "teh")], &mut pacer).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        score_tickets(&scorer, &[ticket("KAFKA-2", "teh")], &mut pacer).await;
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_fully_skipped_call_leaves_the_window_untouched() {
        let server = MockServer::start().await;
        let windowed = ServiceConfig {
            window_secs: 30,
            ..service(&server, "/v2/check", 5)
        };
        let scorer = LanguageToolScorer::new(Client::new(), &windowed).unwrap();
        let mut pacer = Pacer::new(scorer.rate_limit());

        let mut scored = ticket("KAFKA-1", "done");
        scored.set_score(LanguageToolScorer::NAME, 1.0);
        let report = score_tickets(&scorer, &[scored], &mut pacer).await;

        assert_eq!(report.skipped, 1);
        assert!(pacer.last_batch.is_none());
    }

    #[test]
    fn test_scorer_kind_parsing() {
        assert_eq!("grammar".parse::<ScorerKind>().unwrap(), ScorerKind::Grammar);
        assert_eq!("ALL".parse::<ScorerKind>().unwrap(), ScorerKind::All);
        assert!("tone".parse::<ScorerKind>().is_err());
    }

    #[test]
    fn test_build_scorers_requires_keys() {
        let config = EnrichmentConfig::default();
        let none = Credentials::default();

        let grammar = build_scorers(ScorerKind::Grammar, Client::new(), &config, &none).unwrap();
        assert_eq!(grammar.len(), 1);
        assert!(matches!(
            build_scorers(ScorerKind::Spelling, Client::new(), &config, &none),
            Err(AppError::Config(_))
        ));

        let keys = Credentials {
            bing_key: Some("b".into()),
            gcp_key: Some("g".into()),
            ..Credentials::default()
        };
        let all = build_scorers(ScorerKind::All, Client::new(), &config, &keys).unwrap();
        let names: Vec<_> = all.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["language_tool", "bing_spell_check", "sentiment"]);
    }
}
