//! Service layer for the ticket pipeline.
//!
//! This module contains the network-facing parts:
//! - Tracker API client (`JiraClient`, behind the `TicketSource` trait)
//! - External text scorers (`Scorer` implementations)

mod jira;
mod scorers;

pub use jira::{JiraClient, TICKET_FIELDS, TicketSource};
pub use scorers::{
    BingSpellCheckScorer, LanguageToolScorer, Pacer, RateLimit, ScoreFailure, ScoreReport, Scorer,
    ScorerKind, SentimentScorer, build_scorers, score_all, score_tickets,
};
