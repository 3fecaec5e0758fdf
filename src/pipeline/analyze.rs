// src/pipeline/analyze.rs

//! Derived-field analysis over stored tickets.
//!
//! Everything here is computed locally from the stored record; no network
//! calls are made.

use std::sync::LazyLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;
use crate::models::{AttachmentCategory, Ticket};
use crate::storage::TicketStorage;
use crate::utils::log::{header, summary};

/// Status names that count as closing a ticket.
const CLOSED_STATUSES: &[&str] = &["Closed", "Resolved"];

static STACK_TRACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(^\s*at\s+[\w$.<>]+\([^)]*\)\s*$)|(\b[\w.$]+(Exception|Error)(:\s|\s*$))|(^\s*Caused by:)",
    )
    .expect("stack trace pattern is valid")
});

static STEPS_TO_REPRODUCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(steps?\s+to\s+reproduce|repro(duction)?\s+steps|how\s+to\s+reproduce)\b")
        .expect("steps pattern is valid")
});

/// Counters gathered over one analysis run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub analyzed: usize,
    pub high_priority: usize,
    pub closed: usize,
    pub with_stack_trace: usize,
    pub with_steps_to_reproduce: usize,
    pub with_attachments: usize,
    /// Mean hours to close over closed tickets
    pub mean_time_to_close: Option<f64>,
    /// Chunks whose write-back failed
    pub store_failures: usize,
}

/// Number of words in `text`, by Unicode word boundaries.
pub fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

pub fn has_stack_trace(text: &str) -> bool {
    STACK_TRACE.is_match(text)
}

pub fn has_steps_to_reproduce(text: &str) -> bool {
    STEPS_TO_REPRODUCE.is_match(text)
}

/// Hours from creation to the first status change into a closed status.
pub fn time_to_close(ticket: &Ticket) -> Option<f64> {
    let created = ticket.fields.created?;

    ticket
        .changelog
        .histories
        .iter()
        .filter(|history| {
            history.items.iter().any(|item| {
                item.field == "status"
                    && item
                        .to_label
                        .as_deref()
                        .is_some_and(|to| CLOSED_STATUSES.iter().any(|s| s.eq_ignore_ascii_case(to)))
            })
        })
        .filter_map(|history| history.created)
        .min()
        .map(|closed| (closed - created).num_seconds() as f64 / 3600.0)
}

/// Recompute the derived fields of one ticket in place.
///
/// Scores are left untouched.
pub fn analyze_ticket(ticket: &mut Ticket) {
    let text = ticket.summary_and_description();
    let comments = ticket.concatenated_comments();

    for attachment in &mut ticket.fields.attachments {
        attachment.category = Some(AttachmentCategory::from_filename(&attachment.filename));
    }

    let closed_after = time_to_close(ticket);
    let derived = &mut ticket.derived;
    derived.summary_desc_word_count = word_count(&text);
    derived.comment_word_count = word_count(&comments);
    derived.has_stack_trace = has_stack_trace(&text) || has_stack_trace(&comments);
    derived.has_steps_to_reproduce = has_steps_to_reproduce(&text);
    derived.has_attachments = !ticket.fields.attachments.is_empty();
    derived.time_to_close = closed_after;
}

/// Analyze every stored ticket, `chunk_size` records at a time, and write
/// the results back. A failed write is logged and counted; the remaining
/// chunks are still analyzed.
pub fn run_analysis(store: &dyn TicketStorage, chunk_size: usize) -> Result<AnalysisOutcome> {
    header("Analyzing stored tickets");

    let count = store.count()?;
    let chunk = chunk_size.max(1);
    let mut outcome = AnalysisOutcome::default();
    let mut hours_total = 0.0;

    for low in (0..count).step_by(chunk) {
        let high = (low + chunk).min(count);
        let mut tickets = store.slice(low as i64, high as i64)?;

        for ticket in &mut tickets {
            analyze_ticket(ticket);

            outcome.analyzed += 1;
            outcome.high_priority += usize::from(ticket.is_high_priority());
            outcome.with_stack_trace += usize::from(ticket.derived.has_stack_trace);
            outcome.with_steps_to_reproduce += usize::from(ticket.derived.has_steps_to_reproduce);
            outcome.with_attachments += usize::from(ticket.derived.has_attachments);
            if let Some(hours) = ticket.derived.time_to_close {
                outcome.closed += 1;
                hours_total += hours;
            }
        }

        match store.put(&tickets) {
            Ok(_) => log::debug!("Analyzed records {}..{} of {}", low, high, count),
            Err(error) => {
                outcome.store_failures += 1;
                log::error!("Failed to store records {}..{}: {}", low, high, error);
            }
        }
    }

    if outcome.closed > 0 {
        outcome.mean_time_to_close = Some(hours_total / outcome.closed as f64);
    }

    summary(
        "Analysis",
        &[
            ("tickets analyzed", outcome.analyzed.to_string()),
            ("high priority", outcome.high_priority.to_string()),
            ("closed", outcome.closed.to_string()),
            (
                "mean hours to close",
                outcome
                    .mean_time_to_close
                    .map_or_else(|| "n/a".to_string(), |h| format!("{h:.1}")),
            ),
            ("with stack trace", outcome.with_stack_trace.to_string()),
            ("with steps to reproduce", outcome.with_steps_to_reproduce.to_string()),
            ("with attachments", outcome.with_attachments.to_string()),
            ("store failures", outcome.store_failures.to_string()),
        ],
    );

    Ok(outcome)
}
