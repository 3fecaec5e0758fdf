// src/pipeline/enrich.rs

//! Enrichment pipeline: merge external scores into stored tickets.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::on_store;
use crate::services::{Pacer, Scorer, score_all};
use crate::storage::TicketStorage;
use crate::utils::log::{header, sub_item, summary};

/// Counters gathered over one enrichment run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrichOutcome {
    pub tickets_seen: usize,
    pub tickets_updated: usize,
    /// New scores per scorer name
    pub scored: BTreeMap<String, usize>,
    pub skipped: BTreeMap<String, usize>,
    pub failures: BTreeMap<String, usize>,
    /// Rounds whose write-back failed
    pub store_failures: usize,
}

impl EnrichOutcome {
    pub fn total_failures(&self) -> usize {
        self.failures.values().sum()
    }
}

/// Score every stored ticket with `scorers`, `chunk_size` records per round.
///
/// Each scorer keeps one [`Pacer`] for the whole run, so its rate window
/// holds across round boundaries. A round's updated tickets are written
/// back before the next round is loaded; a failed write is logged and
/// counted, and the run moves on.
pub async fn run_enrichment(
    store: Arc<dyn TicketStorage>,
    scorers: &[Box<dyn Scorer>],
    chunk_size: usize,
) -> Result<EnrichOutcome> {
    let names: Vec<&str> = scorers.iter().map(|s| s.name()).collect();
    header(&format!("Enriching tickets with {}", names.join(", ")));

    let count = on_store(&store, |s| s.count()).await?;
    let chunk = chunk_size.max(1);
    let mut outcome = EnrichOutcome::default();
    let mut pacers = Pacer::for_scorers(scorers);

    for low in (0..count).step_by(chunk) {
        let high = (low + chunk).min(count);
        let tickets = on_store(&store, move |s| s.slice(low as i64, high as i64)).await?;
        outcome.tickets_seen += tickets.len();

        let reports = score_all(&tickets, scorers, &mut pacers).await;

        let mut updated = Vec::new();
        for mut ticket in tickets {
            let mut changed = false;
            for (name, report) in &reports {
                if let Some(score) = report.scores.get(&ticket.key) {
                    ticket.set_score(name, *score);
                    changed = true;
                }
            }
            if changed {
                updated.push(ticket);
            }
        }

        for (name, report) in &reports {
            *outcome.scored.entry(name.clone()).or_default() += report.scores.len();
            *outcome.skipped.entry(name.clone()).or_default() += report.skipped;
            *outcome.failures.entry(name.clone()).or_default() += report.failures.len();
        }

        if !updated.is_empty() {
            match on_store(&store, move |s| s.put(&updated)).await {
                Ok(written) => outcome.tickets_updated += written,
                Err(error) => {
                    outcome.store_failures += 1;
                    log::error!("Failed to store records {}..{}: {}", low, high, error);
                }
            }
        }
        log::info!("Enriched records {}..{} of {}", low, high, count);
    }

    summary(
        "Enrichment",
        &[
            ("tickets seen", outcome.tickets_seen.to_string()),
            ("tickets updated", outcome.tickets_updated.to_string()),
            ("scoring failures", outcome.total_failures().to_string()),
            ("store failures", outcome.store_failures.to_string()),
        ],
    );
    for name in &names {
        sub_item(&format!(
            "{}: scored={}, skipped={}, failed={}",
            name,
            outcome.scored.get(*name).copied().unwrap_or(0),
            outcome.skipped.get(*name).copied().unwrap_or(0),
            outcome.failures.get(*name).copied().unwrap_or(0),
        ));
    }

    Ok(outcome)
}
