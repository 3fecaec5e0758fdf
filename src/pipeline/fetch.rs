// src/pipeline/fetch.rs

//! Ticket fetching pipeline.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::error::{AppError, Result};
use crate::models::{FetchConfig, FetchOutcome, MAX_WORKERS, PagePlan};
use crate::pipeline::on_store;
use crate::services::TicketSource;
use crate::storage::TicketStorage;
use crate::utils::log::{header, summary};

/// Fetch every ticket of the configured project into `store`.
///
/// The ticket count is read once and split into one page per worker. Pages
/// that fail are logged and counted; the run goes on without them.
pub async fn run_fetch(
    source: &dyn TicketSource,
    store: Arc<dyn TicketStorage>,
    config: &FetchConfig,
) -> Result<FetchOutcome> {
    let workers = config.workers;
    if workers == 0 || workers > MAX_WORKERS {
        return Err(AppError::config(format!(
            "worker count {workers} must be between 1 and {MAX_WORKERS}"
        )));
    }

    let start_time = Utc::now();
    header(&format!("Fetching project {}", config.project));

    let total = source.count_tickets(&config.project).await?;
    let mut outcome = FetchOutcome {
        total_count: total,
        ..FetchOutcome::default()
    };

    if total == 0 {
        log::info!("Project {} has no tickets, nothing to fetch", config.project);
        return Ok(outcome);
    }

    let plan = PagePlan::new(total, workers);
    outcome.pages_total = plan.pages;
    log::info!(
        "{} tickets across {} pages of {}",
        total,
        plan.pages,
        plan.page_size
    );

    let project = config.project.as_str();
    let mut pages = stream::iter(0..plan.pages)
        .map(|index| async move {
            let result = source.fetch_page(project, index, plan.page_size).await;
            (index, result)
        })
        .buffer_unordered(workers);

    while let Some((index, result)) = pages.next().await {
        let page = match result {
            Ok(page) => page,
            Err(error) => {
                outcome.pages_failed += 1;
                log::warn!("Failed to fetch page {} ({:?}): {}", index, plan.range(index), error);
                continue;
            }
        };

        outcome.tickets_fetched += page.len();
        if page.is_empty() {
            continue;
        }

        let tickets = page.tickets;
        match on_store(&store, move |s| s.put(&tickets)).await {
            Ok(written) => outcome.tickets_stored += written,
            Err(error) => {
                outcome.store_failures += 1;
                log::error!("Failed to store page {}: {}", index, error);
            }
        }
    }

    let elapsed = Utc::now() - start_time;
    summary(
        "Fetch",
        &[
            ("tickets expected", outcome.total_count.to_string()),
            ("tickets fetched", outcome.tickets_fetched.to_string()),
            ("tickets stored", outcome.tickets_stored.to_string()),
            (
                "pages failed",
                format!("{}/{}", outcome.pages_failed, outcome.pages_total),
            ),
            ("store failures", outcome.store_failures.to_string()),
            ("elapsed", format!("{}s", elapsed.num_seconds())),
        ],
    );

    Ok(outcome)
}
