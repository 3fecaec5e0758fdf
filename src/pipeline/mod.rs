//! Pipeline entry points for ticket operations.
//!
//! - `run_fetch`: Pull every ticket of a project into the store
//! - `run_enrichment`: Add external scores to stored tickets
//! - `run_analysis`: Compute derived fields of stored tickets

pub mod analyze;
pub mod enrich;
pub mod fetch;

use std::sync::Arc;

pub use analyze::{AnalysisOutcome, analyze_ticket, run_analysis};
pub use enrich::{EnrichOutcome, run_enrichment};
pub use fetch::run_fetch;

use crate::error::{AppError, Result};
use crate::storage::TicketStorage;

/// Run a store operation on the blocking pool.
///
/// Store calls are synchronous transactions; this keeps them off the async
/// workers.
pub(crate) async fn on_store<T, F>(store: &Arc<dyn TicketStorage>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn TicketStorage) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| AppError::store(format!("store task failed: {e}")))?
}
