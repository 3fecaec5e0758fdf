//! Storage abstractions for ticket persistence.
//!
//! Tickets are kept in a single-bucket key-value layout: key = ticket key,
//! value = JSON-encoded [`Ticket`]. Iteration order is ascending key order.
//!
//! ## File Layout
//!
//! ```text
//! tickets.db            # store file (table `tickets(key, value)`)
//! tickets.db-wal        # write-ahead log while a writer is open
//! ```

pub mod sqlite;

use crate::error::Result;
use crate::models::Ticket;

// Re-export for convenience
pub use sqlite::{SqliteStore, TicketIter};

/// Lazy, finite scan over stored tickets.
pub type TicketScan<'a> = Box<dyn Iterator<Item = Result<Ticket>> + Send + 'a>;

/// Trait for ticket storage backends.
///
/// Writers are serialized; readers may run concurrently with a writer and
/// never observe a partially written batch.
pub trait TicketStorage: Send + Sync {
    /// Write tickets under their keys in one all-or-nothing transaction,
    /// overwriting existing records. Returns the number written.
    fn put(&self, tickets: &[Ticket]) -> Result<usize>;

    /// Point lookup by ticket key.
    fn get_by_key(&self, key: &str) -> Result<Option<Ticket>>;

    /// Full scan in key order. Each call starts a fresh scan.
    fn get_all(&self) -> Result<TicketScan<'_>>;

    /// Tickets at cursor positions `[low, high)` of a full scan.
    ///
    /// Fails with `AppError::Range` when `low >= high`, either bound is
    /// negative, or either bound exceeds the current record count.
    fn slice(&self, low: i64, high: i64) -> Result<Vec<Ticket>>;

    /// Number of stored records.
    fn count(&self) -> Result<usize>;
}
