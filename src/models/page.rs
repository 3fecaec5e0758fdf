//! Search response and page structures.

use serde::{Deserialize, Serialize};

use crate::models::Ticket;

/// Raw payload of the tracker search endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub start_at: usize,

    #[serde(default)]
    pub max_results: usize,

    /// Total number of tickets matching the query at request time
    #[serde(default)]
    pub total: usize,

    #[serde(default)]
    pub issues: Vec<Ticket>,
}

/// One bounded, offset-based batch of tickets returned by one API call.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Worker index that requested this page
    pub index: usize,

    /// Offset of the first ticket in the page
    pub start_at: usize,

    /// Total-count hint reported alongside the page
    pub total: usize,

    /// Tickets in server response order
    pub tickets: Vec<Ticket>,
}

impl Page {
    /// Build a page from a decoded search response.
    pub fn from_response(index: usize, response: SearchResponse) -> Self {
        Self {
            index,
            start_at: response.start_at,
            total: response.total,
            tickets: response.issues,
        }
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

/// Page boundaries for a fetch run, computed once from a single count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    /// Authoritative ticket count the plan was sized against
    pub total: usize,

    /// Number of pages, one per worker
    pub pages: usize,

    /// Tickets requested per page: `ceil(total / pages)`
    pub page_size: usize,
}

impl PagePlan {
    /// Split `total` tickets across `workers` pages.
    ///
    /// `workers` must be non-zero; config validation guarantees this.
    pub fn new(total: usize, workers: usize) -> Self {
        let pages = workers.max(1);
        Self {
            total,
            pages,
            page_size: total.div_ceil(pages),
        }
    }

    /// Offset of the first ticket of page `index`.
    pub fn start_at(&self, index: usize) -> usize {
        index * self.page_size
    }

    /// Half-open ticket range `[start, end)` covered by page `index`,
    /// clamped to the plan's total.
    pub fn range(&self, index: usize) -> std::ops::Range<usize> {
        let start = self.start_at(index).min(self.total);
        let end = (start + self.page_size).min(self.total);
        start..end
    }
}
