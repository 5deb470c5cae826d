//! Fetcher trait and its error type.
//!
//! A fetcher hands over raw attribute→value rows for one table, either a
//! month of a time series or a whole snapshot. It knows nothing about the
//! on-disk layout; the writer sits above it.

use crate::value::Row;
use thiserror::Error;

/// Failures reported by a fetcher.
///
/// Displayable in both CLI and log contexts.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("table '{table}' is not served by this fetcher")]
    UnsupportedTable { table: String },

    #[error("fetch error: {0}")]
    Other(String),
}

/// Source of raw row batches (web provider, CSV import, fixtures).
pub trait Fetcher: Send + Sync {
    /// Human-readable name of this fetcher.
    fn name(&self) -> &str;

    /// Rows for `table` covering one calendar month.
    fn fetch_month(&self, table: &str, year: i32, month: u32) -> Result<Vec<Row>, FetchError>;

    /// Rows for a whole snapshot table.
    fn fetch_snapshot(&self, table: &str) -> Result<Vec<Row>, FetchError>;
}
