//! Data ingestion and writing

pub mod month;
pub mod provider;
pub mod writer;

pub use month::{MonthKey, MonthKeyError};
pub use provider::{FetchError, Fetcher};
pub use writer::{StorageWriter, WriteOutcome};
