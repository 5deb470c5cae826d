//! Error taxonomy for registry loading, persistence, and retrieval.
//!
//! Every runtime variant carries the table name, and the date range where
//! one applies, so a failure can be diagnosed from its message alone.

use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised while loading or validating the schema registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("table '{table}': column '{column}' is not in the field type catalog")]
    UnknownColumn { table: String, column: String },

    #[error("table '{table}': fill column '{column}' is not one of its fields")]
    FillColumnNotField { table: String, column: String },

    #[error("table '{table}': matrix field '{column}' has non-numeric type {dtype}")]
    NonNumericField {
        table: String,
        column: String,
        dtype: String,
    },

    #[error("table '{table}': matrix table declares no fields")]
    NoFields { table: String },

    #[error("table '{table}': matrix table needs a date column")]
    MissingDateColumn { table: String },

    #[error("table '{table}' is registered twice")]
    DuplicateTable { table: String },

    #[error("registry parse error: {0}")]
    Parse(String),

    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the storage writer and the retrieval engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("schema violation in table '{table}': field '{field}' is not registered in the field type catalog")]
    SchemaViolation { table: String, field: String },

    #[error("no data for table '{table}' between {start} and {end}")]
    DataNotFound {
        table: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("write to table '{table}' failed: {reason}")]
    WriteFailed { table: String, reason: String },

    #[error("table '{table}' is not registered")]
    TableNotRegistered { table: String },

    #[error("invalid date range {start}..{end}: start is after end")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("query on table '{table}' failed: {reason}")]
    Query { table: String, reason: String },

    #[error("fetch for table '{table}' failed: {reason}")]
    Fetch { table: String, reason: String },

    #[error("storage I/O error on table '{table}': {source}")]
    Io {
        table: String,
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(table: &str, source: std::io::Error) -> Self {
        Self::Io {
            table: table.to_string(),
            source,
        }
    }

    pub(crate) fn write_failed(table: &str, reason: impl std::fmt::Display) -> Self {
        Self::WriteFailed {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn query(table: &str, reason: impl std::fmt::Display) -> Self {
        Self::Query {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for failures the caller can treat as "no data" rather than a crash.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DataNotFound { .. })
    }
}

/// Errors raised while reading process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
