//! MarketVault Core: configuration-driven storage and dual-track retrieval.
//!
//! This crate holds the whole storage engine:
//! - Schema registry and field type catalog (table name → layout and load mode)
//! - Type-enforced Parquet writer for monthly partitions and snapshots
//! - SQL generation for pivot, select, and metadata statements
//! - Retrieval engine rebuilding time × identifier matrices and key → value mappings
//! - Forward-fill and zero-fill over dense matrices
//!
//! Reads and writes go through an explicit [`Session`] opened by the caller.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod fill;
pub mod layout;
pub mod model;
pub mod query;
pub mod registry;
pub mod schema;
pub mod session;
pub mod value;

pub use config::StoreConfig;
pub use data::{Fetcher, MonthKey, StorageWriter};
pub use engine::{RetrievalEngine, TableMetadata};
pub use error::{ConfigError, RegistryError, StoreError};
pub use fill::{forward_fill, zero_fill, Matrix};
pub use layout::StorageLayout;
pub use model::{MappingData, MappingTable, MarketDataContainer, MatrixTable, TableData};
pub use registry::{Cardinality, LoadMode, SchemaRegistry, StorageType, TableSpec};
pub use schema::{FieldCatalog, FieldType};
pub use session::Session;
pub use value::{Row, Value};
