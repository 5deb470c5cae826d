//! The embedded SQL session: one Polars `SQLContext` per handle.
//!
//! A session is opened explicitly at startup, passed by value into the
//! engine, and closed at shutdown. Query methods take `&mut self`, so a
//! handle never has two statements in flight; callers that need
//! concurrency either share one engine behind a `Mutex` or open one
//! session each.

use crate::error::StoreError;
use crate::query::{Query, Sources, SOURCE_RELATION};
use polars::prelude::*;
use polars::sql::SQLContext;
use tracing::{debug, info};

pub struct Session {
    ctx: SQLContext,
    executed: u64,
}

impl Session {
    pub fn open() -> Self {
        info!("sql session opened");
        Self {
            ctx: SQLContext::new(),
            executed: 0,
        }
    }

    /// Number of statements this session has run.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Column names the sources expose, read from the Parquet footers
    /// without scanning any rows. Multiple files report the union.
    pub fn source_columns(&self, table: &str, sources: &Sources) -> Result<Vec<String>, StoreError> {
        let mut scan = scan_sources(sources).map_err(|e| StoreError::query(table, e))?;
        let schema = scan
            .collect_schema()
            .map_err(|e| StoreError::query(table, e))?;
        Ok(schema.iter_names().map(|n| n.to_string()).collect())
    }

    /// Bind the query's sources to the source relation, run the statement,
    /// and collect the result. The binding is dropped afterwards, hit or miss.
    pub fn execute(&mut self, table: &str, query: &Query) -> Result<DataFrame, StoreError> {
        let scan = scan_sources(&query.sources).map_err(|e| StoreError::query(table, e))?;
        debug!(table, sql = %query.sql, "executing");

        self.ctx.register(SOURCE_RELATION, scan);
        let result = self
            .ctx
            .execute(&query.sql)
            .and_then(|lf| lf.collect());
        self.ctx.unregister(SOURCE_RELATION);
        self.executed += 1;

        let df = result.map_err(|e| StoreError::query(table, e))?;
        debug!(table, rows = df.height(), cols = df.width(), "query complete");
        Ok(df)
    }

    pub fn close(self) {
        info!(executed = self.executed, "sql session closed");
    }
}

/// Lazy scan over the listed Parquet files (or a glob).
///
/// Files are unioned diagonally so that a month written before a column
/// was added still scans, with nulls in the new column.
fn scan_sources(sources: &Sources) -> PolarsResult<LazyFrame> {
    match sources {
        Sources::Glob(pattern) => LazyFrame::scan_parquet(pattern, Default::default()),
        Sources::Files(paths) => {
            let mut scans = paths
                .iter()
                .map(|p| LazyFrame::scan_parquet(p, Default::default()))
                .collect::<PolarsResult<Vec<_>>>()?;
            match scans.len() {
                0 => Err(PolarsError::ComputeError("no source files to scan".into())),
                1 => Ok(scans.swap_remove(0)),
                _ => concat(
                    scans,
                    UnionArgs {
                        diagonal: true,
                        to_supertypes: true,
                        ..Default::default()
                    },
                ),
            }
        }
    }
}
