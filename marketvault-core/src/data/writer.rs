//! Type-enforced Parquet writer for partitions and snapshots.
//!
//! Every column of a batch must be declared in the field type catalog; a
//! single unknown column refuses the whole batch before anything touches
//! the disk. Accepted columns are cast to their catalog type and written
//! ZSTD-compressed, replacing whatever file sat at the derived path.
//!
//! Writes go to `{path}.tmp` first and are renamed into place.

use super::provider::Fetcher;
use crate::error::StoreError;
use crate::layout::StorageLayout;
use crate::registry::{SchemaRegistry, StorageType, TableSpec};
use crate::schema::FieldType;
use crate::value::{date_to_days, parse_date, Row, Value};
use polars::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a successful write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub rows: usize,
}

/// Writes row batches into the on-disk layout.
#[derive(Debug, Clone)]
pub struct StorageWriter {
    layout: StorageLayout,
    registry: Arc<SchemaRegistry>,
}

impl StorageWriter {
    pub fn new(layout: StorageLayout, registry: Arc<SchemaRegistry>) -> Self {
        Self { layout, registry }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Replace `{table}/year={year}/{year}-{month}.parquet` with `rows`.
    ///
    /// Rows are sorted by date then identifier (whichever the table
    /// declares) before writing. An empty batch is logged and skipped.
    pub fn write_partition(
        &self,
        table: &str,
        rows: &[Row],
        year: i32,
        month: u32,
    ) -> Result<Option<WriteOutcome>, StoreError> {
        let spec = self.spec_for(table, StorageType::Partition)?;
        if !(1..=12).contains(&month) {
            return Err(StoreError::write_failed(
                table,
                format!("month {month} is out of range"),
            ));
        }
        if rows.is_empty() {
            warn!(table, year, month, "empty batch, nothing written");
            return Ok(None);
        }

        let df = self.build_frame(spec, rows)?;
        let sort_keys: Vec<Expr> = [spec.date_col.as_deref(), Some(spec.id_col.as_str())]
            .into_iter()
            .flatten()
            .filter(|c| df.get_column_index(c).is_some())
            .map(col)
            .collect();
        let mut df = if sort_keys.is_empty() {
            df
        } else {
            df.lazy()
                .sort_by_exprs(sort_keys, SortMultipleOptions::default().with_maintain_order(true))
                .collect()
                .map_err(|e| StoreError::write_failed(table, format!("sort: {e}")))?
        };

        let path = self.layout.partition_path(table, year, month);
        write_replacing(table, &mut df, &path)?;
        info!(table, year, month, rows = df.height(), path = %path.display(), "partition written");
        Ok(Some(WriteOutcome {
            path,
            rows: df.height(),
        }))
    }

    /// Replace `{table}/{table}.parquet` with the distinct rows of `rows`.
    pub fn write_snapshot(
        &self,
        table: &str,
        rows: &[Row],
    ) -> Result<Option<WriteOutcome>, StoreError> {
        let spec = self.spec_for(table, StorageType::Snapshot)?;
        if rows.is_empty() {
            warn!(table, "empty snapshot batch, nothing written");
            return Ok(None);
        }

        let df = self.build_frame(spec, rows)?;
        let before = df.height();
        let mut df = df
            .lazy()
            .unique_stable(None, UniqueKeepStrategy::First)
            .collect()
            .map_err(|e| StoreError::write_failed(table, format!("dedupe: {e}")))?;
        if df.height() < before {
            debug!(table, dropped = before - df.height(), "duplicate snapshot rows dropped");
        }

        let path = self.layout.snapshot_path(table);
        write_replacing(table, &mut df, &path)?;
        info!(table, rows = df.height(), path = %path.display(), "snapshot written");
        Ok(Some(WriteOutcome {
            path,
            rows: df.height(),
        }))
    }

    /// Pull one month from `fetcher` and write it as a partition.
    pub fn ingest_month(
        &self,
        fetcher: &dyn Fetcher,
        table: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<WriteOutcome>, StoreError> {
        let rows = fetcher
            .fetch_month(table, year, month)
            .map_err(|e| StoreError::Fetch {
                table: table.to_string(),
                reason: format!("{} ({year}-{month:02}): {e}", fetcher.name()),
            })?;
        self.write_partition(table, &rows, year, month)
    }

    /// Pull a whole snapshot from `fetcher` and write it.
    pub fn ingest_snapshot(
        &self,
        fetcher: &dyn Fetcher,
        table: &str,
    ) -> Result<Option<WriteOutcome>, StoreError> {
        let rows = fetcher
            .fetch_snapshot(table)
            .map_err(|e| StoreError::Fetch {
                table: table.to_string(),
                reason: format!("{}: {e}", fetcher.name()),
            })?;
        self.write_snapshot(table, &rows)
    }

    fn spec_for(&self, table: &str, expected: StorageType) -> Result<&TableSpec, StoreError> {
        let spec = self.registry.resolve(table)?;
        if spec.storage != expected {
            return Err(StoreError::write_failed(
                table,
                format!(
                    "table is stored as {}, not {}",
                    spec.storage.as_str(),
                    expected.as_str()
                ),
            ));
        }
        Ok(spec)
    }

    /// Validate every column name, then cast each column to its catalog type.
    fn build_frame(&self, spec: &TableSpec, rows: &[Row]) -> Result<DataFrame, StoreError> {
        let names: BTreeSet<&str> = rows
            .iter()
            .flat_map(|r| r.keys().map(String::as_str))
            .collect();

        let catalog = self.registry.catalog();
        let mut typed = Vec::with_capacity(names.len());
        for name in &names {
            match catalog.get(name) {
                Some(dtype) => typed.push((*name, dtype)),
                None => {
                    return Err(StoreError::SchemaViolation {
                        table: spec.name.clone(),
                        field: name.to_string(),
                    })
                }
            }
        }

        let columns = typed
            .into_iter()
            .map(|(name, dtype)| cast_column(&spec.name, name, dtype, rows))
            .collect::<Result<Vec<_>, _>>()?;
        DataFrame::new(columns)
            .map_err(|e| StoreError::write_failed(&spec.name, format!("dataframe creation: {e}")))
    }
}

/// Write `df` to `{path}.tmp`, then swap it in for `path`.
fn write_replacing(table: &str, df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::write_failed(table, "partition path has no parent"))?;
    fs::create_dir_all(dir)
        .map_err(|e| StoreError::write_failed(table, format!("create dir {}: {e}", dir.display())))?;

    let tmp_path = path.with_extension("parquet.tmp");
    let result = fs::File::create(&tmp_path)
        .map_err(|e| format!("create file: {e}"))
        .and_then(|file| {
            ParquetWriter::new(file)
                .with_compression(ParquetCompression::Zstd(None))
                .finish(df)
                .map_err(|e| format!("write parquet: {e}"))
        });
    if let Err(reason) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::write_failed(table, reason));
    }

    if path.exists() {
        fs::remove_file(path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::write_failed(table, format!("remove previous file: {e}"))
        })?;
    }
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::write_failed(table, format!("rename into place: {e}"))
    })
}

fn cast_error(table: &str, column: &str, row: usize, value: &Value, dtype: FieldType) -> StoreError {
    StoreError::write_failed(
        table,
        format!("column '{column}' row {row}: cannot cast {value:?} to {dtype}"),
    )
}

/// Build one typed column from `rows[..][name]`; absent keys become nulls.
fn cast_column(
    table: &str,
    name: &str,
    dtype: FieldType,
    rows: &[Row],
) -> Result<Column, StoreError> {
    let cells = rows
        .iter()
        .map(|r| r.get(name).unwrap_or(&Value::Null));
    let fail = |i: usize, v: &Value| cast_error(table, name, i, v, dtype);

    let column = match dtype {
        FieldType::Date => {
            let days = cells
                .enumerate()
                .map(|(i, v)| match v {
                    Value::Null => Ok(None),
                    Value::Date(d) => Ok(Some(date_to_days(*d))),
                    Value::Str(s) => parse_date(s).map(|d| Some(date_to_days(d))).ok_or_else(|| fail(i, v)),
                    _ => Err(fail(i, v)),
                })
                .collect::<Result<Vec<Option<i32>>, _>>()?;
            Column::new(name.into(), days)
                .cast(&dtype.dtype())
                .map_err(|e| StoreError::write_failed(table, format!("date cast: {e}")))?
        }
        FieldType::Varchar => {
            let strings: Vec<Option<String>> = cells
                .map(|v| match v {
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect();
            Column::new(name.into(), strings)
        }
        FieldType::Double => {
            let floats = cells
                .enumerate()
                .map(|(i, v)| match v {
                    Value::Null => Ok(None),
                    Value::Float(f) => Ok(Some(*f)),
                    Value::Int(n) => Ok(Some(*n as f64)),
                    Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
                    Value::Str(s) if s.trim().is_empty() => Ok(None),
                    Value::Str(s) => s.trim().parse::<f64>().map(Some).map_err(|_| fail(i, v)),
                    Value::Date(_) => Err(fail(i, v)),
                })
                .collect::<Result<Vec<Option<f64>>, _>>()?;
            Column::new(name.into(), floats)
        }
        FieldType::UBigInt => {
            let counts = cells
                .enumerate()
                .map(|(i, v)| match v {
                    Value::Null => Ok(None),
                    Value::Str(s) if s.trim().is_empty() => Ok(None),
                    other => to_unsigned(other).map(Some).ok_or_else(|| fail(i, other)),
                })
                .collect::<Result<Vec<Option<u64>>, _>>()?;
            Column::new(name.into(), counts)
        }
    };
    Ok(column)
}

/// Non-negative integral view of a value; fractional counters round to nearest.
fn to_unsigned(value: &Value) -> Option<u64> {
    let from_float = |f: f64| (f.is_finite() && f >= 0.0 && f < u64::MAX as f64).then(|| f.round() as u64);
    match value {
        Value::Int(n) => u64::try_from(*n).ok(),
        Value::Float(f) => from_float(*f),
        Value::Bool(b) => Some(u64::from(*b)),
        Value::Str(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
        Value::Null | Value::Date(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::row;
    use chrono::NaiveDate;

    fn writer(root: &Path) -> StorageWriter {
        StorageWriter::new(StorageLayout::new(root), Arc::new(SchemaRegistry::builtin()))
    }

    fn bar(date: &str, code: &str, close: f64, volume: i64) -> Row {
        row([
            ("trade_date", Value::from(date)),
            ("stock_code", Value::from(code)),
            ("close", Value::from(close)),
            ("volume", Value::from(volume)),
        ])
    }

    fn read(path: &Path) -> DataFrame {
        ParquetReader::new(fs::File::open(path).unwrap())
            .finish()
            .unwrap()
    }

    #[test]
    fn partition_is_written_sorted_and_typed() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let rows = vec![
            bar("2024-01-03", "000002", 11.0, 200),
            bar("2024-01-02", "000002", 10.0, 100),
            bar("2024-01-02", "000001", 5.0, 50),
        ];

        let outcome = w
            .write_partition("cn_stock_em_daily_adj", &rows, 2024, 1)
            .unwrap()
            .unwrap();
        assert!(outcome
            .path
            .ends_with("cn_stock_em_daily_adj/year=2024/2024-01.parquet"));
        assert_eq!(outcome.rows, 3);

        let df = read(&outcome.path);
        assert_eq!(df.column("trade_date").unwrap().dtype(), &DataType::Date);
        assert_eq!(df.column("volume").unwrap().dtype(), &DataType::UInt64);
        let codes: Vec<Option<&str>> = df.column("stock_code").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(codes, vec![Some("000001"), Some("000002"), Some("000002")]);
        let closes = df.column("close").unwrap().f64().unwrap();
        assert_eq!(closes.get(2), Some(11.0));
    }

    #[test]
    fn unknown_field_refuses_whole_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let mut bad = bar("2024-01-02", "000001", 5.0, 50);
        bad.insert("mystery".into(), Value::from(1.0));

        let err = w
            .write_partition("cn_stock_em_daily_adj", &[bar("2024-01-02", "000002", 1.0, 1), bad], 2024, 1)
            .unwrap_err();
        match err {
            StoreError::SchemaViolation { field, .. } => assert_eq!(field, "mystery"),
            other => panic!("expected SchemaViolation, got {other:?}"),
        }
        assert!(!w.layout().partition_path("cn_stock_em_daily_adj", 2024, 1).exists());
        assert!(!w.layout().table_dir("cn_stock_em_daily_adj").exists());
    }

    #[test]
    fn incompatible_value_is_write_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let mut r = bar("2024-01-02", "000001", 5.0, 50);
        r.insert("close".into(), Value::from("n/a"));
        let err = w.write_partition("cn_stock_em_daily_adj", &[r], 2024, 1).unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed { .. }), "{err}");
        assert!(err.to_string().contains("close"));
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        assert_eq!(w.write_partition("cn_stock_em_daily_adj", &[], 2024, 1).unwrap(), None);
        assert!(!w.layout().table_dir("cn_stock_em_daily_adj").exists());
    }

    #[test]
    fn rewrite_replaces_previous_partition() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let t = "cn_stock_em_daily_adj";
        w.write_partition(t, &[bar("2024-01-02", "A", 1.0, 1), bar("2024-01-03", "A", 2.0, 1)], 2024, 1)
            .unwrap();
        let out = w.write_partition(t, &[bar("2024-01-04", "B", 3.0, 1)], 2024, 1).unwrap().unwrap();

        let df = read(&out.path);
        assert_eq!(df.height(), 1);
        assert!(!out.path.with_extension("parquet.tmp").exists());
    }

    #[test]
    fn snapshot_drops_duplicate_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let name = |code: &str, n: &str| {
            row([("stock_code", Value::from(code)), ("stock_name", Value::from(n))])
        };
        let rows = vec![name("000001", "PingAn"), name("000002", "Vanke"), name("000001", "PingAn")];

        let out = w.write_snapshot("cn_stock_em", &rows).unwrap().unwrap();
        assert!(out.path.ends_with("cn_stock_em/cn_stock_em.parquet"));
        assert_eq!(out.rows, 2);
        assert_eq!(read(&out.path).height(), 2);
    }

    #[test]
    fn storage_kind_mismatch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path());
        let rows = vec![bar("2024-01-02", "A", 1.0, 1)];
        assert!(matches!(
            w.write_snapshot("cn_stock_em_daily_adj", &rows),
            Err(StoreError::WriteFailed { .. })
        ));
        assert!(matches!(
            w.write_partition("not_a_table", &rows, 2024, 1),
            Err(StoreError::TableNotRegistered { .. })
        ));
    }

    #[test]
    fn unsigned_casts() {
        assert_eq!(to_unsigned(&Value::Int(5)), Some(5));
        assert_eq!(to_unsigned(&Value::Int(-1)), None);
        assert_eq!(to_unsigned(&Value::Float(2.6)), Some(3));
        assert_eq!(to_unsigned(&Value::from("42")), Some(42));
        assert_eq!(to_unsigned(&Value::from("4.0")), Some(4));
        assert_eq!(to_unsigned(&Value::from("x")), None);
        assert_eq!(
            to_unsigned(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())),
            None
        );
    }
}
