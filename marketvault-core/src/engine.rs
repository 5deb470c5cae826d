//! Retrieval engine: resolves tables, scopes partitions, runs the pivot or
//! select statement, and reshapes the result into [`TableData`].
//!
//! The engine owns its [`Session`]. All query paths take `&mut self`, which
//! keeps one statement in flight per engine.

use crate::error::StoreError;
use crate::fill::{forward_fill_in_place, zero_fill_in_place, Matrix};
use crate::layout::StorageLayout;
use crate::model::{MappingTable, MarketDataContainer, MatrixTable, TableData};
use crate::query::{
    pivot_column, QueryBuilder, Sources, END_DATE_COL, ROW_COUNT_COL, START_DATE_COL,
};
use crate::registry::{Cardinality, FillPolicy, LoadMode, SchemaRegistry, StorageType, TableSpec};
use crate::session::Session;
use crate::value::{days_to_date, Value};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One row of the storage audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMetadata {
    /// `None` for tables without a date column.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub row_count: u64,
    pub path: PathBuf,
    pub storage_type: StorageType,
}

/// The files a load will scan, or the knowledge that nothing qualifies.
enum Located {
    Files(Vec<PathBuf>),
    Empty,
}

pub struct RetrievalEngine {
    session: Session,
    registry: Arc<SchemaRegistry>,
    layout: StorageLayout,
}

impl RetrievalEngine {
    pub fn new(session: Session, registry: Arc<SchemaRegistry>, layout: StorageLayout) -> Self {
        Self {
            session,
            registry,
            layout,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Load `tables` over `[start, end]`, optionally restricted to `symbols`.
    ///
    /// Every name is resolved before any file is touched, so an unknown
    /// table fails the call without partial work. Matrix tables contribute
    /// one entry per field (`{table}_{field}`), mapping tables one entry
    /// (`{table}`).
    pub fn load_market_data(
        &mut self,
        tables: &[&str],
        start: NaiveDate,
        end: NaiveDate,
        symbols: Option<&[String]>,
    ) -> Result<MarketDataContainer, StoreError> {
        if start > end {
            return Err(StoreError::InvalidRange { start, end });
        }
        let registry = Arc::clone(&self.registry);
        let specs = tables
            .iter()
            .map(|t| registry.resolve(t))
            .collect::<Result<Vec<_>, _>>()?;

        let symbols: Option<Vec<String>> = symbols
            .filter(|s| !s.is_empty())
            .map(|s| s.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect());

        let mut container = MarketDataContainer::new();
        for spec in specs {
            let loaded = match &spec.load {
                LoadMode::Matrix { fields, .. } => {
                    self.load_matrix(spec, fields, start, end, symbols.as_deref())?
                }
                LoadMode::Mapping {
                    val_col,
                    cardinality,
                } => vec![self
                    .load_mapping(spec, val_col, *cardinality, start, end, symbols.as_deref())?
                    .into()],
            };
            for data in loaded {
                container.insert(data);
            }
        }
        info!(
            tables = tables.len(),
            entries = container.len(),
            %start,
            %end,
            "market data loaded"
        );
        Ok(container)
    }

    /// Files overlapping `[start, end]` for a registered table.
    ///
    /// Partitions are scoped by the `year=` directory names alone. A
    /// partitioned table with no year in `[start.year, end.year]` (or no
    /// directory at all) is `DataNotFound`; overlapping years that hold no
    /// month files yield `Located::Empty`.
    fn locate(
        &self,
        spec: &TableSpec,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Located, StoreError> {
        let not_found = || StoreError::DataNotFound {
            table: spec.name.clone(),
            start,
            end,
        };
        match spec.storage {
            StorageType::Snapshot => {
                let path = self.layout.snapshot_path(&spec.name);
                if path.is_file() {
                    Ok(Located::Files(vec![path]))
                } else {
                    Err(not_found())
                }
            }
            StorageType::Partition => {
                let years: Vec<i32> = self
                    .layout
                    .year_partitions(&spec.name)
                    .map_err(|e| StoreError::io(&spec.name, e))?
                    .into_iter()
                    .filter(|y| (start.year()..=end.year()).contains(y))
                    .collect();
                if years.is_empty() {
                    return Err(not_found());
                }
                debug!(table = %spec.name, ?years, "partitions in range");

                let mut files = Vec::new();
                for year in years {
                    files.extend(
                        self.layout
                            .partition_files(&spec.name, year)
                            .map_err(|e| StoreError::io(&spec.name, e))?,
                    );
                }
                Ok(if files.is_empty() {
                    Located::Empty
                } else {
                    Located::Files(files)
                })
            }
        }
    }

    fn load_matrix(
        &mut self,
        spec: &TableSpec,
        fields: &[String],
        start: NaiveDate,
        end: NaiveDate,
        symbols: Option<&[String]>,
    ) -> Result<Vec<TableData>, StoreError> {
        let empty = || -> Vec<TableData> {
            fields
                .iter()
                .map(|f| MatrixTable::empty(entry_name(&spec.name, f)).into())
                .collect()
        };
        let files = match self.locate(spec, start, end)? {
            Located::Files(files) => files,
            Located::Empty => return Ok(empty()),
        };
        let builder = QueryBuilder::new(spec);
        let date_col = spec
            .date_col
            .as_deref()
            .ok_or_else(|| StoreError::query(&spec.name, "matrix table has no date column"))?;

        let ids = match symbols {
            Some(ids) => ids.to_vec(),
            None => {
                let df = self
                    .session
                    .execute(&spec.name, &builder.distinct_ids(Sources::Files(files.clone())))?;
                string_column(&spec.name, &df, &spec.id_col)?
                    .into_iter()
                    .flatten()
                    .collect()
            }
        };
        if ids.is_empty() {
            return Ok(empty());
        }

        // Months written before a field existed leave it out of every file.
        let sources = Sources::Files(files);
        let available = self.session.source_columns(&spec.name, &sources)?;
        let present: Vec<String> = fields
            .iter()
            .filter(|f| available.contains(f))
            .cloned()
            .collect();
        if present.len() < fields.len() {
            debug!(
                table = %spec.name,
                present = present.len(),
                registered = fields.len(),
                "some fields absent from partitions"
            );
        }

        let query = builder.pivot(sources, start, end, symbols.unwrap_or(&[]), &present)?;
        let long = self.session.execute(&spec.name, &query)?;
        if long.height() == 0 {
            debug!(table = %spec.name, "no rows in range");
            return Ok(empty());
        }
        let df = spread(&spec.name, &long, date_col, &spec.id_col, fields, &ids)?;
        let timeline = date_column(&spec.name, &df, date_col)?;

        let names: Vec<&str> = df
            .get_column_names()
            .into_iter()
            .map(|n| n.as_str())
            .filter(|n| *n != date_col)
            .collect();
        let symbols = recover_identifiers(&names, fields);
        let position: HashMap<&str, usize> = df
            .get_column_names()
            .into_iter()
            .enumerate()
            .map(|(k, n)| (n.as_str(), k))
            .collect();

        let mut out = Vec::with_capacity(fields.len());
        for field in fields {
            let mut values = Matrix::nan(timeline.len(), symbols.len());
            for (j, symbol) in symbols.iter().enumerate() {
                let Some(&k) = position.get(pivot_column(symbol, field).as_str()) else {
                    continue;
                };
                let column = &df.get_columns()[k];
                let cells = numeric_cells(&spec.name, column)?;
                for (i, cell) in cells.into_iter().enumerate() {
                    if let Some(v) = cell {
                        values.set(i, j, v);
                    }
                }
            }
            match spec.fill_policy(field) {
                FillPolicy::Forward => forward_fill_in_place(&mut values),
                FillPolicy::Zero => zero_fill_in_place(&mut values),
                FillPolicy::None => {}
            }
            let table = MatrixTable::new(
                entry_name(&spec.name, field),
                timeline.clone(),
                symbols.clone(),
                values,
            )
            .map_err(|e| StoreError::query(&spec.name, e))?;
            out.push(table.into());
        }
        debug!(
            table = %spec.name,
            dates = timeline.len(),
            symbols = symbols.len(),
            fields = fields.len(),
            "matrix reconstructed"
        );
        Ok(out)
    }

    fn load_mapping(
        &mut self,
        spec: &TableSpec,
        val_col: &str,
        cardinality: Cardinality,
        start: NaiveDate,
        end: NaiveDate,
        symbols: Option<&[String]>,
    ) -> Result<MappingTable, StoreError> {
        let files = match self.locate(spec, start, end)? {
            Located::Files(files) => files,
            Located::Empty => {
                return Ok(MappingTable::from_pairs(&spec.name, Vec::new(), cardinality).0)
            }
        };
        let range = (spec.storage == StorageType::Partition).then_some((start, end));
        let query = QueryBuilder::new(spec).select(Sources::Files(files), val_col, range, symbols);
        let df = self.session.execute(&spec.name, &query)?;

        let keys = string_column(&spec.name, &df, &spec.id_col)?;
        let column = df
            .column(val_col)
            .map_err(|e| StoreError::query(&spec.name, e))?;
        let values = value_cells(&spec.name, column)?;
        let pairs = keys
            .into_iter()
            .zip(values)
            .filter_map(|(k, v)| k.map(|k| (k, v)));

        let (mapping, repeats) = MappingTable::from_pairs(&spec.name, pairs, cardinality);
        if repeats > 0 && cardinality == Cardinality::One {
            warn!(
                table = %spec.name,
                repeats,
                "duplicate keys in a one-to-one mapping, keeping the first value"
            );
        }
        Ok(mapping)
    }

    /// Audit every registered table present on disk.
    ///
    /// A table with no directory or no files is left out, not reported as
    /// an error.
    pub fn storage_metadata(&mut self) -> Result<BTreeMap<String, TableMetadata>, StoreError> {
        let registry = Arc::clone(&self.registry);
        let mut audit = BTreeMap::new();
        for spec in registry.tables() {
            let (path, sources) = match spec.storage {
                StorageType::Snapshot => {
                    let path = self.layout.snapshot_path(&spec.name);
                    if !path.is_file() {
                        debug!(table = %spec.name, "snapshot absent, omitted from audit");
                        continue;
                    }
                    (path.clone(), Sources::Files(vec![path]))
                }
                StorageType::Partition => {
                    let io = |e| StoreError::io(&spec.name, e);
                    let years = self.layout.year_partitions(&spec.name).map_err(io)?;
                    let mut populated = false;
                    for year in years {
                        if !self
                            .layout
                            .partition_files(&spec.name, year)
                            .map_err(io)?
                            .is_empty()
                        {
                            populated = true;
                            break;
                        }
                    }
                    if !populated {
                        debug!(table = %spec.name, "no partitions, omitted from audit");
                        continue;
                    }
                    (
                        self.layout.table_dir(&spec.name),
                        Sources::Glob(self.layout.table_glob(&spec.name)),
                    )
                }
            };

            let df = self
                .session
                .execute(&spec.name, &QueryBuilder::new(spec).metadata(sources))?;
            let row_count = df
                .column(ROW_COUNT_COL)
                .and_then(|c| c.cast(&DataType::UInt64))
                .map_err(|e| StoreError::query(&spec.name, e))?
                .u64()
                .map_err(|e| StoreError::query(&spec.name, e))?
                .get(0)
                .unwrap_or(0);
            let (start_date, end_date) = if spec.date_col.is_some() {
                (
                    date_column(&spec.name, &df, START_DATE_COL)?.first().copied(),
                    date_column(&spec.name, &df, END_DATE_COL)?.first().copied(),
                )
            } else {
                (None, None)
            };

            audit.insert(
                spec.name.clone(),
                TableMetadata {
                    start_date,
                    end_date,
                    row_count,
                    path,
                    storage_type: spec.storage,
                },
            );
        }
        info!(tables = audit.len(), "storage audit complete");
        Ok(audit)
    }

    /// Shut the engine down, closing its session.
    pub fn close(self) {
        self.session.close();
    }
}

/// Container key of one matrix field.
fn entry_name(table: &str, field: &str) -> String {
    format!("{table}_{field}")
}

/// Spread first-value-per-day rows into the wide pivot frame: one row per
/// date, one `{id}_{field}` column per identifier × field.
///
/// Every `(id, field)` pair gets a column, NaN where nothing was observed,
/// including fields the long rows do not carry. Cost is linear in the
/// number of rows plus the size of the output.
fn spread(
    table: &str,
    long: &DataFrame,
    date_col: &str,
    id_col: &str,
    fields: &[String],
    ids: &[String],
) -> Result<DataFrame, StoreError> {
    let err = |e: PolarsError| StoreError::query(table, e);
    let days = long
        .column(date_col)
        .and_then(|c| c.cast(&DataType::Int32))
        .map_err(err)?;
    let days = days.i32().map_err(err)?;
    let keys = string_column(table, long, id_col)?;

    let timeline: Vec<i32> = days
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let row_of: HashMap<i32, usize> = timeline.iter().enumerate().map(|(i, d)| (*d, i)).collect();
    let col_of: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(j, id)| (id.as_str(), j))
        .collect();

    // (row, column) of each long row, `None` when it cannot be placed.
    let slots: Vec<Option<(usize, usize)>> = days
        .into_iter()
        .zip(&keys)
        .map(|(day, key)| {
            let i = row_of.get(&day?)?;
            let j = col_of.get(key.as_deref()?)?;
            Some((*i, *j))
        })
        .collect();

    let rows = timeline.len();
    let date = Column::new(date_col.into(), timeline)
        .cast(&DataType::Date)
        .map_err(err)?;
    let mut columns = Vec::with_capacity(1 + ids.len() * fields.len());
    columns.push(date);
    for field in fields {
        // Column-major grid, one block of `rows` per identifier.
        let mut grid = vec![f64::NAN; rows * ids.len()];
        if let Ok(column) = long.column(field) {
            for (slot, cell) in slots.iter().zip(numeric_cells(table, column)?) {
                if let (Some((i, j)), Some(v)) = (*slot, cell) {
                    grid[j * rows + i] = v;
                }
            }
        }
        for (j, id) in ids.iter().enumerate() {
            let block = grid[j * rows..(j + 1) * rows].to_vec();
            columns.push(Column::new(pivot_column(id, field).into(), block));
        }
    }
    DataFrame::new(columns).map_err(err)
}

/// Identifiers present in pivot output columns.
///
/// A column belongs to identifier `id` when it is exactly `{id}_{first}`
/// for the first requested field. Identifiers may contain the separator
/// themselves, so the name is never split. A candidate is kept only if
/// its columns for every other field are present too, which rules out
/// false matches when one field name ends with another.
pub(crate) fn recover_identifiers(columns: &[&str], fields: &[String]) -> Vec<String> {
    let Some(first) = fields.first() else {
        return Vec::new();
    };
    let suffix = pivot_column("", first);
    let present: BTreeSet<&str> = columns.iter().copied().collect();

    columns
        .iter()
        .filter_map(|c| c.strip_suffix(suffix.as_str()))
        .filter(|id| {
            fields[1..]
                .iter()
                .all(|f| present.contains(pivot_column(id, f).as_str()))
        })
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn string_column(
    table: &str,
    df: &DataFrame,
    name: &str,
) -> Result<Vec<Option<String>>, StoreError> {
    let column = df
        .column(name)
        .and_then(|c| c.cast(&DataType::String))
        .map_err(|e| StoreError::query(table, e))?;
    let ca = column.str().map_err(|e| StoreError::query(table, e))?;
    Ok(ca.into_iter().map(|v| v.map(str::to_string)).collect())
}

fn date_column(table: &str, df: &DataFrame, name: &str) -> Result<Vec<NaiveDate>, StoreError> {
    let column = df
        .column(name)
        .and_then(|c| c.cast(&DataType::Date))
        .map_err(|e| StoreError::query(table, e))?;
    let ca = column.date().map_err(|e| StoreError::query(table, e))?;

    let mut dates = Vec::with_capacity(ca.len());
    for i in 0..ca.len() {
        if let Some(days) = ca.get(i) {
            let date = days_to_date(days)
                .ok_or_else(|| StoreError::query(table, format!("date out of range at row {i}")))?;
            dates.push(date);
        }
    }
    Ok(dates)
}

fn numeric_cells(table: &str, column: &Column) -> Result<Vec<Option<f64>>, StoreError> {
    let column = column
        .cast(&DataType::Float64)
        .map_err(|e| StoreError::query(table, e))?;
    let ca = column.f64().map_err(|e| StoreError::query(table, e))?;
    Ok(ca.into_iter().collect())
}

/// Typed values of a mapping's value column.
fn value_cells(table: &str, column: &Column) -> Result<Vec<Value>, StoreError> {
    let err = |e: PolarsError| StoreError::query(table, e);
    let values = match column.dtype() {
        DataType::Date => {
            let ca = column.date().map_err(err)?;
            (0..ca.len())
                .map(|i| ca.get(i).and_then(days_to_date).map_or(Value::Null, Value::Date))
                .collect()
        }
        DataType::Float32 | DataType::Float64 => {
            let column = column.cast(&DataType::Float64).map_err(err)?;
            column.f64().map_err(err)?.into_iter().map(Value::from).collect()
        }
        DataType::UInt64 => column.u64().map_err(err)?.into_iter().map(Value::from).collect(),
        dtype if dtype.is_integer() => {
            let column = column.cast(&DataType::Int64).map_err(err)?;
            column.i64().map_err(err)?.into_iter().map(Value::from).collect()
        }
        DataType::Boolean => column
            .bool()
            .map_err(err)?
            .into_iter()
            .map(|b| b.map_or(Value::Null, Value::Bool))
            .collect(),
        _ => {
            let column = column.cast(&DataType::String).map_err(err)?;
            column
                .str()
                .map_err(err)?
                .into_iter()
                .map(|s| s.map_or(Value::Null, Value::from))
                .collect()
        }
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn suffix_matching_keeps_separator_in_identifier() {
        let columns = ["A_open", "A_close", "A_open_open", "A_open_close"];
        let ids = recover_identifiers(&columns, &fields(&["open", "close"]));
        assert_eq!(ids, vec!["A".to_string(), "A_open".to_string()]);
    }

    #[test]
    fn suffix_matching_ignores_fields_sharing_a_tail() {
        // "pre_open" ends with "_open"; "X_pre" must not be taken as an identifier.
        let columns = ["X_open", "X_pre_open"];
        let ids = recover_identifiers(&columns, &fields(&["open", "pre_open"]));
        assert_eq!(ids, vec!["X".to_string()]);
    }

    #[test]
    fn spread_places_long_rows_and_pads_absent_fields() {
        // 2024-01-02 and 2024-01-03 as epoch days; "B" only trades on the second.
        let dates = Column::new("trade_date".into(), vec![19724i32, 19724, 19725])
            .cast(&DataType::Date)
            .unwrap();
        let long = DataFrame::new(vec![
            dates,
            Column::new("stock_code".into(), vec!["A", "A_x", "B"]),
            Column::new("close".into(), vec![Some(1.0), None, Some(3.0)]),
        ])
        .unwrap();
        let ids = fields(&["A", "A_x", "B", "C"]);
        let wide = spread("t", &long, "trade_date", "stock_code", &fields(&["open", "close"]), &ids)
            .unwrap();

        assert_eq!(wide.height(), 2);
        assert_eq!(wide.width(), 1 + 4 * 2);
        let close = |name: &str| -> Vec<f64> {
            wide.column(name)
                .unwrap()
                .f64()
                .unwrap()
                .into_no_null_iter()
                .collect()
        };
        assert_eq!(close("A_close")[0], 1.0);
        assert!(close("A_close")[1].is_nan());
        assert!(close("A_x_close").iter().all(|v| v.is_nan()));
        assert!(close("B_close")[0].is_nan());
        assert_eq!(close("B_close")[1], 3.0);
        assert!(close("C_close").iter().all(|v| v.is_nan()));
        assert!(close("A_open").iter().all(|v| v.is_nan()));

        let names: Vec<&str> = wide
            .get_column_names()
            .into_iter()
            .map(|n| n.as_str())
            .filter(|n| *n != "trade_date")
            .collect();
        assert_eq!(recover_identifiers(&names, &fields(&["open", "close"])), ids);
    }

    #[test]
    fn no_fields_recovers_nothing() {
        assert!(recover_identifiers(&["A_open"], &[]).is_empty());
    }

    #[test]
    fn value_cells_follow_column_type() {
        let s = Column::new("n".into(), vec![Some(1u64), None]);
        let v = value_cells("t", &s).unwrap();
        assert_eq!(v, vec![Value::Int(1), Value::Null]);

        let s = Column::new("s".into(), vec![Some("a"), None]);
        assert_eq!(value_cells("t", &s).unwrap(), vec![Value::from("a"), Value::Null]);
    }
}
