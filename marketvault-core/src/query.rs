//! SQL generation for the three read paths: pivot, select, and metadata.
//!
//! Pure text builders. Every statement reads from [`SOURCE_RELATION`];
//! the session binds that name to the Parquet sources listed in the
//! [`Query`] before executing it.

use crate::error::StoreError;
use crate::registry::{LoadMode, TableSpec};
use chrono::NaiveDate;
use std::path::PathBuf;

/// Relation name every generated statement selects from.
pub const SOURCE_RELATION: &str = "src";

/// Joins identifier and field in pivot result column names.
pub const PIVOT_SEPARATOR: char = '_';

pub const START_DATE_COL: &str = "start_date";
pub const END_DATE_COL: &str = "end_date";
pub const ROW_COUNT_COL: &str = "row_count";

/// What the session should scan before running `sql`.
#[derive(Debug, Clone, PartialEq)]
pub enum Sources {
    /// Explicit Parquet files (one per month partition, or the snapshot file).
    Files(Vec<PathBuf>),
    /// A single glob pattern, expanded by the scan itself.
    Glob(PathBuf),
}

/// A statement plus the sources it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sources: Sources,
    pub sql: String,
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn date_literal(date: NaiveDate) -> String {
    format!("CAST('{}' AS DATE)", date.format("%Y-%m-%d"))
}

/// Column name the pivot gives to `(identifier, field)`.
pub(crate) fn pivot_column(id: &str, field: &str) -> String {
    format!("{id}{PIVOT_SEPARATOR}{field}")
}

/// `col = 'x'` for one value, `col IN ('x', 'y')` for several.
fn membership(column: &str, values: &[String]) -> String {
    let column = quote_ident(column);
    match values {
        [single] => format!("{column} = {}", quote_literal(single)),
        _ => {
            let list: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
            format!("{column} IN ({})", list.join(", "))
        }
    }
}

/// Builds statements for one registered table.
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    spec: &'a TableSpec,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(spec: &'a TableSpec) -> Self {
        Self { spec }
    }

    fn date_col(&self) -> Result<&'a str, StoreError> {
        self.spec
            .date_col
            .as_deref()
            .ok_or_else(|| StoreError::query(&self.spec.name, "table has no date column"))
    }

    fn fields(&self) -> Result<&'a [String], StoreError> {
        match &self.spec.load {
            LoadMode::Matrix { fields, .. } => Ok(fields),
            LoadMode::Mapping { .. } => Err(StoreError::query(
                &self.spec.name,
                "pivot requested on a mapping table",
            )),
        }
    }

    /// Every identifier present in the scanned sources, sorted.
    pub fn distinct_ids(&self, sources: Sources) -> Query {
        let id = quote_ident(&self.spec.id_col);
        Query {
            sources,
            sql: format!("SELECT DISTINCT {id} FROM {SOURCE_RELATION} ORDER BY {id}"),
        }
    }

    /// Pivot input: the first row per date × identifier within
    /// `[start, end]`, one column per requested field, ordered by date then
    /// identifier.
    ///
    /// `fields` is the subset of the table's fields present in the sources.
    /// The engine spreads these rows into one `{id}_{field}` column per
    /// identifier × field.
    pub fn pivot(
        &self,
        sources: Sources,
        start: NaiveDate,
        end: NaiveDate,
        ids: &[String],
        fields: &[String],
    ) -> Result<Query, StoreError> {
        // Mapping tables have no pivot.
        self.fields()?;
        let date = quote_ident(self.date_col()?);
        let id = quote_ident(&self.spec.id_col);

        let mut projection = vec![date.clone(), id.clone()];
        projection.extend(fields.iter().map(|f| {
            let f = quote_ident(f);
            format!("FIRST({f}) AS {f}")
        }));

        let mut filters = vec![
            format!("{date} >= {}", date_literal(start)),
            format!("{date} <= {}", date_literal(end)),
        ];
        if !ids.is_empty() {
            filters.push(membership(&self.spec.id_col, ids));
        }

        let sql = format!(
            "SELECT {projection} FROM {SOURCE_RELATION} WHERE {filters} \
             GROUP BY {date}, {id} ORDER BY {date}, {id}",
            projection = projection.join(", "),
            filters = filters.join(" AND "),
        );
        Ok(Query { sources, sql })
    }

    /// Projection of identifier and value columns for mapping tables.
    ///
    /// `date_range` bounds partitioned tables; snapshots pass `None`.
    pub fn select(
        &self,
        sources: Sources,
        val_col: &str,
        date_range: Option<(NaiveDate, NaiveDate)>,
        ids: Option<&[String]>,
    ) -> Query {
        let mut filters = Vec::new();
        if let (Some((start, end)), Some(date)) = (date_range, self.spec.date_col.as_deref()) {
            let date = quote_ident(date);
            filters.push(format!("{date} >= {}", date_literal(start)));
            filters.push(format!("{date} <= {}", date_literal(end)));
        }
        if let Some(ids) = ids.filter(|ids| !ids.is_empty()) {
            filters.push(membership(&self.spec.id_col, ids));
        }
        let mut sql = format!(
            "SELECT {}, {} FROM {SOURCE_RELATION}",
            quote_ident(&self.spec.id_col),
            quote_ident(val_col)
        );
        if !filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filters.join(" AND "));
        }
        Query { sources, sql }
    }

    /// `(start_date, end_date, row_count)`; the dates are omitted for
    /// tables with no date column.
    pub fn metadata(&self, sources: Sources) -> Query {
        let sql = match self.spec.date_col.as_deref() {
            Some(date) => {
                let date = quote_ident(date);
                format!(
                    "SELECT MIN({date}) AS {START_DATE_COL}, MAX({date}) AS {END_DATE_COL}, \
                     COUNT(*) AS {ROW_COUNT_COL} FROM {SOURCE_RELATION}"
                )
            }
            None => format!("SELECT COUNT(*) AS {ROW_COUNT_COL} FROM {SOURCE_RELATION}"),
        };
        Query { sources, sql }
    }
}
