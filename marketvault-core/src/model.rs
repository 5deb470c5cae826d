//! Retrieval results: `TableData` and the `MarketDataContainer` that holds them.
//!
//! Everything here is built fresh by one retrieval call and is immutable
//! afterwards. Nothing is cached between calls.

use crate::fill::Matrix;
use crate::registry::Cardinality;
use crate::value::Value;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::Index;
use thiserror::Error;

/// Labels and cells of a matrix do not line up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("matrix is {rows}x{cols} but labels are {dates}x{symbols}")]
    Mismatch {
        rows: usize,
        cols: usize,
        dates: usize,
        symbols: usize,
    },
    #[error("timeline is not strictly ascending at {0}")]
    Timeline(NaiveDate),
    #[error("symbols are not strictly ascending at '{0}'")]
    Symbols(String),
}

/// One field of a time series: dates down, identifiers across.
///
/// Label → position lookups are O(1) through two maps built once here.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixTable {
    name: String,
    timeline: Vec<NaiveDate>,
    symbols: Vec<String>,
    values: Matrix,
    #[serde(skip)]
    date_index: HashMap<NaiveDate, usize>,
    #[serde(skip)]
    symbol_index: HashMap<String, usize>,
}

impl MatrixTable {
    pub fn new(
        name: impl Into<String>,
        timeline: Vec<NaiveDate>,
        symbols: Vec<String>,
        values: Matrix,
    ) -> Result<Self, ShapeError> {
        if values.shape() != (timeline.len(), symbols.len()) {
            return Err(ShapeError::Mismatch {
                rows: values.rows(),
                cols: values.cols(),
                dates: timeline.len(),
                symbols: symbols.len(),
            });
        }
        if let Some(w) = timeline.windows(2).find(|w| w[0] >= w[1]) {
            return Err(ShapeError::Timeline(w[1]));
        }
        if let Some(w) = symbols.windows(2).find(|w| w[0] >= w[1]) {
            return Err(ShapeError::Symbols(w[1].clone()));
        }

        let date_index = timeline.iter().enumerate().map(|(i, d)| (*d, i)).collect();
        let symbol_index = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        Ok(Self {
            name: name.into(),
            timeline,
            symbols,
            values,
            date_index,
            symbol_index,
        })
    }

    /// A 0×0 matrix, the result of a range with no rows.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeline: Vec::new(),
            symbols: Vec::new(),
            values: Matrix::nan(0, 0),
            date_index: HashMap::new(),
            symbol_index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeline(&self) -> &[NaiveDate] {
        &self.timeline
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn values(&self) -> &Matrix {
        &self.values
    }

    /// `(dates, symbols)`
    pub fn shape(&self) -> (usize, usize) {
        self.values.shape()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn date_position(&self, date: NaiveDate) -> Option<usize> {
        self.date_index.get(&date).copied()
    }

    pub fn symbol_position(&self, symbol: &str) -> Option<usize> {
        self.symbol_index.get(symbol).copied()
    }

    /// Cell for `(date, symbol)`; `None` if either label is unknown.
    /// A known but missing cell is `Some(NaN)`.
    pub fn get(&self, date: NaiveDate, symbol: &str) -> Option<f64> {
        self.values
            .get(self.date_position(date)?, self.symbol_position(symbol)?)
    }

    /// Cross-section of every symbol on `date`, in symbol order.
    pub fn row(&self, date: NaiveDate) -> Option<&[f64]> {
        self.values.row(self.date_position(date)?)
    }

    /// Time series of `symbol`, in timeline order.
    pub fn column(&self, symbol: &str) -> Option<Vec<f64>> {
        self.values.column(self.symbol_position(symbol)?)
    }
}

impl PartialEq for MatrixTable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.timeline == other.timeline
            && self.symbols == other.symbols
            && self.values.same_cells(&other.values)
    }
}

/// Key → value lookup, scalar or list per key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MappingData {
    OneToOne(BTreeMap<String, Value>),
    OneToMany(BTreeMap<String, Vec<Value>>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingTable {
    name: String,
    data: MappingData,
}

impl MappingTable {
    /// Group `(key, value)` pairs, in order, under `cardinality`.
    ///
    /// Returns the table and the number of pairs whose key had already
    /// been seen. Under [`Cardinality::Auto`] any repeat switches the whole
    /// table to lists; under [`Cardinality::One`] repeats are dropped.
    pub fn from_pairs<I>(name: impl Into<String>, pairs: I, cardinality: Cardinality) -> (Self, usize)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut repeats = 0;
        for (key, value) in pairs {
            let values = grouped.entry(key).or_default();
            if !values.is_empty() {
                repeats += 1;
            }
            values.push(value);
        }

        let lists = match cardinality {
            Cardinality::Many => true,
            Cardinality::One => false,
            Cardinality::Auto => repeats > 0,
        };
        let data = if lists {
            MappingData::OneToMany(grouped)
        } else {
            MappingData::OneToOne(
                grouped
                    .into_iter()
                    .filter_map(|(k, vs)| vs.into_iter().next().map(|v| (k, v)))
                    .collect(),
            )
        };
        (
            Self {
                name: name.into(),
                data,
            },
            repeats,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &MappingData {
        &self.data
    }

    pub fn is_one_to_many(&self) -> bool {
        matches!(self.data, MappingData::OneToMany(_))
    }

    /// Scalar for `key`. On a one-to-many table this is the first value.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        match &self.data {
            MappingData::OneToOne(m) => m.get(key),
            MappingData::OneToMany(m) => m.get(key).and_then(|vs| vs.first()),
        }
    }

    pub fn get_value_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.get_value(key).unwrap_or(default)
    }

    /// Every value for `key`. Scalars come back as one-element lists and
    /// an unknown key as an empty list.
    pub fn get_list(&self, key: &str) -> Vec<&Value> {
        match &self.data {
            MappingData::OneToOne(m) => m.get(key).into_iter().collect(),
            MappingData::OneToMany(m) => m.get(key).map(|vs| vs.iter().collect()).unwrap_or_default(),
        }
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> Vec<&str> {
        match &self.data {
            MappingData::OneToOne(m) => m.keys().map(String::as_str).collect(),
            MappingData::OneToMany(m) => m.keys().map(String::as_str).collect(),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        match &self.data {
            MappingData::OneToOne(m) => m.contains_key(key),
            MappingData::OneToMany(m) => m.contains_key(key),
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            MappingData::OneToOne(m) => m.len(),
            MappingData::OneToMany(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TableData {
    Matrix(MatrixTable),
    Mapping(MappingTable),
}

impl TableData {
    pub fn name(&self) -> &str {
        match self {
            TableData::Matrix(m) => m.name(),
            TableData::Mapping(m) => m.name(),
        }
    }

    pub fn as_matrix(&self) -> Option<&MatrixTable> {
        match self {
            TableData::Matrix(m) => Some(m),
            TableData::Mapping(_) => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&MappingTable> {
        match self {
            TableData::Mapping(m) => Some(m),
            TableData::Matrix(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TableData::Matrix(m) => m.is_empty(),
            TableData::Mapping(m) => m.is_empty(),
        }
    }
}

impl From<MatrixTable> for TableData {
    fn from(m: MatrixTable) -> Self {
        TableData::Matrix(m)
    }
}

impl From<MappingTable> for TableData {
    fn from(m: MappingTable) -> Self {
        TableData::Mapping(m)
    }
}

/// Display name → `TableData` for one retrieval call.
///
/// Matrix fields are named `{table}_{field}`, mappings `{table}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MarketDataContainer {
    tables: HashMap<String, TableData>,
}

impl MarketDataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under the data's own name, returning what it replaced.
    pub fn insert(&mut self, data: impl Into<TableData>) -> Option<TableData> {
        let data = data.into();
        self.tables.insert(data.name().to_string(), data)
    }

    pub fn get(&self, name: &str) -> Option<&TableData> {
        self.tables.get(name)
    }

    pub fn matrix(&self, name: &str) -> Option<&MatrixTable> {
        self.get(name).and_then(TableData::as_matrix)
    }

    pub fn mapping(&self, name: &str) -> Option<&MappingTable> {
        self.get(name).and_then(TableData::as_mapping)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Names in ascending order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableData)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Index<&str> for MarketDataContainer {
    type Output = TableData;

    /// Panics if `name` is absent, like `HashMap` indexing.
    fn index(&self, name: &str) -> &TableData {
        &self.tables[name]
    }
}

impl IntoIterator for MarketDataContainer {
    type Item = (String, TableData);
    type IntoIter = std::collections::hash_map::IntoIter<String, TableData>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}
