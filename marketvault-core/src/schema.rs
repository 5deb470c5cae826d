//! Field type catalog: the physical contract shared by every producer of a table.
//!
//! Every column that may ever be persisted is declared here with its
//! physical type. The writer casts to these types and refuses any column
//! that is not listed; the registry refuses entries that mention one.

use polars::prelude::DataType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Physical column types, named after their SQL equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Date,
    Varchar,
    Double,
    /// Unsigned 64-bit counter (volume and the like).
    #[serde(alias = "UINT64")]
    UBigInt,
}

impl FieldType {
    /// The Polars dtype a column of this type is stored as.
    pub fn dtype(self) -> DataType {
        match self {
            FieldType::Date => DataType::Date,
            FieldType::Varchar => DataType::String,
            FieldType::Double => DataType::Float64,
            FieldType::UBigInt => DataType::UInt64,
        }
    }

    /// Whether values of this type can populate a numeric matrix.
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Double | FieldType::UBigInt)
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            FieldType::Date => "DATE",
            FieldType::Varchar => "VARCHAR",
            FieldType::Double => "DOUBLE",
            FieldType::UBigInt => "UBIGINT",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// Column name → physical type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldCatalog {
    fields: BTreeMap<String, FieldType>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, dtype: FieldType) -> Self {
        self.fields.insert(name.into(), dtype);
        self
    }

    pub fn get(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// The columns shipped with the built-in registry.
    pub fn builtin() -> Self {
        use FieldType::*;
        Self::new()
            .with("trade_date", Date)
            .with("stock_code", Varchar)
            .with("stock_name", Varchar)
            .with("sector_name", Varchar)
            .with("open", Double)
            .with("close", Double)
            .with("high", Double)
            .with("low", Double)
            .with("volume", UBigInt)
            .with("amount", Double)
            .with("amplitude", Double)
            .with("pct_change", Double)
            .with("change_amount", Double)
            .with("turnover", Double)
            .with("outstanding_share", Double)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_types() {
        let catalog = FieldCatalog::builtin();
        assert_eq!(catalog.get("trade_date"), Some(FieldType::Date));
        assert_eq!(catalog.get("volume"), Some(FieldType::UBigInt));
        assert_eq!(catalog.get("stock_name"), Some(FieldType::Varchar));
        assert_eq!(catalog.get("close"), Some(FieldType::Double));
        assert!(!catalog.contains("bogus"));
    }

    #[test]
    fn dtype_mapping() {
        assert_eq!(FieldType::Date.dtype(), DataType::Date);
        assert_eq!(FieldType::Varchar.dtype(), DataType::String);
        assert_eq!(FieldType::UBigInt.dtype(), DataType::UInt64);
        assert!(FieldType::Double.is_numeric());
        assert!(!FieldType::Varchar.is_numeric());
    }

    #[test]
    fn catalog_deserializes_from_toml_table() {
        let catalog: FieldCatalog = toml::from_str(
            r#"
            trade_date = "DATE"
            code = "VARCHAR"
            vol = "UBIGINT"
            "#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get("vol"), Some(FieldType::UBigInt));
    }
}
