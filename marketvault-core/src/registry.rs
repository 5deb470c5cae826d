//! Schema registry: table name → physical layout and load behavior.
//!
//! Entries are configuration, loaded once at startup (built-in or TOML)
//! and validated against the field type catalog before any engine sees
//! them. Nothing downstream branches on table names; everything it needs
//! to know about a table is in its [`TableSpec`].

use crate::error::{RegistryError, StoreError};
use crate::schema::{FieldCatalog, FieldType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Where a table's rows live on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// `{table}/year={Y}/{Y}-{MM}.parquet`
    Partition,
    /// `{table}/{table}.parquet`
    Snapshot,
}

impl StorageType {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageType::Partition => "partition",
            StorageType::Snapshot => "snapshot",
        }
    }
}

/// How a mapping table decides between scalar and list values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// Inferred per query: lists if any key repeats, scalars otherwise.
    #[default]
    Auto,
    /// Always scalars; the first value per key wins.
    One,
    /// Always lists.
    Many,
}

/// How a table is reconstructed on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LoadMode {
    /// One time × identifier matrix per field.
    Matrix {
        fields: Vec<String>,
        #[serde(default)]
        ffill_cols: Vec<String>,
        #[serde(default)]
        zerofill_cols: Vec<String>,
    },
    /// Identifier → value lookup.
    Mapping {
        val_col: String,
        #[serde(default)]
        cardinality: Cardinality,
    },
}

/// Missing-value rule applied to one matrix field after reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    None,
    Forward,
    Zero,
}

/// A validated registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    #[serde(skip)]
    pub name: String,
    pub storage: StorageType,
    pub id_col: String,
    #[serde(default)]
    pub date_col: Option<String>,
    pub load: LoadMode,
}

impl TableSpec {
    /// Every column this entry mentions, id first.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = vec![self.id_col.as_str()];
        if let Some(d) = &self.date_col {
            cols.push(d.as_str());
        }
        match &self.load {
            LoadMode::Matrix {
                fields,
                ffill_cols,
                zerofill_cols,
            } => {
                cols.extend(fields.iter().map(String::as_str));
                cols.extend(ffill_cols.iter().map(String::as_str));
                cols.extend(zerofill_cols.iter().map(String::as_str));
            }
            LoadMode::Mapping { val_col, .. } => cols.push(val_col.as_str()),
        }
        cols
    }

    /// Fill rule for a matrix field. Zero-fill wins if a field is listed twice.
    pub fn fill_policy(&self, field: &str) -> FillPolicy {
        match &self.load {
            LoadMode::Matrix {
                ffill_cols,
                zerofill_cols,
                ..
            } => {
                if zerofill_cols.iter().any(|c| c == field) {
                    FillPolicy::Zero
                } else if ffill_cols.iter().any(|c| c == field) {
                    FillPolicy::Forward
                } else {
                    FillPolicy::None
                }
            }
            LoadMode::Mapping { .. } => FillPolicy::None,
        }
    }

    fn validate(&self, catalog: &FieldCatalog) -> Result<(), RegistryError> {
        for column in self.columns() {
            if !catalog.contains(column) {
                return Err(RegistryError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.to_string(),
                });
            }
        }
        if let LoadMode::Matrix {
            fields,
            ffill_cols,
            zerofill_cols,
        } = &self.load
        {
            if fields.is_empty() {
                return Err(RegistryError::NoFields {
                    table: self.name.clone(),
                });
            }
            if self.date_col.is_none() {
                return Err(RegistryError::MissingDateColumn {
                    table: self.name.clone(),
                });
            }
            for column in ffill_cols.iter().chain(zerofill_cols) {
                if !fields.contains(column) {
                    return Err(RegistryError::FillColumnNotField {
                        table: self.name.clone(),
                        column: column.clone(),
                    });
                }
            }
            for field in fields {
                let dtype = catalog.get(field).unwrap_or(FieldType::Varchar);
                if !dtype.is_numeric() {
                    return Err(RegistryError::NonNumericField {
                        table: self.name.clone(),
                        column: field.clone(),
                        dtype: dtype.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// On-disk shape of a registry file.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    fields: FieldCatalog,
    #[serde(default)]
    tables: BTreeMap<String, TableSpec>,
}

/// The process-wide table registry plus its field type catalog.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    catalog: FieldCatalog,
    tables: BTreeMap<String, TableSpec>,
}

impl SchemaRegistry {
    /// Validate `tables` against `catalog` and build the registry.
    pub fn new(catalog: FieldCatalog, tables: Vec<TableSpec>) -> Result<Self, RegistryError> {
        let mut by_name = BTreeMap::new();
        for spec in tables {
            spec.validate(&catalog)?;
            if by_name.contains_key(&spec.name) {
                return Err(RegistryError::DuplicateTable { table: spec.name });
            }
            by_name.insert(spec.name.clone(), spec);
        }
        Ok(Self {
            catalog,
            tables: by_name,
        })
    }

    /// Parse a TOML registry: a `[fields]` catalog plus `[tables.<name>]` entries.
    pub fn from_toml_str(content: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile =
            toml::from_str(content).map_err(|e| RegistryError::Parse(e.to_string()))?;
        let tables = file
            .tables
            .into_iter()
            .map(|(name, mut spec)| {
                spec.name = name;
                spec
            })
            .collect();
        Self::new(file.fields, tables)
    }

    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The tables shipped by default: A-share daily bars, sector index bars,
    /// the stock name snapshot, and the sector membership snapshot.
    pub fn builtin() -> Self {
        let matrix = |fields: &[&str], ffill: &[&str], zerofill: &[&str]| LoadMode::Matrix {
            fields: fields.iter().map(|s| s.to_string()).collect(),
            ffill_cols: ffill.iter().map(|s| s.to_string()).collect(),
            zerofill_cols: zerofill.iter().map(|s| s.to_string()).collect(),
        };
        let tables = vec![
            TableSpec {
                name: "cn_stock_em_daily_adj".into(),
                storage: StorageType::Partition,
                id_col: "stock_code".into(),
                date_col: Some("trade_date".into()),
                load: matrix(
                    &[
                        "open",
                        "close",
                        "high",
                        "low",
                        "volume",
                        "amount",
                        "pct_change",
                        "turnover",
                    ],
                    &["open", "close", "high", "low"],
                    &["volume", "amount", "pct_change", "turnover"],
                ),
            },
            TableSpec {
                name: "cn_sector_em_daily".into(),
                storage: StorageType::Partition,
                id_col: "sector_name".into(),
                date_col: Some("trade_date".into()),
                load: matrix(
                    &[
                        "open",
                        "close",
                        "high",
                        "low",
                        "volume",
                        "amount",
                        "amplitude",
                        "pct_change",
                        "change_amount",
                        "turnover",
                    ],
                    &["open", "close", "high", "low"],
                    &[
                        "volume",
                        "amount",
                        "amplitude",
                        "pct_change",
                        "change_amount",
                        "turnover",
                    ],
                ),
            },
            TableSpec {
                name: "cn_stock_em".into(),
                storage: StorageType::Snapshot,
                id_col: "stock_code".into(),
                date_col: None,
                load: LoadMode::Mapping {
                    val_col: "stock_name".into(),
                    cardinality: Cardinality::One,
                },
            },
            TableSpec {
                name: "cn_stock_sector_map".into(),
                storage: StorageType::Snapshot,
                id_col: "sector_name".into(),
                date_col: None,
                load: LoadMode::Mapping {
                    val_col: "stock_code".into(),
                    cardinality: Cardinality::Auto,
                },
            },
        ];
        let catalog = FieldCatalog::builtin();
        debug_assert!(
            tables.iter().all(|t| t.validate(&catalog).is_ok()),
            "built-in registry is inconsistent"
        );
        Self {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
            catalog,
        }
    }

    /// Look a table up, `None` if unregistered.
    pub fn get(&self, table: &str) -> Option<&TableSpec> {
        self.tables.get(table)
    }

    /// Look a table up, failing with `TableNotRegistered`.
    pub fn resolve(&self, table: &str) -> Result<&TableSpec, StoreError> {
        self.get(table).ok_or_else(|| StoreError::TableNotRegistered {
            table: table.to_string(),
        })
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tables_resolve() {
        let registry = SchemaRegistry::builtin();
        let daily = registry.resolve("cn_stock_em_daily_adj").unwrap();
        assert_eq!(daily.storage, StorageType::Partition);
        assert_eq!(daily.id_col, "stock_code");
        assert_eq!(daily.fill_policy("close"), FillPolicy::Forward);
        assert_eq!(daily.fill_policy("volume"), FillPolicy::Zero);

        let names = registry.resolve("cn_stock_em").unwrap();
        assert_eq!(names.storage, StorageType::Snapshot);
        assert!(names.date_col.is_none());
    }

    #[test]
    fn builtin_tables_pass_validation() {
        let builtin = SchemaRegistry::builtin();
        let tables: Vec<TableSpec> = builtin.tables().cloned().collect();
        let rebuilt = SchemaRegistry::new(FieldCatalog::builtin(), tables).unwrap();
        assert_eq!(
            rebuilt.table_names().collect::<Vec<_>>(),
            builtin.table_names().collect::<Vec<_>>()
        );
    }

    #[test]
    fn unknown_table_is_not_registered() {
        let registry = SchemaRegistry::builtin();
        assert!(registry.get("nope").is_none());
        assert!(matches!(
            registry.resolve("nope"),
            Err(StoreError::TableNotRegistered { .. })
        ));
    }

    #[test]
    fn toml_registry_parses_and_validates() {
        let registry = SchemaRegistry::from_toml_str(
            r#"
            [fields]
            trade_date = "DATE"
            code = "VARCHAR"
            name = "VARCHAR"
            px = "DOUBLE"
            vol = "UBIGINT"

            [tables.bars]
            storage = "partition"
            id_col = "code"
            date_col = "trade_date"
            load = { mode = "matrix", fields = ["px", "vol"], ffill_cols = ["px"], zerofill_cols = ["vol"] }

            [tables.names]
            storage = "snapshot"
            id_col = "code"
            load = { mode = "mapping", val_col = "name", cardinality = "one" }
            "#,
        )
        .unwrap();

        let bars = registry.resolve("bars").unwrap();
        assert_eq!(bars.name, "bars");
        assert_eq!(bars.fill_policy("vol"), FillPolicy::Zero);
        let names = registry.resolve("names").unwrap();
        assert_eq!(
            names.load,
            LoadMode::Mapping {
                val_col: "name".into(),
                cardinality: Cardinality::One
            }
        );
    }

    #[test]
    fn entry_with_uncatalogued_column_is_rejected() {
        let result = SchemaRegistry::from_toml_str(
            r#"
            [fields]
            code = "VARCHAR"
            [tables.t]
            storage = "snapshot"
            id_col = "code"
            load = { mode = "mapping", val_col = "missing" }
            "#,
        );
        assert!(matches!(
            result,
            Err(RegistryError::UnknownColumn { ref column, .. }) if column == "missing"
        ));
    }

    #[test]
    fn fill_column_outside_fields_is_rejected() {
        let catalog = FieldCatalog::new()
            .with("code", FieldType::Varchar)
            .with("a", FieldType::Double)
            .with("b", FieldType::Double);
        let spec = TableSpec {
            name: "t".into(),
            storage: StorageType::Partition,
            id_col: "code".into(),
            date_col: Some("code".into()),
            load: LoadMode::Matrix {
                fields: vec!["a".into()],
                ffill_cols: vec!["b".into()],
                zerofill_cols: vec![],
            },
        };
        assert!(matches!(
            SchemaRegistry::new(catalog, vec![spec]),
            Err(RegistryError::FillColumnNotField { .. })
        ));
    }

    #[test]
    fn text_matrix_field_is_rejected() {
        let catalog = FieldCatalog::new()
            .with("code", FieldType::Varchar)
            .with("label", FieldType::Varchar);
        let spec = TableSpec {
            name: "t".into(),
            storage: StorageType::Partition,
            id_col: "code".into(),
            date_col: Some("code".into()),
            load: LoadMode::Matrix {
                fields: vec!["label".into()],
                ffill_cols: vec![],
                zerofill_cols: vec![],
            },
        };
        assert!(matches!(
            SchemaRegistry::new(catalog, vec![spec]),
            Err(RegistryError::NonNumericField { .. })
        ));
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let catalog = FieldCatalog::new()
            .with("code", FieldType::Varchar)
            .with("name", FieldType::Varchar);
        let spec = TableSpec {
            name: "t".into(),
            storage: StorageType::Snapshot,
            id_col: "code".into(),
            date_col: None,
            load: LoadMode::Mapping {
                val_col: "name".into(),
                cardinality: Cardinality::Auto,
            },
        };
        assert!(matches!(
            SchemaRegistry::new(catalog, vec![spec.clone(), spec]),
            Err(RegistryError::DuplicateTable { .. })
        ));
    }
}
