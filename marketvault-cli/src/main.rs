//! MarketVault CLI: storage audit, retrieval, and import commands.
//!
//! Commands:
//! - `tables`: list the registered tables and how they load
//! - `meta`: audit what is on disk (date range, row count, path)
//! - `load`: run a retrieval and summarize each returned entry
//! - `import`: write a headered CSV file as a month partition or a snapshot

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use marketvault_core::data::{FetchError, Fetcher, MonthKey, StorageWriter};
use marketvault_core::value::{parse_date, Row, Value};
use marketvault_core::{
    FieldType, LoadMode, RetrievalEngine, SchemaRegistry, Session, StoreConfig, TableData,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "marketvault",
    about = "MarketVault: Parquet-backed market data store"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory; overrides the config file and MARKETVAULT_DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered tables.
    Tables,
    /// Audit stored tables: date range, row count, and location.
    Meta {
        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Load tables over a date range and summarize the result.
    Load {
        /// Tables to load (e.g., cn_stock_em_daily_adj cn_stock_em).
        #[arg(required = true)]
        tables: Vec<String>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// Restrict to these identifiers (comma separated).
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Print the full result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Import a CSV file into a table.
    Import {
        /// Headered CSV file; header names must be catalog fields.
        file: PathBuf,

        /// Target table.
        #[arg(long)]
        table: String,

        /// Partition month as YYYYMM. Omit for snapshot tables.
        #[arg(long, conflicts_with_all = ["year", "month"])]
        period: Option<String>,

        /// Partition year (with --month).
        #[arg(long, requires = "month")]
        year: Option<i32>,

        /// Partition month 1-12 (with --year).
        #[arg(long, requires = "year")]
        month: Option<u32>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = StoreConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    init_logging(&config.log_level)?;

    let registry = Arc::new(config.load_registry()?);
    let layout = config.layout();
    let mut engine = RetrievalEngine::new(Session::open(), Arc::clone(&registry), layout.clone());

    let result = match cli.command {
        Commands::Tables => {
            print_tables(&registry);
            Ok(())
        }
        Commands::Meta { json } => run_meta(&mut engine, json),
        Commands::Load {
            tables,
            start,
            end,
            symbols,
            json,
        } => run_load(&mut engine, &tables, &start, &end, &symbols, json),
        Commands::Import {
            file,
            table,
            period,
            year,
            month,
        } => {
            let writer = StorageWriter::new(layout, Arc::clone(&registry));
            let month = match (period, year, month) {
                (Some(p), _, _) => Some(p.parse::<MonthKey>()?),
                (None, Some(y), Some(m)) => Some(
                    MonthKey::new(y, m).ok_or_else(|| anyhow!("invalid partition {y}-{m:02}"))?,
                ),
                _ => None,
            };
            run_import(&writer, &registry, &file, &table, month)
        }
    };

    engine.close();
    result
}

/// `RUST_LOG` wins; otherwise the configured level.
fn init_logging(default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}

fn parse_day(s: &str) -> Result<NaiveDate> {
    parse_date(s).with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn print_tables(registry: &SchemaRegistry) {
    println!(
        "{:<24} {:<10} {:<8} {:<14} {}",
        "Table", "Storage", "Mode", "Id", "Columns"
    );
    println!("{}", "-".repeat(80));
    for spec in registry.tables() {
        let (mode, cols) = match &spec.load {
            LoadMode::Matrix { fields, .. } => ("matrix", fields.join(",")),
            LoadMode::Mapping { val_col, .. } => ("mapping", val_col.clone()),
        };
        println!(
            "{:<24} {:<10} {:<8} {:<14} {}",
            spec.name,
            spec.storage.as_str(),
            mode,
            spec.id_col,
            cols
        );
    }
}

fn run_meta(engine: &mut RetrievalEngine, json: bool) -> Result<()> {
    let audit = engine.storage_metadata()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&audit)?);
        return Ok(());
    }
    if audit.is_empty() {
        println!("No tables on disk under {}", engine.layout().root().display());
        return Ok(());
    }

    let show = |d: Option<NaiveDate>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
    println!(
        "{:<24} {:<10} {:<12} {:<12} {:>10}  {}",
        "Table", "Storage", "Start", "End", "Rows", "Path"
    );
    println!("{}", "-".repeat(100));
    for (name, meta) in &audit {
        println!(
            "{:<24} {:<10} {:<12} {:<12} {:>10}  {}",
            name,
            meta.storage_type.as_str(),
            show(meta.start_date),
            show(meta.end_date),
            meta.row_count,
            meta.path.display()
        );
    }
    Ok(())
}

fn run_load(
    engine: &mut RetrievalEngine,
    tables: &[String],
    start: &str,
    end: &str,
    symbols: &[String],
    json: bool,
) -> Result<()> {
    let start = parse_day(start)?;
    let end = parse_day(end)?;
    let names: Vec<&str> = tables.iter().map(String::as_str).collect();
    let symbols = (!symbols.is_empty()).then_some(symbols);

    let container = engine.load_market_data(&names, start, end, symbols)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&container)?);
        return Ok(());
    }

    for name in container.names() {
        match &container[name] {
            TableData::Matrix(m) => {
                let (dates, ids) = m.shape();
                let span = match (m.timeline().first(), m.timeline().last()) {
                    (Some(a), Some(b)) => format!("{a} to {b}"),
                    _ => "empty".to_string(),
                };
                println!(
                    "{name:<36} matrix  {dates} dates x {ids} ids  ({span}, {} missing)",
                    m.values().count_missing()
                );
            }
            TableData::Mapping(m) => {
                let shape = if m.is_one_to_many() { "1:many" } else { "1:1" };
                println!("{name:<36} mapping {} keys ({shape})", m.len());
            }
        }
    }
    Ok(())
}

/// A CSV file served through the `Fetcher` seam, typed by the catalog.
struct CsvFetcher {
    table: String,
    rows: Vec<Row>,
}

impl CsvFetcher {
    fn open(path: &Path, table: &str, registry: &SchemaRegistry) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let types: Vec<Option<FieldType>> =
            headers.iter().map(|h| registry.catalog().get(h)).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row: Row = headers
                .iter()
                .zip(&types)
                .zip(record.iter())
                .map(|((name, dtype), raw)| (name.clone(), cell_value(raw, *dtype)))
                .collect();
            rows.push(row);
        }
        info!(file = %path.display(), rows = rows.len(), "csv read");
        Ok(Self {
            table: table.to_string(),
            rows,
        })
    }

    fn serve(&self, table: &str) -> Result<Vec<Row>, FetchError> {
        if table != self.table {
            return Err(FetchError::UnsupportedTable {
                table: table.to_string(),
            });
        }
        Ok(self.rows.clone())
    }
}

impl Fetcher for CsvFetcher {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch_month(&self, table: &str, _year: i32, _month: u32) -> Result<Vec<Row>, FetchError> {
        self.serve(table)
    }

    fn fetch_snapshot(&self, table: &str) -> Result<Vec<Row>, FetchError> {
        self.serve(table)
    }
}

/// Text columns stay text (codes keep their leading zeros); anything else
/// is read as an integer, then a float, then left as a string.
fn cell_value(raw: &str, dtype: Option<FieldType>) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    if matches!(dtype, Some(FieldType::Varchar | FieldType::Date)) {
        return Value::from(raw);
    }
    if let Ok(n) = raw.parse::<i64>() {
        Value::Int(n)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::from(raw)
    }
}

fn run_import(
    writer: &StorageWriter,
    registry: &SchemaRegistry,
    file: &Path,
    table: &str,
    month: Option<MonthKey>,
) -> Result<()> {
    let fetcher = CsvFetcher::open(file, table, registry)?;
    let outcome = match month {
        Some(key) => writer.ingest_month(&fetcher, table, key.year, key.month)?,
        None => {
            let spec = registry.resolve(table)?;
            if spec.storage != marketvault_core::StorageType::Snapshot {
                bail!("table '{table}' is partitioned; pass --period YYYYMM or --year/--month");
            }
            writer.ingest_snapshot(&fetcher, table)?
        }
    };

    match outcome {
        Some(out) => println!("Wrote {} rows to {}", out.rows, out.path.display()),
        None => println!("Nothing to write: {} has no data rows", file.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_follow_catalog_type() {
        assert_eq!(cell_value("000001", Some(FieldType::Varchar)), Value::from("000001"));
        assert_eq!(cell_value("000001", None), Value::Int(1));
        assert_eq!(cell_value("10.5", Some(FieldType::Double)), Value::Float(10.5));
        assert_eq!(cell_value("  ", Some(FieldType::Double)), Value::Null);
        assert_eq!(cell_value("n/a", Some(FieldType::UBigInt)), Value::from("n/a"));
    }

    #[test]
    fn csv_import_writes_partition() {
        let tmp = tempfile::tempdir().unwrap();
        let csv_path = tmp.path().join("bars.csv");
        std::fs::write(
            &csv_path,
            "trade_date,stock_code,close,volume\n2024-01-02,000001,10.5,1000\n2024-01-03,000001,10.7,1200\n",
        )
        .unwrap();

        let registry = Arc::new(SchemaRegistry::builtin());
        let layout = marketvault_core::StorageLayout::new(tmp.path().join("data"));
        let writer = StorageWriter::new(layout.clone(), Arc::clone(&registry));
        run_import(
            &writer,
            &registry,
            &csv_path,
            "cn_stock_em_daily_adj",
            Some(MonthKey::new(2024, 1).unwrap()),
        )
        .unwrap();
        assert!(layout.partition_path("cn_stock_em_daily_adj", 2024, 1).is_file());
    }

    #[test]
    fn snapshot_import_rejects_partitioned_table() {
        let tmp = tempfile::tempdir().unwrap();
        let csv_path = tmp.path().join("names.csv");
        std::fs::write(&csv_path, "stock_code,stock_name\n000001,PingAn\n").unwrap();

        let registry = Arc::new(SchemaRegistry::builtin());
        let writer = StorageWriter::new(
            marketvault_core::StorageLayout::new(tmp.path()),
            Arc::clone(&registry),
        );
        assert!(run_import(&writer, &registry, &csv_path, "cn_stock_em_daily_adj", None).is_err());
        run_import(&writer, &registry, &csv_path, "cn_stock_em", None).unwrap();
    }
}
