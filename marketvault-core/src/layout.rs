//! On-disk layout with Hive-style year partitions.
//!
//! Partitioned: `{root}/{table}/year={YYYY}/{YYYY}-{MM}.parquet`
//! Snapshot:    `{root}/{table}/{table}.parquet`
//!
//! Paths are always derived from (table, year, month); nothing records them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const FILE_EXTENSION: &str = "parquet";

/// Path derivation rooted at the data directory.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{table}/`
    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    /// `{root}/{table}/year={year}/`
    pub fn year_dir(&self, table: &str, year: i32) -> PathBuf {
        self.table_dir(table).join(format!("year={year}"))
    }

    /// `{root}/{table}/year={year}/{year}-{month:02}.parquet`
    pub fn partition_path(&self, table: &str, year: i32, month: u32) -> PathBuf {
        self.year_dir(table, year)
            .join(format!("{year}-{month:02}.{FILE_EXTENSION}"))
    }

    /// `{root}/{table}/{table}.parquet`
    pub fn snapshot_path(&self, table: &str) -> PathBuf {
        self.table_dir(table)
            .join(format!("{table}.{FILE_EXTENSION}"))
    }

    /// Recursive glob over every Parquet file of a table.
    pub fn table_glob(&self, table: &str) -> PathBuf {
        self.table_dir(table).join(format!("**/*.{FILE_EXTENSION}"))
    }

    /// Year partitions present on disk, ascending. Missing table dir → empty.
    ///
    /// Only the directory names are read; `year=` is recovered from the
    /// Hive key without touching any file.
    pub fn year_partitions(&self, table: &str) -> io::Result<Vec<i32>> {
        let dir = self.table_dir(table);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut years = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(year) = entry
                .file_name()
                .to_str()
                .and_then(parse_year_key)
            {
                years.push(year);
            }
        }
        years.sort_unstable();
        Ok(years)
    }

    /// Parquet files inside one year partition, sorted by name (month order).
    pub fn partition_files(&self, table: &str, year: i32) -> io::Result<Vec<PathBuf>> {
        let dir = self.year_dir(table, year);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Parse a `year=YYYY` directory name.
fn parse_year_key(name: &str) -> Option<i32> {
    name.strip_prefix("year=")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_path_is_zero_padded() {
        let layout = StorageLayout::new("/data");
        assert_eq!(
            layout.partition_path("cn_stock_em_daily_adj", 2024, 3),
            PathBuf::from("/data/cn_stock_em_daily_adj/year=2024/2024-03.parquet")
        );
    }

    #[test]
    fn snapshot_path_repeats_table_name() {
        let layout = StorageLayout::new("/data");
        assert_eq!(
            layout.snapshot_path("cn_stock_em"),
            PathBuf::from("/data/cn_stock_em/cn_stock_em.parquet")
        );
    }

    #[test]
    fn year_key_parsing() {
        assert_eq!(parse_year_key("year=2023"), Some(2023));
        assert_eq!(parse_year_key("year=abc"), None);
        assert_eq!(parse_year_key("month=01"), None);
    }

    #[test]
    fn year_partitions_scan_directory_names() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        for year in [2025, 2022, 2023] {
            fs::create_dir_all(layout.year_dir("t", year)).unwrap();
        }
        fs::create_dir_all(layout.table_dir("t").join("scratch")).unwrap();
        assert_eq!(layout.year_partitions("t").unwrap(), vec![2022, 2023, 2025]);
        assert!(layout.year_partitions("absent").unwrap().is_empty());
    }

    #[test]
    fn partition_files_skip_foreign_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let dir = layout.year_dir("t", 2024);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("2024-02.parquet"), b"").unwrap();
        fs::write(dir.join("2024-01.parquet"), b"").unwrap();
        fs::write(dir.join("2024-01.parquet.tmp"), b"").unwrap();
        let files = layout.partition_files("t", 2024).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("2024-01.parquet"));
    }
}
