//! Process configuration: where the data lives, how loud to log, and which
//! schema registry to load.

use crate::error::ConfigError;
use crate::layout::StorageLayout;
use crate::registry::SchemaRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides `data_dir`.
pub const ENV_DATA_DIR: &str = "MARKETVAULT_DATA_DIR";
/// Overrides `log_level`.
pub const ENV_LOG: &str = "MARKETVAULT_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Root of the on-disk layout.
    pub data_dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// TOML schema registry; the built-in registry is used when absent.
    pub registry: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            registry: None,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read `path`; a relative `registry` path resolves against the
    /// config file's directory.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let (Some(registry), Some(dir)) = (&config.registry, path.parent()) {
            if registry.is_relative() {
                config.registry = Some(dir.join(registry));
            }
        }
        Ok(config)
    }

    /// Config file if given, defaults otherwise, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(ENV_LOG).filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
        self
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.data_dir)
    }

    pub fn load_registry(&self) -> Result<SchemaRegistry, ConfigError> {
        match &self.registry {
            Some(path) => Ok(SchemaRegistry::from_path(path)?),
            None => Ok(SchemaRegistry::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_fields_omitted() {
        let config = StoreConfig::from_toml_str("log_level = \"debug\"").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.log_level, "debug");
        assert!(config.registry.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = StoreConfig::from_toml_str("data_directory = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> =
            [(ENV_DATA_DIR, "/srv/vault"), (ENV_LOG, "")].into_iter().collect();
        let config = StoreConfig::default().with_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.data_dir, PathBuf::from("/srv/vault"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.layout().root(), Path::new("/srv/vault"));
    }

    #[test]
    fn relative_registry_resolves_next_to_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("marketvault.toml");
        std::fs::write(&path, "registry = \"tables.toml\"\n").unwrap();

        let config = StoreConfig::from_path(&path).unwrap();
        assert_eq!(config.registry, Some(tmp.path().join("tables.toml")));
        assert!(config.load_registry().is_err());
    }

    #[test]
    fn builtin_registry_without_path() {
        let registry = StoreConfig::default().load_registry().unwrap();
        assert!(registry.get("cn_stock_em").is_some());
    }
}
