//! Tool configuration.
//!
//! Read from a TOML file; every section and key is optional and falls back to
//! its default.
//!
//! ```toml
//! [database]
//! path = "data/codebook.db"
//! batch_size = 20000
//!
//! [import]
//! header_scan_rows = 30
//! ```

use crate::error::Result;
use crate::mapper::DEFAULT_HEADER_SCAN_ROWS;
use crate::store::{Store, DEFAULT_BATCH_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "bankcodes.toml";

pub const DEFAULT_DATABASE_FILE: &str = "codebook.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding both reference tables.
    pub path: PathBuf,

    /// Rows per transaction when merging.
    pub batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_FILE),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Leading rows searched for a header row.
    pub header_scan_rows: usize,

    /// Default row cap for `search`.
    pub search_limit: usize,

    /// Row cap for `export`.
    pub export_limit: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            header_scan_rows: DEFAULT_HEADER_SCAN_ROWS,
            search_limit: 200,
            export_limit: 999_999,
        }
    }
}

impl Config {
    /// Load `explicit` if given, else `bankcodes.toml` from the working
    /// directory if it exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::load_from(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn store(&self) -> Store {
        Store::new(&self.database.path).with_batch_size(self.database.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[database]\npath = \"x/y.db\"\n").unwrap();

        assert_eq!(config.database.path, PathBuf::from("x/y.db"));
        assert_eq!(config.database.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.import, ImportConfig::default());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[import]\nheader_scan_rows = 5\nsearch_limit = 10\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.import.header_scan_rows, 5);
        assert_eq!(config.import.search_limit, 10);
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[database\npath = 1").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }
}
