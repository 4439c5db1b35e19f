use std::path::{Path, PathBuf};

use crate::store::Category;

/// Environment variable overriding the dataset root directory.
pub const DATA_ROOT_ENV: &str = "TICKVAULT_DATA_ROOT";
/// Environment variable carrying the database passphrase.
pub const DB_KEY_ENV: &str = "TICKVAULT_DB_KEY";

/// Non-secure default passphrase, used when `TICKVAULT_DB_KEY` is unset.
/// Only applied on builds linked against an encrypting SQLite; plain
/// builds ignore the key pragma entirely.
const FALLBACK_DB_KEY: &str = "tickvault-insecure-default";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory holding one subdirectory per category.
    pub data_root: PathBuf,
    /// Passphrase handed to every partition on open.
    pub db_key: String,
    /// Continuous risk-free rate used by the Greeks pipeline.
    pub risk_free_rate: f64,
    /// Bounded concurrency for batch Greeks/ingestion work.
    pub greeks_workers: usize,
}

impl EngineConfig {
    /// Build from environment variables.
    ///
    /// | Env Var | Default | Purpose |
    /// |---------|---------|---------|
    /// | `TICKVAULT_DATA_ROOT` | `~/.tickvault/data` | Dataset root directory |
    /// | `TICKVAULT_DB_KEY` | (non-secure literal) | Partition passphrase |
    pub fn from_env() -> Self {
        let data_root = match std::env::var(DATA_ROOT_ENV) {
            Ok(val) => PathBuf::from(val),
            Err(_) => default_data_root(),
        };
        let db_key = std::env::var(DB_KEY_ENV).unwrap_or_else(|_| FALLBACK_DB_KEY.to_string());
        Self::new(data_root, db_key)
    }

    pub fn new(data_root: impl Into<PathBuf>, db_key: impl Into<String>) -> Self {
        Self {
            data_root: data_root.into(),
            db_key: db_key.into(),
            risk_free_rate: 0.05,
            greeks_workers: 3,
        }
    }

    /// Config rooted at `root` with the default key; the usual test entry.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().to_path_buf(), FALLBACK_DB_KEY)
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.data_root.join(category.dir_name())
    }

    /// Sibling directory holding append-only provenance records.
    pub fn manifest_dir(&self) -> PathBuf {
        self.data_root.join("manifests")
    }
}

/// Default dataset root: `~/.tickvault/data`
fn default_data_root() -> PathBuf {
    dirs_home().join(".tickvault").join("data")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME").map_or_else(|_| PathBuf::from("/tmp"), PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_dirs_hang_off_root() {
        let cfg = EngineConfig::with_root("/tmp/tv");
        assert_eq!(
            cfg.category_dir(Category::Stocks),
            PathBuf::from("/tmp/tv/stocks")
        );
        assert_eq!(cfg.manifest_dir(), PathBuf::from("/tmp/tv/manifests"));
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::with_root("/tmp/tv");
        assert!((cfg.risk_free_rate - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.greeks_workers, 3);
    }
}
