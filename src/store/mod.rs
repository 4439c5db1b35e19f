pub mod manifest;
pub mod pool;
pub mod router;
pub mod schema;

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

pub use manifest::{ManifestRecord, ManifestStatus, ManifestTracker};
pub use pool::ConnectionPool;
pub use router::PartitionRouter;

/// Dataset category. Everything but `Options` is the "equity family".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Indices,
    Etfs,
    Stocks,
    Options,
}

impl Category {
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Indices => "indices",
            Category::Etfs => "etfs",
            Category::Stocks => "stocks",
            Category::Options => "options",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "indices" | "index" => Ok(Category::Indices),
            "etfs" | "etf" => Ok(Category::Etfs),
            "stocks" | "stock" => Ok(Category::Stocks),
            "options" => Ok(Category::Options),
            other => Err(EngineError::InvalidInput(format!(
                "unknown category: {other}"
            ))),
        }
    }

    pub fn is_equity_family(self) -> bool {
        !matches!(self, Category::Options)
    }

    pub const ALL: [Category; 4] = [
        Category::Indices,
        Category::Etfs,
        Category::Stocks,
        Category::Options,
    ];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Bar granularity. Tick-level granularities are always bucketed monthly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Min1,
    Min5,
    Day,
    Tick,
    Trade,
    Quote,
}

impl Granularity {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "1m" | "1min" => Ok(Granularity::Min1),
            "5m" | "5min" => Ok(Granularity::Min5),
            "1d" | "day" | "daily" => Ok(Granularity::Day),
            "tick" => Ok(Granularity::Tick),
            "trade" => Ok(Granularity::Trade),
            "quote" => Ok(Granularity::Quote),
            other => Err(EngineError::InvalidInput(format!(
                "unknown granularity: {other}"
            ))),
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Granularity::Min1 => "1min",
            Granularity::Min5 => "5min",
            Granularity::Day => "1d",
            Granularity::Tick => "tick",
            Granularity::Trade => "trade",
            Granularity::Quote => "quote",
        }
    }

    pub fn is_tick_level(self) -> bool {
        matches!(self, Granularity::Tick | Granularity::Trade | Granularity::Quote)
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// The engine's single owned storage resource: router, pool and manifest
/// tracker created once at process start and borrowed by every component.
pub struct Store {
    pub config: EngineConfig,
    pub router: PartitionRouter,
    pub pool: ConnectionPool,
    pub manifest: ManifestTracker,
}

impl Store {
    pub fn open(config: EngineConfig) -> Self {
        let router = PartitionRouter::new(config.clone());
        let pool = ConnectionPool::new(config.db_key.clone());
        let manifest = ManifestTracker::new(config.manifest_dir());
        Self {
            config,
            router,
            pool,
            manifest,
        }
    }

    /// Idempotently create the partition covering `date`, apply its schema
    /// and record provenance on first creation.
    pub fn ensure_partition(
        &self,
        category: Category,
        symbol: &str,
        date: NaiveDate,
        granularity: Granularity,
    ) -> Result<PathBuf> {
        let path = self.router.path(category, symbol, date, granularity)?;
        let created = !path.exists();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let handle = self.pool.acquire(&path)?;
        let ddl = match category {
            Category::Options => {
                use chrono::Datelike;
                let sym = router::sanitize_symbol(symbol)?;
                schema::options_ddl(&sym, date.year(), date.month())
            }
            _ => schema::equity_ddl(),
        };
        {
            let conn = ConnectionPool::lock(&handle)?;
            schema::apply(&conn, &ddl)?;
        }
        if created {
            let record = ManifestRecord::new(
                category,
                symbol,
                date,
                schema::schema_hash(&ddl),
                ManifestStatus::Created,
            );
            self.manifest.record(&record)?;
        }
        Ok(path)
    }

    /// Close every pooled handle; called once at teardown.
    pub fn close(&self) {
        self.pool.close_all();
    }
}
