//! Boundary interface for upstream data providers. The engine core never
//! talks HTTP itself; a vendor client implements this trait and hands the
//! engine plain bars.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::engine::rows::EquityBar;
use crate::error::Result;
use crate::store::Granularity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub configured: bool,
    pub detail: String,
}

pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn status(&self) -> ProviderStatus;

    /// Acquire raw bars from the upstream vendor for one symbol and range.
    fn acquire_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<EquityBar>>;
}

/// Status report when no provider is wired in.
pub fn unconfigured_status() -> ProviderStatus {
    ProviderStatus {
        name: "none".to_string(),
        configured: false,
        detail: "no upstream data provider configured; ingest via the migrator boundary"
            .to_string(),
    }
}
