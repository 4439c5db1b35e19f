//! Append-only provenance records, one JSON file per run. The tracker is
//! write-only: records never feed back into control decisions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

use super::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManifestStatus {
    Created,
    Ingested,
    GreeksComputed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub run_id: String,
    pub started: DateTime<Utc>,
    pub ended: DateTime<Utc>,
    pub category: Category,
    pub symbol: String,
    pub date: NaiveDate,
    /// SHA-256 of the applied DDL bytes, base64.
    pub schema_hash: String,
    pub status: ManifestStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ManifestRecord {
    pub fn new(
        category: Category,
        symbol: &str,
        date: NaiveDate,
        schema_hash: String,
        status: ManifestStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            started: now,
            ended: now,
            category,
            symbol: symbol.to_string(),
            date,
            schema_hash,
            status,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn finished(mut self, status: ManifestStatus) -> Self {
        self.ended = Utc::now();
        self.status = status;
        self
    }
}

pub struct ManifestTracker {
    dir: PathBuf,
}

impl ManifestTracker {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Persist one immutable record as `<run_id>.json`.
    pub fn record(&self, record: &ManifestRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", record.run_id));
        if path.exists() {
            return Err(EngineError::Internal(format!(
                "manifest collision for run {}",
                record.run_id
            )));
        }
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| EngineError::Internal(format!("manifest encode: {e}")))?;
        std::fs::write(&path, body)?;
        tracing::debug!(run_id = %record.run_id, status = ?record.status, "manifest recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn records_are_written_once() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = ManifestTracker::new(tmp.path().join("manifests"));
        let rec = ManifestRecord::new(
            Category::Stocks,
            "AAPL",
            d(2024, 1, 2),
            "hash".into(),
            ManifestStatus::Created,
        );
        tracker.record(&rec).unwrap();
        assert!(tracker.record(&rec).is_err());

        let raw =
            std::fs::read_to_string(tmp.path().join("manifests").join(format!("{}.json", rec.run_id)))
                .unwrap();
        let parsed: ManifestRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.symbol, "AAPL");
        assert_eq!(parsed.status, ManifestStatus::Created);
    }

    #[test]
    fn status_serializes_kebab_case() {
        let s = serde_json::to_string(&ManifestStatus::GreeksComputed).unwrap();
        assert_eq!(s, "\"greeks-computed\"");
    }

    #[test]
    fn run_ids_are_fresh() {
        let a = ManifestRecord::new(
            Category::Options,
            "SPX",
            d(2024, 3, 1),
            "h".into(),
            ManifestStatus::Created,
        );
        let b = ManifestRecord::new(
            Category::Options,
            "SPX",
            d(2024, 3, 1),
            "h".into(),
            ManifestStatus::Created,
        );
        assert_ne!(a.run_id, b.run_id);
    }
}
