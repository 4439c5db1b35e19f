#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::TempDir;

use tickvault::engine::{EquityBar, Ingestor, OptionBar, QueryEngine};
use tickvault::store::Store;
use tickvault::universe::UniverseCatalog;
use tickvault::EngineConfig;

/// A fully-wired engine over a throwaway dataset root. Keep the `TempDir`
/// alive for the duration of the test.
pub struct TestEngine {
    pub tmp: TempDir,
    pub store: Arc<Store>,
    pub engine: QueryEngine,
    pub ingestor: Ingestor,
}

pub fn test_engine() -> TestEngine {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(EngineConfig::with_root(tmp.path())));
    let catalog = Arc::new(UniverseCatalog::builtin());
    let engine = QueryEngine::new(store.clone(), catalog);
    let ingestor = Ingestor::new(store.clone());
    TestEngine {
        tmp,
        store,
        engine,
        ingestor,
    }
}

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn ms(y: i32, m: u32, day: u32, hh: u32, mm: u32) -> i64 {
    d(y, m, day)
        .and_hms_opt(hh, mm, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

pub fn eq_bar(ticker: &str, ts: i64, o: f64, h: f64, l: f64, c: f64, v: i64) -> EquityBar {
    EquityBar {
        ticker: ticker.to_string(),
        ts,
        o,
        h,
        l,
        c,
        v,
        trades: None,
        vwap: None,
        source: "test".to_string(),
    }
}

/// `n` well-formed bars starting at `start_ts`, spaced `step_ms` apart.
pub fn bar_run(ticker: &str, start_ts: i64, n: usize, step_ms: i64) -> Vec<EquityBar> {
    (0..n)
        .map(|i| {
            let px = 100.0 + i as f64;
            eq_bar(
                ticker,
                start_ts + i as i64 * step_ms,
                px,
                px + 1.0,
                px - 1.0,
                px + 0.5,
                1_000 + i as i64,
            )
        })
        .collect()
}

pub fn op_bar(contract: &str, ts: i64, o: f64, h: f64, l: f64, c: f64, v: i64) -> OptionBar {
    OptionBar {
        contract: contract.to_string(),
        ts,
        o,
        h,
        l,
        c,
        v,
        oi: Some(500),
        trades: Some(10),
    }
}
