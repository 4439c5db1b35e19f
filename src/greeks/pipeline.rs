//! Batch implied-volatility and Greeks computation.
//!
//! The runner walks the cross product of {underlyings} x {months} under a
//! bounded semaphore. Each (underlying, month) pair is independent: one
//! failure is logged and counted without aborting its siblings. The
//! cancellation token is honored between contracts and between bars; a
//! partly-processed contract is never committed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::engine::rows::OptionBar;
use crate::engine::QueryEngine;
use crate::error::{EngineError, Result};
use crate::store::{schema, Category, ConnectionPool, Granularity, ManifestRecord, ManifestStatus};

use super::bs;
use super::occ::{self, OccContract};

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub underlyings: Vec<String>,
    /// (year, month) keys; each pairs with every underlying.
    pub months: Vec<(i32, u32)>,
    pub risk_free_rate: f64,
    /// Bounded concurrency; 3 unless configured otherwise.
    pub concurrency: usize,
}

impl BatchRequest {
    pub fn new(underlyings: Vec<String>, months: Vec<(i32, u32)>) -> Self {
        Self {
            underlyings,
            months,
            risk_free_rate: 0.05,
            concurrency: 3,
        }
    }

    /// Take the rate and worker width from the engine configuration.
    pub fn with_engine_defaults(mut self, config: &crate::config::EngineConfig) -> Self {
        self.risk_free_rate = config.risk_free_rate;
        self.concurrency = config.greeks_workers;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
    pub pairs_ok: usize,
    pub pairs_failed: usize,
    pub contracts: usize,
    pub rows_stored: usize,
    pub rows_skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct PairStats {
    contracts: usize,
    stored: usize,
    skipped: usize,
    cancelled: bool,
}

pub struct GreeksPipeline {
    engine: QueryEngine,
}

impl GreeksPipeline {
    pub fn new(engine: QueryEngine) -> Self {
        Self { engine }
    }

    /// Run the batch. The returned outcome aggregates per-pair statistics;
    /// `cancelled` is set when the token fired before the batch drained.
    pub async fn run(&self, req: &BatchRequest, cancel: &CancellationToken) -> Result<BatchOutcome> {
        let semaphore = Arc::new(Semaphore::new(req.concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for underlying in &req.underlyings {
            for (year, month) in &req.months {
                let permit_source = semaphore.clone();
                let engine = self.engine.clone();
                let underlying = underlying.clone();
                let (year, month) = (*year, *month);
                let rate = req.risk_free_rate;
                let cancel = cancel.clone();
                join_set.spawn(async move {
                    let _permit = permit_source.acquire_owned().await;
                    if cancel.is_cancelled() {
                        return (underlying, year, month, Ok(PairStats {
                            cancelled: true,
                            ..PairStats::default()
                        }));
                    }
                    let result = tokio::task::spawn_blocking(move || {
                        compute_month(&engine, &underlying, year, month, rate, &cancel)
                            .map(|stats| (underlying, stats))
                    })
                    .await;
                    match result {
                        Ok(Ok((underlying, stats))) => (underlying, year, month, Ok(stats)),
                        Ok(Err((underlying, e))) => (underlying, year, month, Err(e)),
                        Err(join_err) => (
                            String::new(),
                            year,
                            month,
                            Err(EngineError::Internal(join_err.to_string())),
                        ),
                    }
                });
            }
        }

        let mut outcome = BatchOutcome::default();
        while let Some(joined) = join_set.join_next().await {
            let (underlying, year, month, result) = joined
                .map_err(|e| EngineError::Internal(format!("greeks worker panicked: {e}")))?;
            match result {
                Ok(stats) => {
                    outcome.pairs_ok += 1;
                    outcome.contracts += stats.contracts;
                    outcome.rows_stored += stats.stored;
                    outcome.rows_skipped += stats.skipped;
                    outcome.cancelled |= stats.cancelled;
                }
                Err(e) => {
                    outcome.pairs_failed += 1;
                    tracing::warn!(%underlying, year, month, error = %e, "greeks pair failed");
                }
            }
        }
        outcome.cancelled |= cancel.is_cancelled();
        Ok(outcome)
    }
}

type PairError = (String, EngineError);

/// Compute and persist Greeks for one (underlying, month) partition.
fn compute_month(
    engine: &QueryEngine,
    underlying: &str,
    year: i32,
    month: u32,
    rate: f64,
    cancel: &CancellationToken,
) -> std::result::Result<PairStats, PairError> {
    let fail = |e: EngineError| (underlying.to_string(), e);
    let mut stats = PairStats::default();

    let anchor = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| fail(EngineError::InvalidInput(format!("bad month {year}-{month:02}"))))?;
    let store = engine.store().clone();
    let sym = crate::store::router::sanitize_symbol(underlying).map_err(fail)?;
    let path = store
        .router
        .path(Category::Options, &sym, anchor, Granularity::Min1)
        .map_err(fail)?;
    if !path.exists() {
        tracing::debug!(%sym, year, month, "no options partition, nothing to compute");
        return Ok(stats);
    }

    // group the month's bars per contract
    let (from, to) = month_span(year, month).map_err(fail)?;
    let bars = engine.range_option_bars(&sym, from, to).map_err(fail)?;
    let mut by_contract: BTreeMap<String, Vec<OptionBar>> = BTreeMap::new();
    for bar in bars {
        by_contract.entry(bar.contract.clone()).or_default().push(bar);
    }

    let aggs_greeks = schema::op_greeks_table(&sym, year, month);
    let handle = store.pool.acquire(&path).map_err(fail)?;

    for (contract, contract_bars) in by_contract {
        if cancel.is_cancelled() {
            stats.cancelled = true;
            break;
        }
        let parsed = match occ::parse_occ(&contract) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(%contract, reason = %e.reason, "skipping contract");
                stats.skipped += contract_bars.len();
                continue;
            }
        };

        let mut conn = ConnectionPool::lock(&handle).map_err(fail)?;
        let tx = conn.transaction().map_err(|e| fail(e.into()))?;
        let mut stored = 0usize;
        {
            let mut stmt = tx
                .prepare_cached(&format!(
                    "INSERT OR REPLACE INTO {aggs_greeks} \
                     (contract, ts, iv, delta, gamma, theta, vega, rho, ref_px, mid_px, \
                      bid, ask, spread_pct) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, NULL, NULL)"
                ))
                .map_err(|e| fail(e.into()))?;
            for bar in &contract_bars {
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    break;
                }
                match compute_observation(engine, &parsed, bar, rate).map_err(fail)? {
                    Some(obs) => {
                        stmt.execute(rusqlite::params![
                            contract, bar.ts, obs.iv, obs.greeks.delta, obs.greeks.gamma,
                            obs.greeks.theta, obs.greeks.vega, obs.greeks.rho, obs.ref_px,
                            obs.mid_px,
                        ])
                        .map_err(|e| fail(e.into()))?;
                        stored += 1;
                    }
                    None => stats.skipped += 1,
                }
            }
        }
        if stats.cancelled {
            // no partial Greeks beyond the last completed contract
            drop(tx);
            break;
        }
        tx.commit().map_err(|e| fail(e.into()))?;
        stats.contracts += 1;
        stats.stored += stored;
    }

    if !stats.cancelled {
        materialize_summary(&handle, &sym, year, month).map_err(fail)?;
        let record = ManifestRecord::new(
            Category::Options,
            &sym,
            anchor,
            schema::schema_hash(&schema::options_ddl(&sym, year, month)),
            ManifestStatus::GreeksComputed,
        )
        .with_meta("contracts", serde_json::json!(stats.contracts))
        .with_meta("rows", serde_json::json!(stats.stored));
        store.manifest.record(&record).map_err(fail)?;
    }
    Ok(stats)
}

struct Observation {
    iv: f64,
    greeks: bs::Greeks,
    ref_px: f64,
    mid_px: f64,
}

/// One bar through the state machine: priced, solved, converged or skipped.
fn compute_observation(
    engine: &QueryEngine,
    contract: &OccContract,
    bar: &OptionBar,
    rate: f64,
) -> Result<Option<Observation>> {
    let mid = bar.mid();
    if mid <= 0.0 {
        return Ok(None);
    }
    let Some(ref_px) = engine.underlying_price_at(&contract.underlying, bar.ts)? else {
        return Ok(None);
    };
    if ref_px <= 0.0 {
        return Ok(None);
    }
    let t = year_fraction_to_expiry(bar.ts, contract.expiry);
    let Some(iv) = bs::implied_vol(contract.option_type, mid, ref_px, contract.strike, t, rate)
    else {
        return Ok(None); // diverged
    };
    if iv <= 0.0 || iv > bs::IV_MAX {
        return Ok(None);
    }
    let greeks = bs::greeks(contract.option_type, ref_px, contract.strike, t, rate, iv);
    Ok(Some(Observation {
        iv,
        greeks,
        ref_px,
        mid_px: mid,
    }))
}

/// Years until the end of the expiration day, so same-day contracts keep a
/// positive, shrinking time value.
fn year_fraction_to_expiry(ts: i64, expiry: NaiveDate) -> f64 {
    let expiry_end_ms = expiry.succ_opt().map_or(i64::MAX, |d| {
        d.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
    });
    let remaining_ms = expiry_end_ms.saturating_sub(ts);
    remaining_ms as f64 / (365.0 * 24.0 * 3600.0 * 1000.0)
}

/// Rebuild the per-trade-date summary for the month from the stored rows.
fn materialize_summary(
    handle: &crate::store::pool::Handle,
    symbol: &str,
    year: i32,
    month: u32,
) -> Result<()> {
    let greeks = schema::op_greeks_table(symbol, year, month);
    let summary = schema::op_summary_table(symbol, year, month);
    let conn = ConnectionPool::lock(handle)?;
    conn.execute_batch(&format!(
        "DELETE FROM {summary};\n\
         INSERT INTO {summary} \
         (trade_date, contracts, row_count, avg_iv, avg_abs_delta, avg_gamma, avg_vega, avg_theta)\n\
         SELECT date(ts / 1000, 'unixepoch') AS trade_date,\n\
         \x20      COUNT(DISTINCT contract),\n\
         \x20      COUNT(*),\n\
         \x20      AVG(iv),\n\
         \x20      AVG(ABS(delta)),\n\
         \x20      AVG(gamma),\n\
         \x20      AVG(vega),\n\
         \x20      AVG(theta)\n\
         FROM {greeks}\n\
         GROUP BY trade_date;"
    ))?;
    Ok(())
}

fn month_span(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    let from = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| EngineError::InvalidInput(format!("bad month {year}-{month:02}")))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let to = next
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| EngineError::Internal(format!("month end for {year}-{month:02}")))?;
    Ok((from, to))
}
