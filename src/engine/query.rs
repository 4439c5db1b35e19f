//! Cross-partition query execution: range scans, options-chain
//! projections, the zero-DTE opportunity scan and regime-feature scans.
//!
//! One logical query locks one pooled handle, attaches siblings under
//! `db1..dbN`, runs a parameterized union and detaches before returning —
//! on success and on error alike.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveTime};
use garde::Validate;
use ordered_float::OrderedFloat;
use rusqlite::{named_params, Connection};
use serde::{Deserialize, Serialize};

use crate::envelope::SourceHint;
use crate::error::{with_retry, EngineError, Result};
use crate::greeks::occ::OptionType;
use crate::store::router::{months_between, sanitize_symbol};
use crate::store::{schema, Category, Granularity, Store};
use crate::universe::UniverseCatalog;

use super::rows::{ChainRow, EquityBar, OptionBar, RegimeBar};
use super::sql;

/// Hard ceiling on chain projections; larger requests paginate by date.
pub const CHAIN_ROW_CAP: usize = 10_000;

/// Zero-DTE score weights: moneyness first, then traded volume, open
/// interest, and a penalty for wide quoted spreads.
const W_ATM: f64 = 2.0;
const W_VOLUME: f64 = 0.5;
const W_OPEN_INTEREST: f64 = 0.25;
const W_SPREAD_PENALTY: f64 = 0.5;

#[derive(Debug, Clone, Validate)]
pub struct RangeParams {
    #[garde(skip)]
    pub category: Category,
    #[garde(length(min = 1, max = 12), pattern(r"^[A-Za-z0-9]+$"))]
    pub symbol: String,
    #[garde(skip)]
    pub from: NaiveDate,
    #[garde(skip)]
    pub to: NaiveDate,
    #[garde(skip)]
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Validate)]
pub struct ChainParams {
    #[garde(length(min = 1, max = 12), pattern(r"^[A-Za-z0-9]+$"))]
    pub underlying: String,
    #[garde(skip)]
    pub from: NaiveDate,
    #[garde(skip)]
    pub to: NaiveDate,
    /// Strikes above and below spot kept by `ChainResult::focused`.
    #[garde(range(min = 1, max = 100))]
    pub atm_window: u32,
    /// Days-to-expiration buckets of interest; empty means all.
    #[garde(skip)]
    pub dte_focus: Vec<u32>,
}

#[derive(Debug, Clone, Validate)]
pub struct ZeroDteParams {
    #[garde(length(min = 1))]
    pub underlyings: Vec<String>,
    #[garde(skip)]
    pub trading_day: NaiveDate,
    #[garde(range(min = 1, max = 500))]
    pub max_opportunities: usize,
}

/// Audit record of one contract-picker run; append-only via the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRule {
    pub atm_window_strikes: u32,
    pub dte_focus: Vec<u32>,
    pub max_contracts: usize,
}

/// How a scan touched storage; drives envelope meta.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanInfo {
    pub partitions_hit: usize,
    pub partitions_spanned: usize,
    pub cache_warm: bool,
}

impl ScanInfo {
    pub fn source(&self) -> SourceHint {
        if self.partitions_hit == 0 {
            SourceHint::Empty
        } else if self.partitions_hit < self.partitions_spanned {
            SourceHint::Partial
        } else {
            SourceHint::Sqlite
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangeScan {
    pub bars: Vec<EquityBar>,
    pub info: ScanInfo,
}

#[derive(Debug, Clone)]
pub struct ChainResult {
    pub underlying: String,
    pub rows: Vec<ChainRow>,
    pub rule: SelectionRule,
    pub truncated: bool,
    pub info: ScanInfo,
}

impl ChainResult {
    /// Rows matching the selection rule: expiry within one of the focus
    /// DTE buckets (when any are given) and strike within the ATM window,
    /// measured in ladder steps around the underlying price.
    pub fn focused(&self) -> Vec<&ChainRow> {
        let mut strikes: Vec<f64> = self.rows.iter().map(|r| r.strike).collect();
        strikes.sort_by_key(|s| OrderedFloat(*s));
        strikes.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

        self.rows
            .iter()
            .filter(|row| {
                if !self.rule.dte_focus.is_empty() {
                    match row_dte(row) {
                        Some(dte) => {
                            if !self.rule.dte_focus.contains(&dte) {
                                return false;
                            }
                        }
                        None => return false,
                    }
                }
                let spot_idx = strikes
                    .iter()
                    .position(|s| *s >= row.underlying_price)
                    .unwrap_or(strikes.len().saturating_sub(1));
                let row_idx = strikes
                    .iter()
                    .position(|s| (*s - row.strike).abs() < 1e-9)
                    .unwrap_or(spot_idx);
                spot_idx.abs_diff(row_idx) <= self.rule.atm_window_strikes as usize
            })
            .collect()
    }
}

fn row_dte(row: &ChainRow) -> Option<u32> {
    let expiry = NaiveDate::parse_from_str(&row.expiry, "%Y-%m-%d").ok()?;
    let obs = chrono::DateTime::from_timestamp_millis(row.ts)?.date_naive();
    u32::try_from((expiry - obs).num_days()).ok()
}

/// One scored zero-DTE candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub underlying: String,
    pub contract: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiry: String,
    pub score: f64,
    pub volume: i64,
    pub open_interest: i64,
    pub iv: f64,
    pub delta: f64,
    pub mid: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_pct: Option<f64>,
}

/// Storage seam: alternative backends (csv, parquet) implement the same
/// read surface and slot in behind it.
pub trait BarSource {
    fn range_bars(&self, params: &RangeParams) -> Result<RangeScan>;
    fn options_chain(&self, params: &ChainParams) -> Result<ChainResult>;
}

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<Store>,
    catalog: Arc<UniverseCatalog>,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>, catalog: Arc<UniverseCatalog>) -> Self {
        Self { store, catalog }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Range scan over equity-family bars, unioned across partitions and
    /// ordered by ts. Inverted or uncovered ranges yield an empty scan.
    pub fn range_bars(&self, params: &RangeParams) -> Result<RangeScan> {
        params
            .validate()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        if params.category == Category::Options {
            return Err(EngineError::InvalidInput(
                "range_bars serves the equity family; use range_option_bars".to_string(),
            ));
        }
        let symbol = sanitize_symbol(&params.symbol)?;
        if params.from > params.to {
            return Ok(RangeScan {
                bars: Vec::new(),
                info: ScanInfo::default(),
            });
        }

        let spanned = self
            .store
            .router
            .span(params.category, &symbol, params.from, params.to, params.granularity)?
            .len();
        let paths = self.store.router.resolve(
            params.category,
            &symbol,
            params.from,
            params.to,
            params.granularity,
        )?;
        if paths.is_empty() {
            return Ok(RangeScan {
                bars: Vec::new(),
                info: ScanInfo {
                    partitions_hit: 0,
                    partitions_spanned: spanned,
                    cache_warm: false,
                },
            });
        }

        let info = ScanInfo {
            partitions_hit: paths.len(),
            partitions_spanned: spanned,
            cache_warm: self.store.pool.is_open(&paths[0]),
        };
        let (from_ms, to_ms) = day_bounds_ms(params.from, params.to);

        let handle = self.store.pool.acquire(&paths[0])?;
        let conn = crate::store::ConnectionPool::lock(&handle)?;
        let aliases = attach_siblings(&conn, &paths[1..])?;
        let result = (|| -> Result<Vec<EquityBar>> {
            let sql = sql::equity_range_query(paths.len());
            let mut stmt = conn.prepare_cached(&sql).map_err(classify_sql_error)?;
            let rows = stmt
                .query_map(
                    named_params! { ":symbol": symbol, ":from_ms": from_ms, ":to_ms": to_ms },
                    EquityBar::from_row,
                )
                .map_err(classify_sql_error)?;
            let mut bars = Vec::new();
            for row in rows {
                bars.push(row.map_err(classify_sql_error)?);
            }
            Ok(bars)
        })();
        detach_all(&conn, &aliases);
        Ok(RangeScan {
            bars: result?,
            info,
        })
    }

    /// Raw option bars for an underlying across monthly partitions.
    pub fn range_option_bars(
        &self,
        underlying: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OptionBar>> {
        let symbol = sanitize_symbol(underlying)?;
        if from > to {
            return Ok(Vec::new());
        }
        let (keys, paths) = self.existing_option_months(&symbol, from, to)?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let (from_ms, to_ms) = day_bounds_ms(from, to);
        let tables: Vec<String> = keys
            .iter()
            .map(|(y, m)| schema::op_aggs_table(&symbol, *y, *m))
            .collect();

        let handle = self.store.pool.acquire(&paths[0])?;
        let conn = crate::store::ConnectionPool::lock(&handle)?;
        let aliases = attach_siblings(&conn, &paths[1..])?;
        let result = (|| -> Result<Vec<OptionBar>> {
            let sql = sql::option_range_query(&tables);
            let mut stmt = conn.prepare_cached(&sql).map_err(classify_sql_error)?;
            let rows = stmt
                .query_map(
                    named_params! { ":from_ms": from_ms, ":to_ms": to_ms },
                    OptionBar::from_row,
                )
                .map_err(classify_sql_error)?;
            let mut bars = Vec::new();
            for row in rows {
                bars.push(row.map_err(classify_sql_error)?);
            }
            Ok(bars)
        })();
        detach_all(&conn, &aliases);
        result
    }

    /// Options-chain projection: per-month join of bars, Greeks and
    /// contract metadata, unioned across months, capped at
    /// [`CHAIN_ROW_CAP`] rows. Only rows with a positive underlying
    /// reference price are returned.
    pub fn options_chain(&self, params: &ChainParams) -> Result<ChainResult> {
        params
            .validate()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        let symbol = sanitize_symbol(&params.underlying)?;
        let rule = SelectionRule {
            atm_window_strikes: params.atm_window,
            dte_focus: params.dte_focus.clone(),
            max_contracts: CHAIN_ROW_CAP,
        };
        if params.from > params.to {
            return Ok(ChainResult {
                underlying: symbol,
                rows: Vec::new(),
                rule,
                truncated: false,
                info: ScanInfo::default(),
            });
        }

        let spanned = months_between(params.from, params.to).len();
        let (keys, paths) = self.existing_option_months(&symbol, params.from, params.to)?;
        if paths.is_empty() {
            return Ok(ChainResult {
                underlying: symbol,
                rows: Vec::new(),
                rule,
                truncated: false,
                info: ScanInfo {
                    partitions_hit: 0,
                    partitions_spanned: spanned,
                    cache_warm: false,
                },
            });
        }

        let info = ScanInfo {
            partitions_hit: paths.len(),
            partitions_spanned: spanned,
            cache_warm: self.store.pool.is_open(&paths[0]),
        };
        let (from_ms, to_ms) = day_bounds_ms(params.from, params.to);

        let handle = self.store.pool.acquire(&paths[0])?;
        let conn = crate::store::ConnectionPool::lock(&handle)?;
        let aliases = attach_siblings(&conn, &paths[1..])?;
        let result = (|| -> Result<Vec<ChainRow>> {
            // session-scoped unified views over the sibling set
            conn.execute_batch(&sql::unified_view_ddl(&symbol, &keys))
                .map_err(classify_sql_error)?;
            let sql = sql::chain_query(&keys, &symbol, CHAIN_ROW_CAP + 1);
            let mut stmt = conn.prepare_cached(&sql).map_err(classify_sql_error)?;
            let rows = stmt
                .query_map(
                    named_params! { ":from_ms": from_ms, ":to_ms": to_ms },
                    ChainRow::from_row,
                )
                .map_err(classify_sql_error)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(classify_sql_error)?);
            }
            Ok(out)
        })();
        let _ = conn.execute_batch(&format!(
            "DROP VIEW IF EXISTS v_op_aggs_{symbol};\nDROP VIEW IF EXISTS v_op_greeks_{symbol};"
        ));
        detach_all(&conn, &aliases);

        let mut rows = result?;
        let truncated = rows.len() > CHAIN_ROW_CAP;
        rows.truncate(CHAIN_ROW_CAP);
        Ok(ChainResult {
            underlying: symbol,
            rows,
            rule,
            truncated,
            info,
        })
    }

    /// Score same-day expiries across a set of underlyings and return the
    /// top opportunities, best first. Missing partitions are skipped.
    pub fn zero_dte_scan(&self, params: &ZeroDteParams) -> Result<Vec<Opportunity>> {
        params
            .validate()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        let day = params.trading_day;
        let (from_ms, to_ms) = day_bounds_ms(day, day);
        let expiry = day.format("%Y-%m-%d").to_string();

        let mut opportunities: Vec<Opportunity> = Vec::new();
        for underlying in &params.underlyings {
            let symbol = sanitize_symbol(underlying)?;
            let path = self
                .store
                .router
                .path(Category::Options, &symbol, day, Granularity::Min1)?;
            if !path.exists() {
                tracing::debug!(%symbol, day = %day, "no options partition for trading day");
                continue;
            }
            let handle = self.store.pool.acquire(&path)?;
            let conn = crate::store::ConnectionPool::lock(&handle)?;
            let sql = sql::zero_dte_query(&symbol, day.year(), day.month());
            let mut stmt = conn.prepare_cached(&sql).map_err(classify_sql_error)?;
            let rows = stmt
                .query_map(
                    named_params! { ":expiry": expiry, ":from_ms": from_ms, ":to_ms": to_ms },
                    ChainRow::from_row,
                )
                .map_err(classify_sql_error)?;
            // keep the latest observation per contract
            let mut latest: std::collections::BTreeMap<String, ChainRow> =
                std::collections::BTreeMap::new();
            for row in rows {
                let row = row.map_err(classify_sql_error)?;
                latest.insert(row.contract.clone(), row);
            }
            for row in latest.into_values() {
                opportunities.push(score_opportunity(row));
            }
        }

        opportunities.sort_by_key(|o| std::cmp::Reverse(OrderedFloat(o.score)));
        opportunities.truncate(params.max_opportunities);

        let rule = SelectionRule {
            atm_window_strikes: 0,
            dte_focus: vec![0],
            max_contracts: params.max_opportunities,
        };
        let audit = crate::store::ManifestRecord::new(
            Category::Options,
            &params.underlyings.join(","),
            day,
            String::new(),
            crate::store::ManifestStatus::Ingested,
        )
        .with_meta("kind", serde_json::json!("zero-dte-scan"))
        .with_meta("selection_rule", serde_json::json!(rule))
        .with_meta("opportunities", serde_json::json!(opportunities.len()));
        if let Err(e) = self.store.manifest.record(&audit) {
            tracing::warn!(error = %e, "selection-rule audit not recorded");
        }

        Ok(opportunities)
    }

    /// Equity bars augmented with windowed returns and true-range percent;
    /// regime labeling is the caller's concern.
    pub fn market_regime(&self, params: &RangeParams) -> Result<Vec<RegimeBar>> {
        let scan = self.range_bars(params)?;
        let mut out = Vec::with_capacity(scan.bars.len());
        let mut prev_close: Option<f64> = None;
        for bar in scan.bars {
            let ret = prev_close
                .filter(|p| *p != 0.0)
                .map(|p| (bar.c - p) / p);
            let true_range_pct = if bar.c == 0.0 {
                None
            } else {
                Some((bar.h - bar.l) / bar.c)
            };
            prev_close = Some(bar.c);
            out.push(RegimeBar {
                bar,
                ret,
                true_range_pct,
            });
        }
        Ok(out)
    }

    /// The underlying's price at-or-before `ts`, from its equity partition.
    pub fn underlying_price_at(&self, symbol: &str, ts: i64) -> Result<Option<f64>> {
        let sym = sanitize_symbol(symbol)?;
        let date = match chrono::DateTime::from_timestamp_millis(ts) {
            Some(dt) => dt.date_naive(),
            None => return Err(EngineError::InvalidInput(format!("bad timestamp {ts}"))),
        };
        let categories: Vec<Category> = match self.catalog.get(&sym) {
            Some(meta) if meta.category.is_equity_family() => vec![meta.category],
            _ => vec![Category::Indices, Category::Etfs, Category::Stocks],
        };
        for category in categories {
            for granularity in [Granularity::Min1, Granularity::Day] {
                let path = self.store.router.path(category, &sym, date, granularity)?;
                if !path.exists() {
                    continue;
                }
                let handle = self.store.pool.acquire(&path)?;
                let conn = crate::store::ConnectionPool::lock(&handle)?;
                let mut stmt = conn
                    .prepare_cached(
                        "SELECT c FROM bars_eq WHERE ticker = :symbol AND ts <= :ts \
                         ORDER BY ts DESC LIMIT 1",
                    )
                    .map_err(classify_sql_error)?;
                let price: Option<f64> = stmt
                    .query_row(named_params! { ":symbol": sym, ":ts": ts }, |r| r.get(0))
                    .map(Some)
                    .or_else(|e| {
                        if e == rusqlite::Error::QueryReturnedNoRows {
                            Ok(None)
                        } else {
                            Err(classify_sql_error(e))
                        }
                    })?;
                if price.is_some() {
                    return Ok(price);
                }
            }
        }
        Ok(None)
    }

    /// Existing monthly options partitions for the range, with their
    /// (year, month) keys aligned.
    fn existing_option_months(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(Vec<(i32, u32)>, Vec<PathBuf>)> {
        let mut keys = Vec::new();
        let mut paths = Vec::new();
        for (year, month) in months_between(from, to) {
            let anchor = NaiveDate::from_ymd_opt(year, month, 1)
                .ok_or_else(|| EngineError::Internal(format!("bad month {year}-{month}")))?;
            let path =
                self.store
                    .router
                    .path(Category::Options, symbol, anchor, Granularity::Min1)?;
            if path.exists() {
                keys.push((year, month));
                paths.push(path);
            }
        }
        Ok((keys, paths))
    }
}

impl BarSource for QueryEngine {
    fn range_bars(&self, params: &RangeParams) -> Result<RangeScan> {
        QueryEngine::range_bars(self, params)
    }

    fn options_chain(&self, params: &ChainParams) -> Result<ChainResult> {
        QueryEngine::options_chain(self, params)
    }
}

fn score_opportunity(row: ChainRow) -> Opportunity {
    let atm = (1.0 - (row.delta.abs() - 0.5).abs() * 2.0).max(0.0);
    let volume = row.v.max(0);
    let oi = row.oi.unwrap_or(0).max(0);
    // bar-derived rows carry no quoted spread; intraday range over mid is
    // the stand-in liquidity penalty
    let spread_proxy = if row.mid_px > 0.0 {
        ((row.h - row.l) / row.mid_px).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let score = W_ATM * atm
        + W_VOLUME * (1.0 + volume as f64).ln()
        + W_OPEN_INTEREST * (1.0 + oi as f64).ln()
        - W_SPREAD_PENALTY * spread_proxy;
    Opportunity {
        underlying: row.underlying,
        contract: row.contract,
        option_type: row.option_type,
        strike: row.strike,
        expiry: row.expiry,
        score,
        volume,
        open_interest: oi,
        iv: row.iv,
        delta: row.delta,
        mid: row.mid_px,
        spread_pct: None,
    }
}

/// Inclusive epoch-millis bounds spanning whole days.
pub(crate) fn day_bounds_ms(from: NaiveDate, to: NaiveDate) -> (i64, i64) {
    let start = from.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    let end = to.succ_opt().map_or(i64::MAX, |d| {
        d.and_time(NaiveTime::MIN).and_utc().timestamp_millis() - 1
    });
    (start, end)
}

/// Attach each sibling under a synthetic alias, retrying busy locks.
fn attach_siblings(conn: &Connection, paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut aliases = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let alias = sql::attach_alias(i + 1);
        let path_str = path.to_string_lossy().to_string();
        let attach = format!("ATTACH DATABASE ?1 AS {alias}");
        match with_retry("attach", || {
            conn.execute(&attach, rusqlite::params![path_str])
                .map_err(EngineError::from)
        }) {
            Ok(_) => aliases.push(alias),
            Err(e) => {
                detach_all(conn, &aliases);
                return Err(e);
            }
        }
    }
    Ok(aliases)
}

/// Best-effort detach; failures are logged, not surfaced.
fn detach_all(conn: &Connection, aliases: &[String]) {
    for alias in aliases {
        if let Err(e) = conn.execute(&format!("DETACH DATABASE {alias}"), []) {
            tracing::warn!(alias, error = %e, "detach failed");
        }
    }
}

/// Schema drift surfaces as a data error; busy locks as transient.
fn classify_sql_error(e: rusqlite::Error) -> EngineError {
    let msg = e.to_string();
    if msg.contains("no such table") || msg.contains("no such column") {
        return EngineError::Data(msg);
    }
    e.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn day_bounds_cover_whole_days() {
        let (from_ms, to_ms) = day_bounds_ms(d(2023, 12, 31), d(2024, 1, 1));
        assert_eq!(from_ms, 1_703_980_800_000);
        // last milli of 2024-01-01
        assert_eq!(to_ms, 1_704_153_599_999);
        assert!(from_ms < to_ms);
    }

    #[test]
    fn scan_info_source_hints() {
        let empty = ScanInfo {
            partitions_hit: 0,
            partitions_spanned: 2,
            cache_warm: false,
        };
        assert_eq!(empty.source(), SourceHint::Empty);
        let partial = ScanInfo {
            partitions_hit: 1,
            partitions_spanned: 2,
            cache_warm: false,
        };
        assert_eq!(partial.source(), SourceHint::Partial);
        let full = ScanInfo {
            partitions_hit: 2,
            partitions_spanned: 2,
            cache_warm: true,
        };
        assert_eq!(full.source(), SourceHint::Sqlite);
    }

    #[test]
    fn range_params_reject_bad_symbol() {
        let p = RangeParams {
            category: Category::Stocks,
            symbol: "AAPL; DROP TABLE".into(),
            from: d(2024, 1, 1),
            to: d(2024, 1, 2),
            granularity: Granularity::Min1,
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn atm_scoring_prefers_half_delta() {
        let row = |delta: f64, v: i64| ChainRow {
            contract: "O:SPX240315C04500000".into(),
            ts: 0,
            underlying: "spx".into(),
            expiry: "2024-03-15".into(),
            option_type: OptionType::Call,
            strike: 4500.0,
            o: 1.0,
            h: 1.0,
            l: 1.0,
            c: 1.0,
            v,
            oi: Some(100),
            iv: 0.2,
            delta,
            gamma: 0.0,
            theta: 0.0,
            vega: 0.0,
            rho: 0.0,
            underlying_price: 4500.0,
            mid_px: 1.0,
        };
        let atm = score_opportunity(row(0.5, 100));
        let wing = score_opportunity(row(0.05, 100));
        assert!(atm.score > wing.score);
        let liquid = score_opportunity(row(0.5, 100_000));
        assert!(liquid.score > atm.score);
    }
}
