//! Bulk write path: route bars to their partitions, apply schema, insert
//! inside one transaction per partition and record provenance.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};

use crate::error::{EngineError, Result};
use crate::greeks::occ;
use crate::store::router::sanitize_symbol;
use crate::store::{schema, Category, ConnectionPool, Granularity, ManifestRecord, ManifestStatus, Store};

use super::rows::{EquityBar, OptionBar};

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub partitions: Vec<PathBuf>,
    pub rows_written: usize,
    pub rows_skipped: usize,
}

pub struct Ingestor {
    store: Arc<Store>,
}

impl Ingestor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Insert equity-family bars, grouped per partition. Bars violating the
    /// OHLC ordering or volume invariants are skipped and counted, never
    /// written.
    pub fn ingest_equity_bars(
        &self,
        category: Category,
        symbol: &str,
        granularity: Granularity,
        bars: &[EquityBar],
    ) -> Result<IngestReport> {
        if !category.is_equity_family() {
            return Err(EngineError::InvalidInput(
                "equity ingest requires an equity-family category".to_string(),
            ));
        }
        let sym = sanitize_symbol(symbol)?;
        let mut report = IngestReport::default();
        let mut by_partition: BTreeMap<PathBuf, (NaiveDate, Vec<&EquityBar>)> = BTreeMap::new();

        for bar in bars {
            if !bar_is_sound(bar.o, bar.h, bar.l, bar.c, bar.v) {
                report.rows_skipped += 1;
                continue;
            }
            let Some(date) = date_of_ms(bar.ts) else {
                report.rows_skipped += 1;
                continue;
            };
            let path = self.store.router.path(category, &sym, date, granularity)?;
            by_partition.entry(path).or_insert_with(|| (date, Vec::new())).1.push(bar);
        }

        for (path, (date, rows)) in by_partition {
            self.store.ensure_partition(category, &sym, date, granularity)?;
            let handle = self.store.pool.acquire(&path)?;
            let mut conn = ConnectionPool::lock(&handle)?;
            let tx = conn.transaction().map_err(EngineError::from)?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO bars_eq \
                     (ticker, ts, o, h, l, c, v, trades, vwap, source) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;
                for bar in &rows {
                    stmt.execute(rusqlite::params![
                        sym, bar.ts, bar.o, bar.h, bar.l, bar.c, bar.v, bar.trades, bar.vwap,
                        bar.source,
                    ])?;
                }
            }
            tx.commit().map_err(EngineError::from)?;
            report.rows_written += rows.len();

            let record = ManifestRecord::new(
                category,
                &sym,
                date,
                schema::schema_hash(&schema::equity_ddl()),
                ManifestStatus::Ingested,
            )
            .with_meta("rows", serde_json::json!(rows.len()))
            .with_meta("granularity", serde_json::json!(granularity.token()));
            self.store.manifest.record(&record)?;
            report.partitions.push(path);
        }

        tracing::info!(
            symbol = %sym,
            written = report.rows_written,
            skipped = report.rows_skipped,
            partitions = report.partitions.len(),
            "equity ingest complete"
        );
        Ok(report)
    }

    /// Insert option bars for one underlying into their monthly partitions.
    /// Contract metadata is written when a contract is first seen and
    /// overwritten on re-scan; bars whose contract fails the OCC parse are
    /// skipped.
    pub fn ingest_option_bars(
        &self,
        underlying: &str,
        bars: &[OptionBar],
    ) -> Result<IngestReport> {
        let sym = sanitize_symbol(underlying)?;
        let mut report = IngestReport::default();
        let mut by_partition: BTreeMap<PathBuf, (NaiveDate, Vec<&OptionBar>)> = BTreeMap::new();

        for bar in bars {
            if !bar_is_sound(bar.o, bar.h, bar.l, bar.c, bar.v) {
                report.rows_skipped += 1;
                continue;
            }
            let Some(date) = date_of_ms(bar.ts) else {
                report.rows_skipped += 1;
                continue;
            };
            let path = self
                .store
                .router
                .path(Category::Options, &sym, date, Granularity::Min1)?;
            by_partition.entry(path).or_insert_with(|| (date, Vec::new())).1.push(bar);
        }

        for (path, (date, rows)) in by_partition {
            self.store
                .ensure_partition(Category::Options, &sym, date, Granularity::Min1)?;
            let aggs = schema::op_aggs_table(&sym, date.year(), date.month());
            let meta = schema::op_meta_table(&sym, date.year(), date.month());

            let handle = self.store.pool.acquire(&path)?;
            let mut conn = ConnectionPool::lock(&handle)?;
            let tx = conn.transaction().map_err(EngineError::from)?;
            let mut written = 0usize;
            {
                let mut bar_stmt = tx.prepare_cached(&format!(
                    "INSERT OR REPLACE INTO {aggs} \
                     (contract, ts, o, h, l, c, v, oi, trades) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ))?;
                let mut meta_stmt = tx.prepare_cached(&format!(
                    "INSERT OR REPLACE INTO {meta} \
                     (contract, underlying, expiry, option_type, strike) \
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ))?;
                for bar in &rows {
                    let parsed = match occ::parse_occ(&bar.contract) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::debug!(contract = %bar.contract, reason = %e.reason, "skipping bar");
                            report.rows_skipped += 1;
                            continue;
                        }
                    };
                    bar_stmt.execute(rusqlite::params![
                        bar.contract, bar.ts, bar.o, bar.h, bar.l, bar.c, bar.v, bar.oi,
                        bar.trades,
                    ])?;
                    meta_stmt.execute(rusqlite::params![
                        bar.contract,
                        parsed.underlying,
                        parsed.expiry.format("%Y-%m-%d").to_string(),
                        parsed.option_type.as_str(),
                        parsed.strike,
                    ])?;
                    written += 1;
                }
            }
            tx.commit().map_err(EngineError::from)?;
            report.rows_written += written;

            let record = ManifestRecord::new(
                Category::Options,
                &sym,
                date,
                schema::schema_hash(&schema::options_ddl(&sym, date.year(), date.month())),
                ManifestStatus::Ingested,
            )
            .with_meta("rows", serde_json::json!(written));
            self.store.manifest.record(&record)?;
            report.partitions.push(path);
        }

        tracing::info!(
            underlying = %sym,
            written = report.rows_written,
            skipped = report.rows_skipped,
            "options ingest complete"
        );
        Ok(report)
    }
}

fn bar_is_sound(o: f64, h: f64, l: f64, c: f64, v: i64) -> bool {
    v >= 0 && l <= o.min(c) && o.max(c) <= h && h >= l
}

fn date_of_ms(ts: i64) -> Option<NaiveDate> {
    chrono::DateTime::from_timestamp_millis(ts).map(|dt| dt.date_naive())
}
