//! Maps (category, symbol, date, granularity) keys to partition files and
//! enumerates the partitions spanning a query range.

use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

use super::{Category, Granularity};

/// Time bucket owning a partition. A date on a bucket boundary belongs to
/// the earlier bucket (ts < next-bucket-start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Year(i32),
    /// Start year, aligned to `floor(year / 5) * 5`.
    FiveYear(i32),
    Month(i32, u32),
}

impl Bucket {
    /// Filename suffix: `2023`, `2020_2024`, `2024_03`.
    pub fn suffix(self) -> String {
        match self {
            Bucket::Year(y) => format!("{y}"),
            Bucket::FiveYear(y) => format!("{}_{}", y, y + 4),
            Bucket::Month(y, m) => format!("{y}_{m:02}"),
        }
    }

    pub fn for_date(category: Category, granularity: Granularity, date: NaiveDate) -> Bucket {
        match bucketing(category, granularity) {
            Bucketing::Yearly => Bucket::Year(date.year()),
            Bucketing::FiveYear => Bucket::FiveYear(five_year_start(date.year())),
            Bucketing::Monthly => Bucket::Month(date.year(), date.month()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucketing {
    Yearly,
    FiveYear,
    Monthly,
}

/// The partition-size rules. Tick-level data is always monthly; the options
/// monthly/5-year split follows granularity; daily bars share the wide
/// 5-year bucket with 5-minute bars.
fn bucketing(category: Category, granularity: Granularity) -> Bucketing {
    if granularity.is_tick_level() {
        return Bucketing::Monthly;
    }
    match (category, granularity) {
        (Category::Options, Granularity::Min1) => Bucketing::Monthly,
        (Category::Options, _) => Bucketing::FiveYear,
        (_, Granularity::Min1) => Bucketing::Yearly,
        (_, _) => Bucketing::FiveYear,
    }
}

/// Stable regardless of the requested range.
fn five_year_start(year: i32) -> i32 {
    year.div_euclid(5) * 5
}

/// Lowercase and reject anything that could not be a symbol. The result is
/// interpolated into filenames and table names, so the character set is
/// deliberately tight.
pub fn sanitize_symbol(symbol: &str) -> Result<String> {
    if symbol.is_empty() || symbol.len() > 12 {
        return Err(EngineError::InvalidInput(format!(
            "bad symbol: {symbol:?}"
        )));
    }
    if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(EngineError::InvalidInput(format!(
            "symbol must be alphanumeric: {symbol:?}"
        )));
    }
    Ok(symbol.to_ascii_lowercase())
}

/// Pure naming function: two calls with equal inputs return byte-equal names.
pub fn partition_name(
    category: Category,
    symbol: &str,
    date: NaiveDate,
    granularity: Granularity,
) -> Result<String> {
    let sym = sanitize_symbol(symbol)?;
    let bucket = Bucket::for_date(category, granularity, date);
    Ok(format!("{}_{}_{}.db", category.dir_name(), sym, bucket.suffix()))
}

pub struct PartitionRouter {
    config: EngineConfig,
}

impl PartitionRouter {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn name(
        &self,
        category: Category,
        symbol: &str,
        date: NaiveDate,
        granularity: Granularity,
    ) -> Result<String> {
        partition_name(category, symbol, date, granularity)
    }

    pub fn path(
        &self,
        category: Category,
        symbol: &str,
        date: NaiveDate,
        granularity: Granularity,
    ) -> Result<PathBuf> {
        let name = partition_name(category, symbol, date, granularity)?;
        Ok(self.config.category_dir(category).join(name))
    }

    /// Ordered list of partition paths that exist on disk for the range.
    /// Missing partitions are silently skipped; an inverted range resolves
    /// to nothing.
    pub fn resolve(
        &self,
        category: Category,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for date in bucket_anchor_dates(category, granularity, from, to) {
            let path = self.path(category, symbol, date, granularity)?;
            if paths.last() == Some(&path) {
                continue;
            }
            if path.exists() {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Like `resolve` but keeps paths whether or not they exist; used by
    /// the write path to know which partitions a range would span.
    pub fn span(
        &self,
        category: Category,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for date in bucket_anchor_dates(category, granularity, from, to) {
            let path = self.path(category, symbol, date, granularity)?;
            if paths.last() != Some(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Chronological (year, month) keys between two dates, inclusive.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> Vec<(i32, u32)> {
    if from > to {
        return Vec::new();
    }
    let mut keys = Vec::new();
    let (mut y, mut m) = (from.year(), from.month());
    loop {
        keys.push((y, m));
        if (y, m) >= (to.year(), to.month()) {
            break;
        }
        m += 1;
        if m > 12 {
            m = 1;
            y += 1;
        }
    }
    keys
}

/// One anchor date per bucket between `from` and `to`, chronological.
fn bucket_anchor_dates(
    category: Category,
    granularity: Granularity,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<NaiveDate> {
    if from > to {
        return Vec::new();
    }
    let mut anchors = Vec::new();
    match bucketing(category, granularity) {
        Bucketing::Monthly => {
            let (mut y, mut m) = (from.year(), from.month());
            loop {
                // first-of-month anchor, clamped into the range
                let anchor = NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(from);
                anchors.push(anchor.max(from).min(to));
                if (y, m) >= (to.year(), to.month()) {
                    break;
                }
                m += 1;
                if m > 12 {
                    m = 1;
                    y += 1;
                }
            }
        }
        Bucketing::Yearly => {
            for y in from.year()..=to.year() {
                let anchor = NaiveDate::from_ymd_opt(y, 1, 1).unwrap_or(from);
                anchors.push(anchor.max(from).min(to));
            }
        }
        Bucketing::FiveYear => {
            let mut y = five_year_start(from.year());
            let last = five_year_start(to.year());
            while y <= last {
                let anchor = NaiveDate::from_ymd_opt(y, 1, 1).unwrap_or(from);
                anchors.push(anchor.max(from).min(to));
                y += 5;
            }
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn equity_1min_buckets_yearly() {
        let name =
            partition_name(Category::Stocks, "AAPL", d(2023, 12, 31), Granularity::Min1).unwrap();
        assert_eq!(name, "stocks_aapl_2023.db");
    }

    #[test]
    fn equity_5min_buckets_five_yearly_aligned() {
        let name =
            partition_name(Category::Etfs, "SPY", d(2023, 6, 1), Granularity::Min5).unwrap();
        assert_eq!(name, "etfs_spy_2020_2024.db");
        // alignment is floor(year/5)*5 regardless of the requested date
        let name =
            partition_name(Category::Etfs, "SPY", d(2024, 12, 31), Granularity::Min5).unwrap();
        assert_eq!(name, "etfs_spy_2020_2024.db");
    }

    #[test]
    fn options_1min_buckets_monthly() {
        let name =
            partition_name(Category::Options, "SPX", d(2024, 3, 15), Granularity::Min1).unwrap();
        assert_eq!(name, "options_spx_2024_03.db");
    }

    #[test]
    fn options_5min_buckets_five_yearly() {
        let name =
            partition_name(Category::Options, "SPX", d(2024, 3, 15), Granularity::Min5).unwrap();
        assert_eq!(name, "options_spx_2020_2024.db");
    }

    #[test]
    fn tick_always_monthly() {
        for cat in [Category::Stocks, Category::Options, Category::Indices] {
            let name = partition_name(cat, "X", d(2024, 7, 4), Granularity::Tick).unwrap();
            assert!(name.ends_with("_x_2024_07.db"), "{name}");
        }
    }

    #[test]
    fn naming_is_total_and_deterministic() {
        let a = partition_name(Category::Stocks, "MSFT", d(2022, 5, 9), Granularity::Min1).unwrap();
        let b = partition_name(Category::Stocks, "MSFT", d(2022, 5, 9), Granularity::Min1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn symbol_is_lowercased_and_validated() {
        assert!(sanitize_symbol("BRK1").is_ok());
        assert!(sanitize_symbol("").is_err());
        assert!(sanitize_symbol("A;DROP").is_err());
        assert!(sanitize_symbol("spx w").is_err());
        assert_eq!(sanitize_symbol("SPXW").unwrap(), "spxw");
    }

    #[test]
    fn boundary_belongs_to_earlier_bucket() {
        // 2024-12-31 is in the 2020-2024 five-year bucket; 2025-01-01 starts the next
        let a = Bucket::for_date(Category::Stocks, Granularity::Min5, d(2024, 12, 31));
        let b = Bucket::for_date(Category::Stocks, Granularity::Min5, d(2025, 1, 1));
        assert_eq!(a, Bucket::FiveYear(2020));
        assert_eq!(b, Bucket::FiveYear(2025));
    }

    #[test]
    fn anchors_cross_year_boundary() {
        let anchors =
            bucket_anchor_dates(Category::Stocks, Granularity::Min1, d(2023, 12, 31), d(2024, 1, 1));
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].year(), 2023);
        assert_eq!(anchors[1].year(), 2024);
    }

    #[test]
    fn anchors_enumerate_months_in_order() {
        let anchors =
            bucket_anchor_dates(Category::Options, Granularity::Min1, d(2023, 11, 15), d(2024, 2, 3));
        let months: Vec<(i32, u32)> = anchors.iter().map(|a| (a.year(), a.month())).collect();
        assert_eq!(months, vec![(2023, 11), (2023, 12), (2024, 1), (2024, 2)]);
    }

    #[test]
    fn inverted_range_resolves_to_nothing() {
        let anchors =
            bucket_anchor_dates(Category::Stocks, Granularity::Min1, d(2024, 2, 1), d(2024, 1, 1));
        assert!(anchors.is_empty());
    }

    #[test]
    fn resolve_skips_missing_partitions() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::with_root(tmp.path());
        let router = PartitionRouter::new(cfg.clone());

        // create only the 2024 partition file
        let p2024 = router
            .path(Category::Stocks, "AAPL", d(2024, 1, 1), Granularity::Min1)
            .unwrap();
        std::fs::create_dir_all(p2024.parent().unwrap()).unwrap();
        std::fs::write(&p2024, b"").unwrap();

        let resolved = router
            .resolve(Category::Stocks, "AAPL", d(2023, 12, 1), d(2024, 2, 1), Granularity::Min1)
            .unwrap();
        assert_eq!(resolved, vec![p2024]);
    }
}
