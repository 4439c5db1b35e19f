//! In-memory symbol universe: per-symbol trading metadata plus the
//! deterministic strategy selectors built on top of it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionStyle {
    American,
    European,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    Physical,
    Cash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    ZeroDte,
    Leaps,
    WeeklyIncome,
    Momentum,
    Volatility,
    Scalping,
    Swing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub symbol: String,
    pub category: Category,
    pub style: OptionStyle,
    pub settlement: Settlement,
    pub avg_daily_volume: u64,
    pub strike_increment: f64,
    /// Preferred DTE buckets, ascending.
    pub dte_buckets: Vec<u32>,
    pub options_root: String,
    /// 1..=10, higher is more important.
    pub priority: u8,
}

/// The fixed zero-DTE roster: the index complex, the big three ETFs and
/// five mega-cap stocks.
const ZERO_DTE_ROSTER: [&str; 11] = [
    "SPX", "NDX", "VIX", "SPY", "QQQ", "IWM", "AAPL", "MSFT", "NVDA", "AMZN", "GOOGL",
];

const VOLATILITY_ROSTER: [&str; 6] = ["SPX", "VIX", "SPY", "QQQ", "UVXY", "SQQQ"];

pub struct UniverseCatalog {
    by_symbol: BTreeMap<String, SymbolMeta>,
}

impl UniverseCatalog {
    pub fn new(symbols: Vec<SymbolMeta>) -> Self {
        let by_symbol = symbols
            .into_iter()
            .map(|m| (m.symbol.to_ascii_lowercase(), m))
            .collect();
        Self { by_symbol }
    }

    /// The built-in default universe.
    pub fn builtin() -> Self {
        let mut symbols = Vec::new();
        let mut add = |symbol: &str,
                       category: Category,
                       style: OptionStyle,
                       settlement: Settlement,
                       adv: u64,
                       increment: f64,
                       dte: &[u32],
                       priority: u8| {
            symbols.push(SymbolMeta {
                symbol: symbol.to_string(),
                category,
                style,
                settlement,
                avg_daily_volume: adv,
                strike_increment: increment,
                dte_buckets: dte.to_vec(),
                options_root: symbol.to_string(),
                priority,
            });
        };

        use Category::{Etfs, Indices, Stocks};
        use OptionStyle::{American, European};
        use Settlement::{Cash, Physical};

        add("SPX", Indices, European, Cash, 2_800_000, 5.0, &[0, 1, 7, 30], 10);
        add("NDX", Indices, European, Cash, 400_000, 25.0, &[0, 1, 7, 30], 9);
        add("VIX", Indices, European, Cash, 700_000, 0.5, &[7, 30], 9);
        add("RUT", Indices, European, Cash, 250_000, 5.0, &[7, 30], 7);
        add("DJX", Indices, European, Cash, 60_000, 1.0, &[30], 5);

        add("SPY", Etfs, American, Physical, 75_000_000, 1.0, &[0, 1, 7, 30, 365], 10);
        add("QQQ", Etfs, American, Physical, 50_000_000, 1.0, &[0, 1, 7, 30, 365], 10);
        add("IWM", Etfs, American, Physical, 30_000_000, 1.0, &[0, 7, 30], 8);
        add("DIA", Etfs, American, Physical, 3_500_000, 1.0, &[7, 30], 6);
        add("XLF", Etfs, American, Physical, 40_000_000, 0.5, &[30], 5);
        add("XLE", Etfs, American, Physical, 17_000_000, 0.5, &[30], 5);
        add("GLD", Etfs, American, Physical, 7_000_000, 1.0, &[30, 180], 6);
        add("TLT", Etfs, American, Physical, 20_000_000, 0.5, &[30, 180], 6);
        add("UVXY", Etfs, American, Physical, 20_000_000, 0.5, &[7, 30], 7);
        add("SQQQ", Etfs, American, Physical, 100_000_000, 0.5, &[7, 30], 7);

        add("AAPL", Stocks, American, Physical, 55_000_000, 2.5, &[7, 30, 180, 365], 10);
        add("MSFT", Stocks, American, Physical, 22_000_000, 2.5, &[7, 30, 180, 365], 10);
        add("NVDA", Stocks, American, Physical, 45_000_000, 2.5, &[7, 30, 180, 365], 10);
        add("AMZN", Stocks, American, Physical, 40_000_000, 2.5, &[7, 30, 180], 9);
        add("GOOGL", Stocks, American, Physical, 25_000_000, 2.5, &[7, 30, 180], 9);
        add("META", Stocks, American, Physical, 18_000_000, 2.5, &[7, 30, 180], 8);
        add("TSLA", Stocks, American, Physical, 95_000_000, 2.5, &[7, 30, 180, 365], 9);
        add("AMD", Stocks, American, Physical, 50_000_000, 1.0, &[7, 30], 7);
        add("NFLX", Stocks, American, Physical, 4_000_000, 5.0, &[30, 180], 6);
        add("JPM", Stocks, American, Physical, 9_000_000, 2.5, &[30, 180], 6);
        add("BA", Stocks, American, Physical, 6_000_000, 2.5, &[30], 5);
        add("DIS", Stocks, American, Physical, 9_000_000, 1.0, &[30], 5);
        add("INTC", Stocks, American, Physical, 45_000_000, 1.0, &[30], 4);
        add("F", Stocks, American, Physical, 50_000_000, 0.5, &[30], 3);

        Self::new(symbols)
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolMeta> {
        self.by_symbol.get(&symbol.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &SymbolMeta> {
        self.by_symbol.values()
    }

    pub fn by_category(&self, category: Category) -> Vec<&SymbolMeta> {
        self.all().filter(|m| m.category == category).collect()
    }

    pub fn with_priority_at_least(&self, k: u8) -> Vec<&SymbolMeta> {
        self.all().filter(|m| m.priority >= k).collect()
    }

    /// Hard-coded roster of majors; membership is not priority-derived.
    pub fn zero_dte_set(&self) -> Vec<&SymbolMeta> {
        ZERO_DTE_ROSTER.iter().filter_map(|s| self.get(s)).collect()
    }

    /// Symbols whose preferred DTE ladder reaches 180 or 365 days, top 50
    /// by priority.
    pub fn leaps_set(&self) -> Vec<&SymbolMeta> {
        let mut set: Vec<&SymbolMeta> = self
            .all()
            .filter(|m| m.dte_buckets.contains(&180) || m.dte_buckets.contains(&365))
            .collect();
        set.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.symbol.cmp(&b.symbol)));
        set.truncate(50);
        set
    }

    pub fn strategy_set(&self, strategy: Strategy) -> Vec<&SymbolMeta> {
        match strategy {
            Strategy::ZeroDte => self.zero_dte_set(),
            Strategy::Leaps => self.leaps_set(),
            Strategy::WeeklyIncome => {
                // all ETFs plus anything priority >= 7, first 20
                let mut set: Vec<&SymbolMeta> = self
                    .all()
                    .filter(|m| m.category == Category::Etfs || m.priority >= 7)
                    .collect();
                set.truncate(20);
                set
            }
            Strategy::Momentum => {
                let mut set: Vec<&SymbolMeta> = self
                    .all()
                    .filter(|m| m.category == Category::Stocks && m.priority >= 6)
                    .collect();
                set.truncate(30);
                set
            }
            Strategy::Volatility => VOLATILITY_ROSTER
                .iter()
                .filter_map(|s| self.get(s))
                .collect(),
            Strategy::Scalping => {
                let mut set: Vec<&SymbolMeta> =
                    self.all().filter(|m| m.avg_daily_volume >= 30_000_000).collect();
                set.sort_by(|a, b| {
                    b.avg_daily_volume
                        .cmp(&a.avg_daily_volume)
                        .then(a.symbol.cmp(&b.symbol))
                });
                set.truncate(10);
                set
            }
            Strategy::Swing => {
                let mut set: Vec<&SymbolMeta> = self
                    .all()
                    .filter(|m| {
                        m.priority >= 5
                            && matches!(m.category, Category::Stocks | Category::Etfs)
                    })
                    .collect();
                set.truncate(25);
                set
            }
        }
    }
}

impl Default for UniverseCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
