//! Typed row records for every table shape the engine reads, with
//! hand-written rusqlite mappers. Any row yields exactly the documented
//! fields; there is no reflective mapping.

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::greeks::occ::OptionType;

/// One equity/ETF/index bar, identified by (ticker, ts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityBar {
    pub ticker: String,
    /// Epoch-millis UTC.
    pub ts: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trades: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<f64>,
    #[serde(default)]
    pub source: String,
}

impl EquityBar {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ticker: row.get("ticker")?,
            ts: row.get("ts")?,
            o: row.get("o")?,
            h: row.get("h")?,
            l: row.get("l")?,
            c: row.get("c")?,
            v: row.get("v")?,
            trades: row.get("trades")?,
            vwap: row.get("vwap")?,
            source: row.get("source").unwrap_or_default(),
        })
    }
}

/// One option bar, identified by (contract, ts). Mirrors `EquityBar` plus
/// open interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionBar {
    pub contract: String,
    pub ts: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oi: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trades: Option<i64>,
}

impl OptionBar {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            contract: row.get("contract")?,
            ts: row.get("ts")?,
            o: row.get("o")?,
            h: row.get("h")?,
            l: row.get("l")?,
            c: row.get("c")?,
            v: row.get("v")?,
            oi: row.get("oi")?,
            trades: row.get("trades")?,
        })
    }

    /// Option mid proxy from a bar: `(h + l + 2c) / 4`.
    pub fn mid(&self) -> f64 {
        (self.h + self.l + 2.0 * self.c) / 4.0
    }
}

/// One computed Greeks observation, sibling to an option bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeksRow {
    pub contract: String,
    pub ts: i64,
    pub iv: f64,
    pub delta: f64,
    pub gamma: f64,
    /// Per-day.
    pub theta: f64,
    /// Per 1% vol.
    pub vega: f64,
    /// Per 1% rate.
    pub rho: f64,
    /// Underlying price used.
    pub ref_px: f64,
    /// Option mid used.
    pub mid_px: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_pct: Option<f64>,
}

impl GreeksRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            contract: row.get("contract")?,
            ts: row.get("ts")?,
            iv: row.get("iv")?,
            delta: row.get("delta")?,
            gamma: row.get("gamma")?,
            theta: row.get("theta")?,
            vega: row.get("vega")?,
            rho: row.get("rho")?,
            ref_px: row.get("ref_px")?,
            mid_px: row.get("mid_px")?,
            bid: row.get("bid")?,
            ask: row.get("ask")?,
            spread_pct: row.get("spread_pct")?,
        })
    }
}

/// One options-chain row: the bar joined with its Greeks sibling and the
/// contract metadata for the month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRow {
    pub contract: String,
    pub ts: i64,
    pub underlying: String,
    /// ISO date.
    pub expiry: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oi: Option<i64>,
    pub iv: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    /// Underlying price at the observation; always positive in results.
    pub underlying_price: f64,
    pub mid_px: f64,
}

impl ChainRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let type_str: String = row.get("option_type")?;
        Ok(Self {
            contract: row.get("contract")?,
            ts: row.get("ts")?,
            underlying: row.get("underlying")?,
            expiry: row.get("expiry")?,
            option_type: if type_str == "PUT" {
                OptionType::Put
            } else {
                OptionType::Call
            },
            strike: row.get("strike")?,
            o: row.get("o")?,
            h: row.get("h")?,
            l: row.get("l")?,
            c: row.get("c")?,
            v: row.get("v")?,
            oi: row.get("oi")?,
            iv: row.get("iv")?,
            delta: row.get("delta")?,
            gamma: row.get("gamma")?,
            theta: row.get("theta")?,
            vega: row.get("vega")?,
            rho: row.get("rho")?,
            underlying_price: row.get("ref_px")?,
            mid_px: row.get("mid_px")?,
        })
    }
}

/// Equity bar augmented with windowed derivations for regime detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeBar {
    #[serde(flatten)]
    pub bar: EquityBar,
    /// `(c - lag(c)) / lag(c)`; absent on the first bar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ret: Option<f64>,
    /// `(h - l) / c`, true-range percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_range_pct: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_mid_proxy() {
        let bar = OptionBar {
            contract: "O:SPX240315C04500000".into(),
            ts: 0,
            o: 10.0,
            h: 12.0,
            l: 8.0,
            c: 11.0,
            v: 5,
            oi: None,
            trades: None,
        };
        // (12 + 8 + 22) / 4 = 10.5
        assert!((bar.mid() - 10.5).abs() < 1e-10);
    }

    #[test]
    fn equity_bar_serializes_without_empty_options() {
        let bar = EquityBar {
            ticker: "aapl".into(),
            ts: 1,
            o: 1.0,
            h: 1.0,
            l: 1.0,
            c: 1.0,
            v: 0,
            trades: None,
            vwap: None,
            source: "sqlite".into(),
        };
        let json = serde_json::to_string(&bar).unwrap();
        assert!(!json.contains("trades"));
        assert!(!json.contains("vwap"));
    }
}
