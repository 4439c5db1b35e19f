//! Data-quality gate: invariant checks over bar sets and option quotes,
//! folded into four sub-scores and a letter grade.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::engine::rows::EquityBar;
use crate::greeks::occ::OptionType;

/// Sensible horizon for option expiries, in days, relative to observation.
const MAX_EXPIRY_HORIZON_DAYS: i64 = 5 * 365;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityScores {
    pub completeness: f64,
    pub consistency: f64,
    pub accuracy: f64,
    pub timeliness: f64,
    pub overall: f64,
    pub grade: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl QualityScores {
    fn from_subscores(
        completeness: f64,
        consistency: f64,
        accuracy: f64,
        timeliness: f64,
        violations: Vec<String>,
    ) -> Self {
        let overall = (completeness + consistency + accuracy + timeliness) / 4.0;
        Self {
            completeness,
            consistency,
            accuracy,
            timeliness,
            overall,
            grade: letter_grade(overall).to_string(),
            violations,
        }
    }

    /// Perfect scores for a trivially-valid (possibly empty) set.
    pub fn perfect() -> Self {
        Self::from_subscores(1.0, 1.0, 1.0, 1.0, Vec::new())
    }
}

/// Grade ladder; only the top two cutoffs are load-bearing downstream.
pub fn letter_grade(score: f64) -> &'static str {
    if score >= 0.95 {
        "A+"
    } else if score >= 0.90 {
        "A"
    } else if score >= 0.85 {
        "A-"
    } else if score >= 0.80 {
        "B+"
    } else if score >= 0.75 {
        "B"
    } else if score >= 0.70 {
        "C"
    } else if score >= 0.60 {
        "D"
    } else {
        "F"
    }
}

/// Validate a bar set for one symbol: required fields, OHLC ordering,
/// non-negative volume and strictly-increasing UTC timestamps.
pub fn validate_equity_bars(bars: &[EquityBar]) -> QualityScores {
    if bars.is_empty() {
        return QualityScores::perfect();
    }
    let total = bars.len() as f64;
    let mut complete = 0usize;
    let mut accurate = 0usize;
    let mut ordered = 0usize;
    let mut violations = Vec::new();

    let mut prev_ts: Option<i64> = None;
    for (i, bar) in bars.iter().enumerate() {
        let has_fields = !bar.ticker.is_empty()
            && bar.o.is_finite()
            && bar.h.is_finite()
            && bar.l.is_finite()
            && bar.c.is_finite();
        if has_fields {
            complete += 1;
        } else {
            violations.push(format!("bar {i}: missing or non-finite fields"));
        }

        let ohlc_ok = bar.l <= bar.o.min(bar.c) && bar.o.max(bar.c) <= bar.h && bar.h >= bar.l;
        let volume_ok = bar.v >= 0;
        if ohlc_ok && volume_ok {
            accurate += 1;
        } else if !ohlc_ok {
            violations.push(format!(
                "bar {i}: OHLC ordering violated (o={} h={} l={} c={})",
                bar.o, bar.h, bar.l, bar.c
            ));
        } else {
            violations.push(format!("bar {i}: negative volume {}", bar.v));
        }

        match prev_ts {
            Some(prev) if bar.ts <= prev => {
                violations.push(format!("bar {i}: timestamp {} not increasing", bar.ts));
            }
            _ => ordered += 1,
        }
        prev_ts = Some(bar.ts);
    }

    // epoch-millis plausibility doubles as the UTC check: second- or
    // nanosecond-scale values betray a unit mix-up
    let plausible = bars
        .iter()
        .filter(|b| (631_152_000_000..4_102_444_800_000).contains(&b.ts))
        .count();

    QualityScores::from_subscores(
        complete as f64 / total,
        ordered as f64 / total,
        accurate as f64 / total,
        plausible as f64 / total,
        violations,
    )
}

/// One option quote as seen by the gate; absent fields count against
/// completeness.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OptionQuote {
    pub contract: String,
    pub ts: i64,
    pub expiry: Option<NaiveDate>,
    pub option_type: Option<OptionType>,
    pub strike: Option<f64>,
    pub bid: Option<f64>,
    pub mid: Option<f64>,
    pub ask: Option<f64>,
}

/// Validate option quotes: identifying fields present, bid <= mid <= ask
/// whenever both sides are positive, expiry within a sensible horizon.
pub fn validate_option_quotes(quotes: &[OptionQuote]) -> QualityScores {
    if quotes.is_empty() {
        return QualityScores::perfect();
    }
    let total = quotes.len() as f64;
    let mut complete = 0usize;
    let mut consistent = 0usize;
    let mut accurate = 0usize;
    let mut timely = 0usize;
    let mut violations = Vec::new();

    for (i, q) in quotes.iter().enumerate() {
        let has_identity = !q.contract.is_empty()
            && q.expiry.is_some()
            && q.option_type.is_some()
            && q.strike.is_some_and(|s| s > 0.0);
        if has_identity {
            complete += 1;
        } else {
            violations.push(format!("quote {i}: missing symbol/expiry/right/strike"));
        }

        let nbbo_ok = match (q.bid, q.ask) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => {
                let mid_ok = q.mid.is_none_or(|mid| bid <= mid && mid <= ask);
                bid <= ask && mid_ok
            }
            _ => true,
        };
        if nbbo_ok {
            consistent += 1;
        } else {
            violations.push(format!(
                "quote {i}: NBBO violated (bid={:?} mid={:?} ask={:?})",
                q.bid, q.mid, q.ask
            ));
        }

        let spread_ok = match (q.bid, q.ask) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => ask - bid >= 0.0,
            _ => true,
        };
        if spread_ok {
            accurate += 1;
        }

        let horizon_ok = match (q.expiry, chrono::DateTime::from_timestamp_millis(q.ts)) {
            (Some(expiry), Some(obs)) => {
                let days = (expiry - obs.date_naive()).num_days();
                (0..=MAX_EXPIRY_HORIZON_DAYS).contains(&days)
            }
            _ => false,
        };
        if horizon_ok {
            timely += 1;
        } else if q.expiry.is_some() {
            violations.push(format!("quote {i}: expiry outside sensible horizon"));
        }
    }

    QualityScores::from_subscores(
        complete as f64 / total,
        consistent as f64 / total,
        accurate as f64 / total,
        timely as f64 / total,
        violations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, o: f64, h: f64, l: f64, c: f64, v: i64) -> EquityBar {
        EquityBar {
            ticker: "aapl".into(),
            ts,
            o,
            h,
            l,
            c,
            v,
            trades: None,
            vwap: None,
            source: "sqlite".into(),
        }
    }

    #[test]
    fn clean_bars_score_perfect() {
        let bars = vec![
            bar(1_703_980_800_000, 10.0, 12.0, 9.0, 11.0, 100),
            bar(1_703_980_860_000, 11.0, 13.0, 10.0, 12.0, 80),
        ];
        let scores = validate_equity_bars(&bars);
        assert!((scores.overall - 1.0).abs() < f64::EPSILON);
        assert_eq!(scores.grade, "A+");
        assert!(scores.violations.is_empty());
    }

    #[test]
    fn ohlc_violation_lowers_accuracy() {
        let bars = vec![
            bar(1_703_980_800_000, 10.0, 12.0, 9.0, 11.0, 100),
            // low above open
            bar(1_703_980_860_000, 11.0, 13.0, 11.5, 12.0, 80),
        ];
        let scores = validate_equity_bars(&bars);
        assert!(scores.accuracy < 1.0);
        assert!(scores.overall < 1.0);
        assert!(!scores.violations.is_empty());
    }

    #[test]
    fn non_monotonic_timestamps_lower_consistency() {
        let bars = vec![
            bar(1_703_980_860_000, 10.0, 12.0, 9.0, 11.0, 100),
            bar(1_703_980_800_000, 11.0, 13.0, 10.0, 12.0, 80),
        ];
        let scores = validate_equity_bars(&bars);
        assert!(scores.consistency < 1.0);
    }

    #[test]
    fn crossed_quote_is_flagged() {
        // bid=2.50, mid=2.40, ask=2.30: at least one violation, overall < 1
        let quotes = vec![OptionQuote {
            contract: "O:SPX240315C04500000".into(),
            ts: 1_709_251_200_000,
            expiry: NaiveDate::from_ymd_opt(2024, 3, 15),
            option_type: Some(OptionType::Call),
            strike: Some(4500.0),
            bid: Some(2.50),
            mid: Some(2.40),
            ask: Some(2.30),
        }];
        let scores = validate_option_quotes(&quotes);
        assert!(!scores.violations.is_empty());
        assert!(scores.overall < 1.0);
    }

    #[test]
    fn healthy_quote_passes() {
        let quotes = vec![OptionQuote {
            contract: "O:SPX240315C04500000".into(),
            ts: 1_709_251_200_000,
            expiry: NaiveDate::from_ymd_opt(2024, 3, 15),
            option_type: Some(OptionType::Call),
            strike: Some(4500.0),
            bid: Some(2.30),
            mid: Some(2.40),
            ask: Some(2.50),
        }];
        let scores = validate_option_quotes(&quotes);
        assert!((scores.overall - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_identity_lowers_completeness() {
        let quotes = vec![OptionQuote {
            contract: String::new(),
            ts: 1_709_251_200_000,
            ..OptionQuote::default()
        }];
        let scores = validate_option_quotes(&quotes);
        assert!(scores.completeness < 1.0);
    }

    #[test]
    fn grade_ladder_cutoffs() {
        assert_eq!(letter_grade(1.0), "A+");
        assert_eq!(letter_grade(0.95), "A+");
        assert_eq!(letter_grade(0.92), "A");
        assert_eq!(letter_grade(0.81), "B+");
        assert_eq!(letter_grade(0.5), "F");
    }

    #[test]
    fn empty_sets_are_trivially_clean() {
        assert_eq!(validate_equity_bars(&[]).grade, "A+");
        assert_eq!(validate_option_quotes(&[]).grade, "A+");
    }
}
