//! OCC-style contract identifiers: `O:<UNDERLYING><YYMMDD><C|P><STRIKE*1000,
//! 8 digits>`. Parsing returns a reason on failure so callers can skip the
//! observation rather than abort a batch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            OptionType::Call => "CALL",
            OptionType::Put => "PUT",
        }
    }

    pub fn letter(self) -> char {
        match self {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccContract {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub strike: f64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("bad OCC symbol {symbol:?}: {reason}")]
pub struct OccParseError {
    pub symbol: String,
    pub reason: String,
}

fn err(symbol: &str, reason: impl Into<String>) -> OccParseError {
    OccParseError {
        symbol: symbol.to_string(),
        reason: reason.into(),
    }
}

/// Parse an OCC symbol. The expiration is the last 6-digit run followed by
/// `C` or `P` and exactly 8 trailing digits; everything before it is the
/// underlying.
pub fn parse_occ(symbol: &str) -> Result<OccContract, OccParseError> {
    let body = symbol
        .strip_prefix("O:")
        .ok_or_else(|| err(symbol, "missing O: prefix"))?;
    if !body.is_ascii() {
        return Err(err(symbol, "non-ASCII symbol"));
    }
    let bytes = body.as_bytes();
    // <underlying:1..><yymmdd:6><C|P:1><strike:8>
    if bytes.len() < 1 + 6 + 1 + 8 {
        return Err(err(symbol, "too short"));
    }
    let strike_digits = &body[bytes.len() - 8..];
    if !strike_digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err(symbol, "strike is not 8 digits"));
    }
    let type_char = bytes[bytes.len() - 9];
    let option_type = match type_char {
        b'C' => OptionType::Call,
        b'P' => OptionType::Put,
        other => {
            return Err(err(
                symbol,
                format!("expected C or P before strike, found {:?}", other as char),
            ))
        }
    };
    let date_start = bytes.len() - 9 - 6;
    let date_digits = &body[date_start..bytes.len() - 9];
    if !date_digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err(symbol, "expiration is not 6 digits"));
    }
    let underlying = &body[..date_start];
    if underlying.is_empty() {
        return Err(err(symbol, "empty underlying"));
    }
    if !underlying.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(err(symbol, "underlying is not alphanumeric"));
    }

    let yy: i32 = date_digits[0..2].parse().map_err(|_| err(symbol, "bad year"))?;
    let mm: u32 = date_digits[2..4].parse().map_err(|_| err(symbol, "bad month"))?;
    let dd: u32 = date_digits[4..6].parse().map_err(|_| err(symbol, "bad day"))?;
    let expiry = NaiveDate::from_ymd_opt(2000 + yy, mm, dd)
        .ok_or_else(|| err(symbol, format!("invalid expiration {yy:02}{mm:02}{dd:02}")))?;

    let strike_milli: i64 = strike_digits
        .parse()
        .map_err(|_| err(symbol, "bad strike"))?;
    if strike_milli == 0 {
        return Err(err(symbol, "zero strike"));
    }

    Ok(OccContract {
        underlying: underlying.to_string(),
        expiry,
        option_type,
        strike: strike_milli as f64 / 1000.0,
    })
}

/// Format the canonical OCC symbol; `parse_occ(format_occ(c)) == c` for
/// every well-formed contract.
pub fn format_occ(contract: &OccContract) -> String {
    format!(
        "O:{}{}{}{:08}",
        contract.underlying,
        contract.expiry.format("%y%m%d"),
        contract.option_type.letter(),
        (contract.strike * 1000.0).round() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_weekly_spx_contract() {
        let c = parse_occ("O:SPXW240830C05500000").unwrap();
        assert_eq!(c.underlying, "SPXW");
        assert_eq!(c.expiry, d(2024, 8, 30));
        assert_eq!(c.option_type, OptionType::Call);
        assert!((c.strike - 5500.0).abs() < 1e-10);
    }

    #[test]
    fn parses_put_with_fractional_strike() {
        let c = parse_occ("O:AAPL231117P00172500").unwrap();
        assert_eq!(c.underlying, "AAPL");
        assert_eq!(c.expiry, d(2023, 11, 17));
        assert_eq!(c.option_type, OptionType::Put);
        assert!((c.strike - 172.5).abs() < 1e-10);
    }

    #[test]
    fn round_trips_formatter_output() {
        for sym in [
            "O:SPXW240830C05500000",
            "O:SPX240315C04500000",
            "O:AAPL231117P00172500",
            "O:QQQ5250620P00400250",
        ] {
            let c = parse_occ(sym).unwrap();
            assert_eq!(format_occ(&c), sym, "round trip failed for {sym}");
        }
    }

    #[test]
    fn underlying_with_trailing_digit_survives() {
        // digits in the root must not be confused with the expiration
        let c = parse_occ("O:BRK1240315C00400000").unwrap();
        assert_eq!(c.underlying, "BRK1");
        assert_eq!(c.expiry, d(2024, 3, 15));
    }

    #[test]
    fn rejects_malformed_symbols() {
        for sym in [
            "",
            "SPX240315C04500000",     // no prefix
            "O:240315C04500000",      // empty underlying
            "O:SPX240315X04500000",   // bad type letter
            "O:SPX240315C0450000",    // 7-digit strike
            "O:SPX241315C04500000",   // month 13
            "O:SPX240315C00000000",   // zero strike
            "O:SPXC04500000",         // missing expiration
            "O:SPÜ240315C04500000",   // non-ASCII root
        ] {
            assert!(parse_occ(sym).is_err(), "expected failure for {sym:?}");
        }
    }

    #[test]
    fn parse_error_carries_reason() {
        let e = parse_occ("O:SPX240315X04500000").unwrap_err();
        assert!(e.reason.contains("C or P"), "{}", e.reason);
    }
}
