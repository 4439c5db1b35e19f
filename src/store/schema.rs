//! Idempotent per-category DDL, plus the table-name templates derived from
//! the trusted (symbol, bucket) key space. DDL hashes are recorded in the
//! manifest so schema drift stays detectable.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::error::Result;

pub const EQUITY_BARS_TABLE: &str = "bars_eq";
pub const EQUITY_5M_VIEW: &str = "v_bars_eq_5m";

pub fn op_aggs_table(symbol: &str, year: i32, month: u32) -> String {
    format!("op_aggs_{symbol}_{year}_{month:02}")
}

pub fn op_greeks_table(symbol: &str, year: i32, month: u32) -> String {
    format!("op_iv_greeks_{symbol}_{year}_{month:02}")
}

pub fn op_meta_table(symbol: &str, year: i32, month: u32) -> String {
    format!("op_meta_{symbol}_{year}_{month:02}")
}

pub fn op_summary_table(symbol: &str, year: i32, month: u32) -> String {
    format!("op_greeks_summary_{symbol}_{year}_{month:02}")
}

/// Equity-family DDL: the bars table, its indexes and the 5-minute rollup
/// view. Bucket boundaries are `ts / 300000`; open/close come from the
/// first/last row within the bucket, vwap is volume-weighted.
pub fn equity_ddl() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {t} (\n\
         \x20   ticker     TEXT NOT NULL,\n\
         \x20   ts         INTEGER NOT NULL,\n\
         \x20   o          REAL NOT NULL,\n\
         \x20   h          REAL NOT NULL,\n\
         \x20   l          REAL NOT NULL,\n\
         \x20   c          REAL NOT NULL,\n\
         \x20   v          INTEGER NOT NULL CHECK(v >= 0),\n\
         \x20   trades     INTEGER,\n\
         \x20   vwap       REAL,\n\
         \x20   source     TEXT NOT NULL DEFAULT '',\n\
         \x20   created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),\n\
         \x20   PRIMARY KEY (ticker, ts)\n\
         ) WITHOUT ROWID;\n\
         CREATE INDEX IF NOT EXISTS idx_{t}_ts ON {t}(ts);\n\
         CREATE INDEX IF NOT EXISTS idx_{t}_ticker_ts ON {t}(ticker, ts);\n\
         CREATE VIEW IF NOT EXISTS {view} AS\n\
         SELECT ticker, bucket_ts AS ts, o, h, l, c, v, vwap\n\
         FROM (\n\
         \x20   SELECT ticker,\n\
         \x20          (ts / 300000) * 300000 AS bucket_ts,\n\
         \x20          FIRST_VALUE(o) OVER w AS o,\n\
         \x20          MAX(h) OVER w AS h,\n\
         \x20          MIN(l) OVER w AS l,\n\
         \x20          LAST_VALUE(c) OVER w AS c,\n\
         \x20          SUM(v) OVER w AS v,\n\
         \x20          SUM(COALESCE(vwap, c) * v) OVER w / NULLIF(SUM(v) OVER w, 0) AS vwap,\n\
         \x20          ROW_NUMBER() OVER w AS rn\n\
         \x20   FROM {t}\n\
         \x20   WINDOW w AS (PARTITION BY ticker, ts / 300000 ORDER BY ts\n\
         \x20                ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING)\n\
         )\n\
         WHERE rn = 1;\n",
        t = EQUITY_BARS_TABLE,
        view = EQUITY_5M_VIEW,
    )
}

/// Options DDL for one monthly partition: the aggregates table, the sibling
/// Greeks relation, per-month contract metadata and the trade-date summary.
pub fn options_ddl(symbol: &str, year: i32, month: u32) -> String {
    let aggs = op_aggs_table(symbol, year, month);
    let greeks = op_greeks_table(symbol, year, month);
    let meta = op_meta_table(symbol, year, month);
    let summary = op_summary_table(symbol, year, month);
    format!(
        "CREATE TABLE IF NOT EXISTS {aggs} (\n\
         \x20   contract TEXT NOT NULL,\n\
         \x20   ts       INTEGER NOT NULL,\n\
         \x20   o        REAL NOT NULL,\n\
         \x20   h        REAL NOT NULL,\n\
         \x20   l        REAL NOT NULL,\n\
         \x20   c        REAL NOT NULL,\n\
         \x20   v        INTEGER NOT NULL CHECK(v >= 0),\n\
         \x20   oi       INTEGER,\n\
         \x20   trades   INTEGER,\n\
         \x20   PRIMARY KEY (contract, ts)\n\
         );\n\
         CREATE INDEX IF NOT EXISTS idx_{aggs}_ts ON {aggs}(ts);\n\
         CREATE INDEX IF NOT EXISTS idx_{aggs}_contract ON {aggs}(contract);\n\
         CREATE TABLE IF NOT EXISTS {greeks} (\n\
         \x20   contract   TEXT NOT NULL,\n\
         \x20   ts         INTEGER NOT NULL,\n\
         \x20   iv         REAL NOT NULL,\n\
         \x20   delta      REAL NOT NULL,\n\
         \x20   gamma      REAL NOT NULL,\n\
         \x20   theta      REAL NOT NULL,\n\
         \x20   vega       REAL NOT NULL,\n\
         \x20   rho        REAL NOT NULL,\n\
         \x20   ref_px     REAL NOT NULL,\n\
         \x20   mid_px     REAL NOT NULL,\n\
         \x20   bid        REAL,\n\
         \x20   ask        REAL,\n\
         \x20   spread_pct REAL,\n\
         \x20   PRIMARY KEY (contract, ts)\n\
         );\n\
         CREATE INDEX IF NOT EXISTS idx_{greeks}_ts ON {greeks}(ts);\n\
         CREATE INDEX IF NOT EXISTS idx_{greeks}_contract ON {greeks}(contract);\n\
         CREATE TABLE IF NOT EXISTS {meta} (\n\
         \x20   contract    TEXT PRIMARY KEY,\n\
         \x20   underlying  TEXT NOT NULL,\n\
         \x20   expiry      TEXT NOT NULL,\n\
         \x20   option_type TEXT NOT NULL CHECK(option_type IN ('CALL','PUT')),\n\
         \x20   strike      REAL NOT NULL CHECK(strike > 0)\n\
         );\n\
         CREATE TABLE IF NOT EXISTS {summary} (\n\
         \x20   trade_date    TEXT PRIMARY KEY,\n\
         \x20   contracts     INTEGER NOT NULL,\n\
         \x20   row_count     INTEGER NOT NULL,\n\
         \x20   avg_iv        REAL,\n\
         \x20   avg_abs_delta REAL,\n\
         \x20   avg_gamma     REAL,\n\
         \x20   avg_vega      REAL,\n\
         \x20   avg_theta     REAL\n\
         );\n"
    )
}

/// SHA-256 of the DDL bytes, base64-encoded, for manifest provenance.
pub fn schema_hash(ddl: &str) -> String {
    let digest = Sha256::digest(ddl.as_bytes());
    BASE64.encode(digest)
}

pub fn apply(conn: &Connection, ddl: &str) -> Result<()> {
    conn.execute_batch(ddl)?;
    Ok(())
}
