mod common;

use common::{d, ms, op_bar, test_engine};
use tickvault::engine::{ChainParams, ZeroDteParams};
use tickvault::greeks::OptionType;
use tickvault::store::ConnectionPool;

const SPX_MAR_CALL: &str = "O:SPX240315C04500000";

/// Insert a Greeks sibling row directly into the monthly partition.
fn insert_greeks_row(
    t: &common::TestEngine,
    table: &str,
    contract: &str,
    ts: i64,
    iv: f64,
    delta: f64,
    ref_px: f64,
) {
    let path = t.tmp.path().join("options/options_spx_2024_03.db");
    let handle = t.store.pool.acquire(&path).unwrap();
    let conn = ConnectionPool::lock(&handle).unwrap();
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {table} \
             (contract, ts, iv, delta, gamma, theta, vega, rho, ref_px, mid_px) \
             VALUES (?1, ?2, ?3, ?4, 0.001, -0.5, 1.2, 0.3, ?5, 12.0)"
        ),
        rusqlite::params![contract, ts, iv, delta, ref_px],
    )
    .unwrap();
}

/// One contract in one monthly shard, joined across the aggregates and
/// Greeks relations.
#[test]
fn chain_joins_bars_with_greeks() {
    let t = test_engine();
    let ts = ms(2024, 3, 8, 15, 30);
    t.ingestor
        .ingest_option_bars("SPX", &[op_bar(SPX_MAR_CALL, ts, 11.0, 13.0, 10.0, 12.0, 250)])
        .unwrap();
    insert_greeks_row(&t, "op_iv_greeks_spx_2024_03", SPX_MAR_CALL, ts, 0.25, 0.48, 4510.0);

    let chain = t
        .engine
        .options_chain(&ChainParams {
            underlying: "SPX".to_string(),
            from: d(2024, 3, 1),
            to: d(2024, 3, 15),
            atm_window: 10,
            dte_focus: vec![0, 1, 7],
        })
        .unwrap();

    assert_eq!(chain.rows.len(), 1);
    let row = &chain.rows[0];
    assert_eq!(row.contract, SPX_MAR_CALL);
    assert!(row.underlying_price > 0.0);
    assert_eq!(row.option_type, OptionType::Call);
    assert!((row.strike - 4500.0).abs() < 1e-9);
    assert_eq!(row.expiry, "2024-03-15");
    assert!((row.iv - 0.25).abs() < 1e-9);
    assert!(!chain.truncated);
    assert_eq!(chain.rule.atm_window_strikes, 10);
    assert_eq!(chain.rule.dte_focus, vec![0, 1, 7]);
}

/// A Greeks row with zero reference price never reaches the chain.
#[test]
fn chain_drops_rows_without_underlying_price() {
    let t = test_engine();
    let ts = ms(2024, 3, 8, 15, 30);
    t.ingestor
        .ingest_option_bars("SPX", &[op_bar(SPX_MAR_CALL, ts, 11.0, 13.0, 10.0, 12.0, 250)])
        .unwrap();
    insert_greeks_row(&t, "op_iv_greeks_spx_2024_03", SPX_MAR_CALL, ts, 0.25, 0.48, 0.0);

    let chain = t
        .engine
        .options_chain(&ChainParams {
            underlying: "SPX".to_string(),
            from: d(2024, 3, 1),
            to: d(2024, 3, 15),
            atm_window: 10,
            dte_focus: vec![],
        })
        .unwrap();
    assert!(chain.rows.is_empty());
}

#[test]
fn chain_spans_monthly_shards() {
    let t = test_engine();
    let feb_contract = "O:SPX240215C04500000";
    let feb_ts = ms(2024, 2, 9, 15, 30);
    let mar_ts = ms(2024, 3, 8, 15, 30);
    t.ingestor
        .ingest_option_bars(
            "SPX",
            &[
                op_bar(feb_contract, feb_ts, 11.0, 13.0, 10.0, 12.0, 100),
                op_bar(SPX_MAR_CALL, mar_ts, 11.0, 13.0, 10.0, 12.0, 100),
            ],
        )
        .unwrap();
    // sibling Greeks rows in each monthly shard
    {
        let path = t.tmp.path().join("options/options_spx_2024_02.db");
        let handle = t.store.pool.acquire(&path).unwrap();
        let conn = ConnectionPool::lock(&handle).unwrap();
        conn.execute(
            "INSERT INTO op_iv_greeks_spx_2024_02 \
             (contract, ts, iv, delta, gamma, theta, vega, rho, ref_px, mid_px) \
             VALUES (?1, ?2, 0.22, 0.5, 0.001, -0.4, 1.0, 0.2, 4490.0, 12.0)",
            rusqlite::params![feb_contract, feb_ts],
        )
        .unwrap();
    }
    insert_greeks_row(&t, "op_iv_greeks_spx_2024_03", SPX_MAR_CALL, mar_ts, 0.25, 0.48, 4510.0);

    let chain = t
        .engine
        .options_chain(&ChainParams {
            underlying: "SPX".to_string(),
            from: d(2024, 2, 1),
            to: d(2024, 3, 31),
            atm_window: 10,
            dte_focus: vec![],
        })
        .unwrap();
    assert_eq!(chain.rows.len(), 2);
    // ts-ascending across shards
    assert!(chain.rows[0].ts < chain.rows[1].ts);
    assert_eq!(chain.rows[0].contract, feb_contract);
    assert_eq!(chain.info.partitions_hit, 2);
}

#[test]
fn zero_dte_scan_ranks_same_day_expiries() {
    let t = test_engine();
    let day = d(2024, 3, 15);
    let ts = ms(2024, 3, 15, 14, 0);
    // expires today: eligible; the April contract must be ignored
    let today_atm = "O:SPX240315C04500000";
    let today_wing = "O:SPX240315C04700000";
    let next_month = "O:SPX240419C04500000";
    t.ingestor
        .ingest_option_bars(
            "SPX",
            &[
                op_bar(today_atm, ts, 11.0, 13.0, 10.0, 12.0, 5_000),
                op_bar(today_wing, ts, 1.0, 1.4, 0.8, 1.2, 300),
                op_bar(next_month, ts, 40.0, 44.0, 39.0, 42.0, 9_000),
            ],
        )
        .unwrap();
    insert_greeks_row(&t, "op_iv_greeks_spx_2024_03", today_atm, ts, 0.21, 0.51, 4505.0);
    insert_greeks_row(&t, "op_iv_greeks_spx_2024_03", today_wing, ts, 0.35, 0.08, 4505.0);
    insert_greeks_row(&t, "op_iv_greeks_spx_2024_03", next_month, ts, 0.19, 0.55, 4505.0);

    let opportunities = t
        .engine
        .zero_dte_scan(&ZeroDteParams {
            underlyings: vec!["SPX".to_string()],
            trading_day: day,
            max_opportunities: 10,
        })
        .unwrap();

    assert_eq!(opportunities.len(), 2);
    // the liquid at-the-money contract outranks the wing
    assert_eq!(opportunities[0].contract, today_atm);
    assert!(opportunities[0].score > opportunities[1].score);
    assert!(opportunities.iter().all(|o| o.expiry == "2024-03-15"));
}

#[test]
fn focused_chain_respects_dte_and_atm_window() {
    let t = test_engine();
    let near = "O:SPX240315C04500000"; // expires Mar 15
    let far = "O:SPX240328C04500000"; // expires Mar 28
    let ts = ms(2024, 3, 14, 15, 30); // DTE 1 and 14
    t.ingestor
        .ingest_option_bars(
            "SPX",
            &[
                op_bar(near, ts, 11.0, 13.0, 10.0, 12.0, 100),
                op_bar(far, ts, 25.0, 27.0, 24.0, 26.0, 100),
            ],
        )
        .unwrap();
    insert_greeks_row(&t, "op_iv_greeks_spx_2024_03", near, ts, 0.25, 0.5, 4500.0);
    insert_greeks_row(&t, "op_iv_greeks_spx_2024_03", far, ts, 0.24, 0.52, 4500.0);

    let chain = t
        .engine
        .options_chain(&ChainParams {
            underlying: "SPX".to_string(),
            from: d(2024, 3, 14),
            to: d(2024, 3, 14),
            atm_window: 10,
            dte_focus: vec![0, 1, 7],
        })
        .unwrap();
    assert_eq!(chain.rows.len(), 2);
    let focused = chain.focused();
    assert_eq!(focused.len(), 1);
    assert_eq!(focused[0].contract, near);
}
