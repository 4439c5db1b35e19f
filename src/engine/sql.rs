//! Parameterized SQL composition over a bounded set of table-name
//! templates. Every table and alias name comes from the trusted
//! (category, symbol, bucket) key space; user values only ever travel as
//! bound parameters.

use crate::store::schema;

/// Synthetic alias for the i-th attached sibling (1-based).
pub fn attach_alias(i: usize) -> String {
    format!("db{i}")
}

/// One branch of a cross-partition union: an optional database qualifier
/// and the table (or view) name inside it.
#[derive(Debug, Clone)]
pub struct UnionPart {
    pub qualifier: Option<String>,
    pub table: String,
}

impl UnionPart {
    pub fn main(table: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            table: table.into(),
        }
    }

    pub fn attached(i: usize, table: impl Into<String>) -> Self {
        Self {
            qualifier: Some(attach_alias(i)),
            table: table.into(),
        }
    }

    fn qualified(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{q}.{}", self.table),
            None => self.table.clone(),
        }
    }
}

/// `SELECT <select> FROM <part> WHERE <where> UNION ALL ... ORDER BY <order>`
pub fn union_query(
    select: &str,
    parts: &[UnionPart],
    where_clause: &str,
    order_by: &str,
    limit: Option<usize>,
) -> String {
    let mut branches = Vec::with_capacity(parts.len());
    for part in parts {
        branches.push(format!(
            "SELECT {select} FROM {} WHERE {where_clause}",
            part.qualified()
        ));
    }
    let mut sql = branches.join("\nUNION ALL\n");
    if !order_by.is_empty() {
        sql.push_str("\nORDER BY ");
        sql.push_str(order_by);
    }
    if let Some(n) = limit {
        sql.push_str(&format!("\nLIMIT {n}"));
    }
    sql
}

/// Equity range scan over `bars_eq`, one branch per partition.
pub fn equity_range_query(partition_count: usize) -> String {
    let parts = equity_parts(partition_count);
    union_query(
        "ticker, ts, o, h, l, c, v, trades, vwap, source",
        &parts,
        "ticker = :symbol AND ts BETWEEN :from_ms AND :to_ms",
        "ts",
        None,
    )
}

/// Option-bar range scan; the table name differs per monthly partition.
pub fn option_range_query(tables: &[String]) -> String {
    let parts = option_parts(tables);
    union_query(
        "contract, ts, o, h, l, c, v, oi, trades",
        &parts,
        "ts BETWEEN :from_ms AND :to_ms",
        "ts",
        None,
    )
}

/// Options-chain scan: per-month join of aggregates, Greeks and contract
/// metadata, unioned across months. Only rows with a positive underlying
/// reference price survive.
pub fn chain_query(month_keys: &[(i32, u32)], symbol: &str, limit: usize) -> String {
    let mut branches = Vec::with_capacity(month_keys.len());
    for (i, (year, month)) in month_keys.iter().enumerate() {
        let q = if i == 0 {
            String::new()
        } else {
            format!("{}.", attach_alias(i))
        };
        let aggs = schema::op_aggs_table(symbol, *year, *month);
        let greeks = schema::op_greeks_table(symbol, *year, *month);
        let meta = schema::op_meta_table(symbol, *year, *month);
        branches.push(format!(
            "SELECT a.contract, a.ts, m.underlying, m.expiry, m.option_type, m.strike,\n\
             \x20      a.o, a.h, a.l, a.c, a.v, a.oi,\n\
             \x20      g.iv, g.delta, g.gamma, g.theta, g.vega, g.rho, g.ref_px, g.mid_px\n\
             FROM {q}{aggs} a\n\
             JOIN {q}{greeks} g ON g.contract = a.contract AND g.ts = a.ts\n\
             JOIN {q}{meta} m ON m.contract = a.contract\n\
             WHERE a.ts BETWEEN :from_ms AND :to_ms AND g.ref_px > 0"
        ));
    }
    let mut sql = branches.join("\nUNION ALL\n");
    sql.push_str("\nORDER BY a.ts");
    sql.push_str(&format!("\nLIMIT {limit}"));
    sql
}

/// Same-day expiries inside one monthly partition, joined with Greeks and
/// metadata. Feeds the zero-DTE scorer.
pub fn zero_dte_query(symbol: &str, year: i32, month: u32) -> String {
    let aggs = schema::op_aggs_table(symbol, year, month);
    let greeks = schema::op_greeks_table(symbol, year, month);
    let meta = schema::op_meta_table(symbol, year, month);
    format!(
        "SELECT a.contract, a.ts, m.underlying, m.expiry, m.option_type, m.strike,\n\
         \x20      a.o, a.h, a.l, a.c, a.v, a.oi,\n\
         \x20      g.iv, g.delta, g.gamma, g.theta, g.vega, g.rho, g.ref_px, g.mid_px\n\
         FROM {aggs} a\n\
         JOIN {greeks} g ON g.contract = a.contract AND g.ts = a.ts\n\
         JOIN {meta} m ON m.contract = a.contract\n\
         WHERE m.expiry = :expiry AND a.ts BETWEEN :from_ms AND :to_ms AND g.ref_px > 0\n\
         ORDER BY a.ts"
    )
}

/// Session-scoped unified views over the attached sibling set. Recreated
/// whenever the sibling set changes; they hold no state of their own.
pub fn unified_view_ddl(symbol: &str, month_keys: &[(i32, u32)]) -> String {
    let aggs_parts: Vec<UnionPart> = month_keys
        .iter()
        .enumerate()
        .map(|(i, (y, m))| part_for(i, schema::op_aggs_table(symbol, *y, *m)))
        .collect();
    let greeks_parts: Vec<UnionPart> = month_keys
        .iter()
        .enumerate()
        .map(|(i, (y, m))| part_for(i, schema::op_greeks_table(symbol, *y, *m)))
        .collect();
    let aggs_union = aggs_parts
        .iter()
        .map(|p| format!("SELECT * FROM {}", p.qualified()))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    let greeks_union = greeks_parts
        .iter()
        .map(|p| format!("SELECT * FROM {}", p.qualified()))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    format!(
        "DROP VIEW IF EXISTS v_op_aggs_{symbol};\n\
         CREATE TEMP VIEW v_op_aggs_{symbol} AS {aggs_union} ORDER BY ts;\n\
         DROP VIEW IF EXISTS v_op_greeks_{symbol};\n\
         CREATE TEMP VIEW v_op_greeks_{symbol} AS {greeks_union} ORDER BY ts;\n"
    )
}

fn part_for(i: usize, table: String) -> UnionPart {
    if i == 0 {
        UnionPart::main(table)
    } else {
        UnionPart::attached(i, table)
    }
}

fn equity_parts(partition_count: usize) -> Vec<UnionPart> {
    (0..partition_count)
        .map(|i| part_for(i, schema::EQUITY_BARS_TABLE.to_string()))
        .collect()
}

fn option_parts(tables: &[String]) -> Vec<UnionPart> {
    tables
        .iter()
        .enumerate()
        .map(|(i, t)| part_for(i, t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_partition_has_no_union() {
        let sql = equity_range_query(1);
        assert!(!sql.contains("UNION ALL"));
        assert!(sql.contains("ticker = :symbol"));
        assert!(sql.trim_end().ends_with("ORDER BY ts"));
    }

    #[test]
    fn multi_partition_unions_with_aliases() {
        let sql = equity_range_query(3);
        assert_eq!(sql.matches("UNION ALL").count(), 2);
        assert!(sql.contains("FROM db1.bars_eq"));
        assert!(sql.contains("FROM db2.bars_eq"));
        assert!(!sql.contains("db0"));
    }

    #[test]
    fn option_tables_differ_per_branch() {
        let tables = vec![
            "op_aggs_spx_2024_02".to_string(),
            "op_aggs_spx_2024_03".to_string(),
        ];
        let sql = option_range_query(&tables);
        assert!(sql.contains("FROM op_aggs_spx_2024_02"));
        assert!(sql.contains("FROM db1.op_aggs_spx_2024_03"));
    }

    #[test]
    fn chain_query_joins_and_caps() {
        let sql = chain_query(&[(2024, 3)], "spx", 10_000);
        assert!(sql.contains("JOIN op_iv_greeks_spx_2024_03 g"));
        assert!(sql.contains("g.ref_px > 0"));
        assert!(sql.contains("LIMIT 10000"));
    }

    #[test]
    fn values_only_travel_as_parameters() {
        let sql = chain_query(&[(2024, 3), (2024, 4)], "spx", 10_000);
        assert!(sql.contains(":from_ms"));
        assert!(sql.contains(":to_ms"));
        // no quoted literals anywhere in the composed text
        assert!(!sql.contains('\''));
    }

    #[test]
    fn unified_views_cover_sibling_set() {
        let ddl = unified_view_ddl("spx", &[(2024, 2), (2024, 3)]);
        assert!(ddl.contains("CREATE TEMP VIEW v_op_aggs_spx"));
        assert!(ddl.contains("db1.op_aggs_spx_2024_03"));
        assert!(ddl.contains("CREATE TEMP VIEW v_op_greeks_spx"));
    }
}
