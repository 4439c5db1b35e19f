pub mod ingest;
pub mod query;
pub mod rows;
pub mod sql;

pub use ingest::{IngestReport, Ingestor};
pub use query::{
    BarSource, ChainParams, ChainResult, Opportunity, QueryEngine, RangeParams, RangeScan,
    ScanInfo, SelectionRule, ZeroDteParams, CHAIN_ROW_CAP,
};
pub use rows::{ChainRow, EquityBar, GreeksRow, OptionBar, RegimeBar};
