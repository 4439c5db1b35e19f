pub mod bs;
pub mod occ;
pub mod pipeline;

pub use bs::{bs_price, greeks, implied_vol, norm_cdf, norm_pdf, Greeks};
pub use occ::{format_occ, parse_occ, OccContract, OptionType};
pub use pipeline::{BatchOutcome, BatchRequest, GreeksPipeline};
