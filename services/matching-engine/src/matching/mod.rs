//! Matching logic module
//!
//! Cycle checks and settlement arithmetic live in `crossing`; turning a
//! settled cycle into a transaction lives in `executor`.

pub mod crossing;
pub mod executor;

pub use crossing::{calc_settlement, is_matched, sort_orders, taker_index, validate_trade_pairs};
pub use executor::{build_matched_tx, MatchedTx, Remainder};
