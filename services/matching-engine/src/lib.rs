//! On-ledger order matching
//!
//! Standing orders are UTXOs locked by a matching contract. This crate
//! merges persisted and in-flight orders into a per-pair order book, finds
//! closed trade cycles whose rates clear, and builds the matched
//! transactions that settle them, fees included.
//!
//! **Entry points:**
//! - [`MovCore`]: apply, detach and validate blocks; propose matched txs
//! - [`Engine`]: match one cycle of trade pairs at a time
//! - [`MatchCollector`]: match all pairs concurrently within a gas budget
//!
//! **Key Invariants:**
//! - Rates are compared exactly, never in floating point
//! - Every matched tx conserves value per asset
//! - Validation replays in block order and does not depend on scheduling

pub mod book;
pub mod collector;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fee;
pub mod matching;
pub mod mov_core;
pub mod tx_orders;

pub use book::OrderBook;
pub use collector::{Collected, MatchCollector};
pub use config::{MovConfig, RewardProgram};
pub use engine::{matched_tx_gas, Engine};
pub use errors::{FeeError, MatchError, MovError};
pub use fee::{AllocatedAssets, AssetAmount, DefaultFeeStrategy, FeeStrategy, ZeroFeeStrategy};
pub use mov_core::{MovCore, TxVerifyResult};
