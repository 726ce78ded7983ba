//! Types library for the on-ledger order matching subsystem
//!
//! Value types shared by the order store and the matching engine. All
//! identity and ordering rules here are deterministic so every node derives
//! the same order book from the same chain state.
//!
//! # Modules
//! - `ids`: 32-byte identifiers (AssetId, Hash)
//! - `order`: Order, TradePair, MovDatabaseState and the exact rate key
//! - `tx`: Transaction, input/output and block header primitives
//! - `program`: Matching-contract program codec and spend arguments
//! - `errors`: Error taxonomy

pub mod errors;
pub mod ids;
pub mod order;
pub mod program;
pub mod tx;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::order::*;
    pub use crate::program::*;
    pub use crate::tx::*;
}
