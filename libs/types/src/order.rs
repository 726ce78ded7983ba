//! Order, trade pair and store-state value types
//!
//! An order is one spendable UTXO locked by a matching-contract program:
//! it offers all of its `FromAsset` amount in exchange for `ToAsset` at the
//! ratio `numerator / denominator` (units of `ToAsset` per unit of
//! `FromAsset`). Ratios are compared and encoded with exact integer
//! arithmetic only.

use crate::ids::{AssetId, Hash};
use crate::tx::output_id;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Length of [`rate_key`] output.
pub const RATE_KEY_LEN: usize = 24;

/// Identity of an order: the output it is locked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey {
    pub source_id: Hash,
    pub source_pos: u64,
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.source_pos)
    }
}

/// The output backing an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovUtxo {
    pub source_id: Hash,
    pub source_pos: u64,
    pub amount: u64,
    pub control_program: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub from_asset_id: AssetId,
    pub to_asset_id: AssetId,
    pub utxo: MovUtxo,
    pub ratio_numerator: u64,
    pub ratio_denominator: u64,
    /// Program receiving the proceeds (and any refunded remainder)
    pub beneficiary_program: Vec<u8>,
    pub block_height: u64,
    pub tx_index: u64,
}

impl Order {
    pub fn key(&self) -> OrderKey {
        OrderKey {
            source_id: self.utxo.source_id,
            source_pos: self.utxo.source_pos,
        }
    }

    pub fn trade_pair(&self) -> TradePair {
        TradePair::new(self.from_asset_id, self.to_asset_id)
    }

    /// Content hash of the backing output. Equals the spent output id of
    /// any input spending it.
    pub fn utxo_hash(&self) -> Hash {
        output_id(
            &self.utxo.source_id,
            self.utxo.source_pos,
            &self.from_asset_id,
            self.utxo.amount,
            &self.utxo.control_program,
        )
    }

    pub fn rate_key(&self) -> [u8; RATE_KEY_LEN] {
        rate_key(self.ratio_numerator, self.ratio_denominator)
    }

    pub fn has_valid_ratio(&self) -> bool {
        self.ratio_numerator > 0 && self.ratio_denominator > 0
    }

    /// Exact comparison of `n1/d1` against `n2/d2`.
    pub fn cmp_rate(&self, other: &Order) -> Ordering {
        let lhs = self.ratio_numerator as u128 * other.ratio_denominator as u128;
        let rhs = other.ratio_numerator as u128 * self.ratio_denominator as u128;
        lhs.cmp(&rhs)
    }

    /// Book priority: lower rate first, utxo hash breaks ties. Matches the
    /// byte order of persisted order keys.
    pub fn cmp_priority(&self, other: &Order) -> Ordering {
        self.cmp_rate(other)
            .then_with(|| self.utxo_hash().cmp(&other.utxo_hash()))
    }

    /// Creation position used to pick the taker; the greatest rank wins.
    pub fn taker_rank(&self) -> (u64, u64, Hash) {
        (self.block_height, self.tx_index, self.utxo_hash())
    }
}

/// Order-preserving exact encoding of `numerator / denominator`.
///
/// Layout: integer part as u64 BE, then the first 128 bits of the binary
/// fraction as u128 BE. For denominators below 2^63 distinct ratios map to
/// distinct keys and equal ratios to equal keys.
pub fn rate_key(numerator: u64, denominator: u64) -> [u8; RATE_KEY_LEN] {
    let mut out = [0u8; RATE_KEY_LEN];
    if denominator == 0 {
        out.fill(0xff);
        return out;
    }

    let integer = numerator / denominator;
    let den = denominator as u128;
    let rem = (numerator % denominator) as u128;

    // rem < den, so each partial quotient fits in 64 bits
    let hi_num = rem << 64;
    let hi = hi_num / den;
    let lo = ((hi_num % den) << 64) / den;
    let fraction = (hi << 64) | lo;

    out[..8].copy_from_slice(&integer.to_be_bytes());
    out[8..].copy_from_slice(&fraction.to_be_bytes());
    out
}

/// One side of a market. `count` is the number of live orders, maintained
/// by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePair {
    pub from_asset_id: AssetId,
    pub to_asset_id: AssetId,
    pub count: u64,
}

impl TradePair {
    pub fn new(from_asset_id: AssetId, to_asset_id: AssetId) -> Self {
        Self {
            from_asset_id,
            to_asset_id,
            count: 0,
        }
    }

    pub fn reverse(&self) -> Self {
        Self::new(self.to_asset_id, self.from_asset_id)
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.from_asset_id, self.to_asset_id)
    }

    /// Same (from, to) regardless of count.
    pub fn same_pair(&self, other: &TradePair) -> bool {
        self.from_asset_id == other.from_asset_id && self.to_asset_id == other.to_asset_id
    }
}

impl fmt::Display for TradePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Chain position the order store has been updated through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovDatabaseState {
    pub height: u64,
    pub hash: Hash,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn order(num: u64, den: u64, seed: u8) -> Order {
        Order {
            from_asset_id: AssetId::new([1; 32]),
            to_asset_id: AssetId::new([2; 32]),
            utxo: MovUtxo {
                source_id: Hash::new([seed; 32]),
                source_pos: 0,
                amount: 10,
                control_program: vec![seed],
            },
            ratio_numerator: num,
            ratio_denominator: den,
            beneficiary_program: vec![0xaa],
            block_height: 1,
            tx_index: 0,
        }
    }

    #[test]
    fn test_rate_key_integer_ratios() {
        assert!(rate_key(1, 1) < rate_key(2, 1));
        assert!(rate_key(50, 1) < rate_key(51, 1));
        assert_eq!(rate_key(2, 4), rate_key(1, 2));
    }

    #[test]
    fn test_rate_key_fractional_ratios() {
        assert!(rate_key(1, 52) < rate_key(1, 51));
        assert!(rate_key(1, 3) < rate_key(1, 2));
        assert!(rate_key(i64::MAX as u64 - 1, i64::MAX as u64) < rate_key(1, 1));
    }

    #[test]
    fn test_cmp_rate_exact() {
        let a = order(1, 3, 1);
        let b = order(2, 6, 2);
        assert_eq!(a.cmp_rate(&b), Ordering::Equal);
        assert_ne!(a.cmp_priority(&b), Ordering::Equal);
    }

    #[test]
    fn test_trade_pair_reverse() {
        let pair = TradePair::new(AssetId::new([1; 32]), AssetId::new([2; 32]));
        let rev = pair.reverse();
        assert_eq!(rev.from_asset_id, pair.to_asset_id);
        assert_eq!(rev.reverse(), pair);
        assert_ne!(rev.key(), pair.key());
    }

    #[test]
    fn test_order_key_display() {
        let o = order(1, 1, 3);
        assert!(o.key().to_string().ends_with(":0"));
    }

    proptest! {
        #[test]
        fn prop_rate_key_matches_exact_order(
            n1 in 1u64..=i64::MAX as u64,
            d1 in 1u64..=i64::MAX as u64,
            n2 in 1u64..=i64::MAX as u64,
            d2 in 1u64..=i64::MAX as u64,
        ) {
            let exact = (n1 as u128 * d2 as u128).cmp(&(n2 as u128 * d1 as u128));
            prop_assert_eq!(rate_key(n1, d1).cmp(&rate_key(n2, d2)), exact);
        }
    }
}
