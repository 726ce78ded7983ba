//! Cycle validation, matchability and settlement amounts
//!
//! Orders in a cycle are index-aligned: order `i` receives from order `i+1`
//! (wrapping), because `order[i].to == order[i+1].from`.

use crate::errors::MatchError;
use crate::fee::AssetAmount;
use num_bigint::BigUint;
use std::collections::HashSet;
use types::order::{Order, TradePair};

/// Largest amount representable on chain.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

/// Trade pairs must chain into exactly one closed cycle of length >= 2
/// with no asset offered twice.
pub fn validate_trade_pairs(pairs: &[TradePair]) -> Result<(), MatchError> {
    if pairs.len() < 2 {
        return Err(MatchError::InvalidTradePairs(format!(
            "need at least 2 trade pairs, got {}",
            pairs.len()
        )));
    }

    let mut from_assets = HashSet::with_capacity(pairs.len());
    for (i, pair) in pairs.iter().enumerate() {
        if pair.from_asset_id == pair.to_asset_id {
            return Err(MatchError::InvalidTradePairs(format!(
                "pair {} trades {} for itself",
                i, pair.from_asset_id
            )));
        }
        if !from_assets.insert(pair.from_asset_id) {
            return Err(MatchError::InvalidTradePairs(format!(
                "asset {} offered twice",
                pair.from_asset_id
            )));
        }
        let next = &pairs[(i + 1) % pairs.len()];
        if pair.to_asset_id != next.from_asset_id {
            return Err(MatchError::InvalidTradePairs(format!(
                "pair {} does not chain into pair {}",
                i,
                (i + 1) % pairs.len()
            )));
        }
    }
    Ok(())
}

/// Whether the cycle clears: the exact product of all ratios is <= 1.
pub fn is_matched(orders: &[Order]) -> bool {
    if orders.len() < 2 || orders.iter().any(|o| !o.has_valid_ratio()) {
        return false;
    }
    let (numerators, denominators) = orders.iter().fold(
        (BigUint::from(1u32), BigUint::from(1u32)),
        |(n, d), o| (n * o.ratio_numerator, d * o.ratio_denominator),
    );
    numerators <= denominators
}

/// Rebuild cycle order starting from the first order, following `to`
/// assets. Fails if some order is not reached or the chain does not close.
pub fn sort_orders(orders: &[Order]) -> Result<Vec<Order>, MatchError> {
    let Some(first) = orders.first() else {
        return Err(MatchError::OpenCycle);
    };

    let mut sorted = Vec::with_capacity(orders.len());
    sorted.push(first.clone());
    while sorted.len() < orders.len() {
        let tail = &sorted[sorted.len() - 1];
        let next = orders
            .iter()
            .find(|o| o.from_asset_id == tail.to_asset_id)
            .ok_or(MatchError::OpenCycle)?;
        if sorted.iter().any(|o| o.key() == next.key()) {
            return Err(MatchError::OpenCycle);
        }
        sorted.push(next.clone());
    }

    if sorted[sorted.len() - 1].to_asset_id != sorted[0].from_asset_id {
        return Err(MatchError::OpenCycle);
    }
    Ok(sorted)
}

/// `floor(amount * numerator / denominator)`, or `None` when the result
/// does not fit an on-chain amount.
pub fn calc_request_amount(amount: u64, numerator: u64, denominator: u64) -> Option<u64> {
    if denominator == 0 {
        return None;
    }
    let request = amount as u128 * numerator as u128 / denominator as u128;
    u64::try_from(request).ok().filter(|r| *r <= MAX_AMOUNT)
}

/// `floor(receive * denominator / numerator)`: what an order must give
/// up to receive `receive`.
pub fn calc_should_pay(receive: u64, numerator: u64, denominator: u64) -> Option<u64> {
    if numerator == 0 {
        return None;
    }
    u64::try_from(receive as u128 * denominator as u128 / numerator as u128).ok()
}

/// Amounts settled by one pass over a sorted cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Gross amount order `i` receives, in its `to` asset.
    pub receives: Vec<AssetAmount>,
    /// Slack between what order `i+1` gives up and what order `i`
    /// receives, in order `i`'s `to` asset.
    pub price_diffs: Vec<AssetAmount>,
    /// Amount of its own `from` asset each order gives up.
    pub consumed: Vec<u64>,
}

impl Settlement {
    /// Unconsumed amount of order `i`.
    pub fn remainder(&self, orders: &[Order], i: usize) -> u64 {
        orders[i].utxo.amount - self.consumed[i]
    }
}

/// Settle a sorted cycle. Returns `None` if any amount overflows or any
/// order would receive nothing.
pub fn calc_settlement(orders: &[Order]) -> Option<Settlement> {
    let len = orders.len();
    if len < 2 {
        return None;
    }

    let mut receives = Vec::with_capacity(len);
    let mut should_pay = Vec::with_capacity(len);
    for (i, order) in orders.iter().enumerate() {
        let opposite = &orders[(i + 1) % len];
        let request = calc_request_amount(
            order.utxo.amount,
            order.ratio_numerator,
            order.ratio_denominator,
        )?;
        let receive = request.min(opposite.utxo.amount);
        if receive == 0 {
            return None;
        }
        receives.push(receive);
        should_pay.push(calc_should_pay(receive, order.ratio_numerator, order.ratio_denominator)?);
    }

    let mut consumed = vec![0u64; len];
    let mut price_diffs = vec![0u64; len];
    for j in 0..len {
        let prev = (j + len - 1) % len;
        // Order j pays order prev; never less than prev receives
        let paid = should_pay[j].max(receives[prev]);
        if paid > orders[j].utxo.amount {
            return None;
        }
        consumed[j] = paid;
        price_diffs[prev] = paid - receives[prev];
    }

    Some(Settlement {
        receives: orders
            .iter()
            .zip(&receives)
            .map(|(o, r)| AssetAmount::new(o.to_asset_id, *r))
            .collect(),
        price_diffs: orders
            .iter()
            .zip(&price_diffs)
            .map(|(o, d)| AssetAmount::new(o.to_asset_id, *d))
            .collect(),
        consumed,
    })
}

/// Index of the most recently created order.
pub fn taker_index(orders: &[Order]) -> usize {
    orders
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.taker_rank().cmp(&b.taker_rank()))
        .map_or(0, |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use types::testing::{btc, eos, eth, order, order_at, OrderSpec};

    fn btc_eth(num: i64, den: i64, amount: u64) -> Order {
        order(OrderSpec::new(btc(), eth(), num, den, amount, 1), 1)
    }

    fn eth_btc(num: i64, den: i64, amount: u64) -> Order {
        order(OrderSpec::new(eth(), btc(), num, den, amount, 2), 2)
    }

    #[test]
    fn test_validate_trade_pairs() {
        let ok = [TradePair::new(btc(), eth()), TradePair::new(eth(), btc())];
        assert!(validate_trade_pairs(&ok).is_ok());

        let ring = [
            TradePair::new(btc(), eth()),
            TradePair::new(eth(), eos()),
            TradePair::new(eos(), btc()),
        ];
        assert!(validate_trade_pairs(&ring).is_ok());

        assert!(validate_trade_pairs(&ok[..1]).is_err());
        let open = [TradePair::new(btc(), eth()), TradePair::new(eth(), eos())];
        assert!(validate_trade_pairs(&open).is_err());
        let repeated = [
            TradePair::new(btc(), eth()),
            TradePair::new(eth(), btc()),
            TradePair::new(btc(), eth()),
            TradePair::new(eth(), btc()),
        ];
        assert!(validate_trade_pairs(&repeated).is_err());
        let same = [TradePair::new(btc(), btc()), TradePair::new(btc(), btc())];
        assert!(validate_trade_pairs(&same).is_err());
    }

    #[test]
    fn test_is_matched_boundary() {
        assert!(is_matched(&[btc_eth(50, 1, 10), eth_btc(1, 50, 500)]));
        assert!(is_matched(&[btc_eth(50, 1, 10), eth_btc(1, 51, 510)]));
        assert!(!is_matched(&[btc_eth(50, 1, 10), eth_btc(1, 49, 490)]));
    }

    #[test]
    fn test_sort_orders_ring() {
        let a = order(OrderSpec::new(btc(), eth(), 1, 1, 10, 1), 1);
        let b = order(OrderSpec::new(eth(), eos(), 1, 1, 10, 2), 2);
        let c = order(OrderSpec::new(eos(), btc(), 1, 1, 10, 3), 3);
        let sorted = sort_orders(&[a.clone(), c.clone(), b.clone()]).unwrap();
        assert_eq!(sorted, vec![a.clone(), b.clone(), c]);
        assert!(matches!(sort_orders(&[a, b]), Err(MatchError::OpenCycle)));
    }

    #[test]
    fn test_request_amount_overflow_is_none() {
        assert_eq!(calc_request_amount(10, 50, 1), Some(500));
        assert_eq!(calc_request_amount(MAX_AMOUNT, 3, 1), None);
        assert_eq!(calc_request_amount(416, 1, 52), Some(8));
    }

    #[test]
    fn test_settlement_full_fill() {
        let orders = [btc_eth(50, 1, 10), eth_btc(1, 51, 510)];
        let s = calc_settlement(&orders).unwrap();
        assert_eq!(s.receives, vec![AssetAmount::new(eth(), 500), AssetAmount::new(btc(), 10)]);
        assert_eq!(s.price_diffs, vec![AssetAmount::new(eth(), 10), AssetAmount::new(btc(), 0)]);
        assert_eq!(s.consumed, vec![10, 510]);
    }

    #[test]
    fn test_settlement_partial_fill() {
        let orders = [btc_eth(50, 1, 10), eth_btc(1, 52, 416)];
        let s = calc_settlement(&orders).unwrap();
        assert_eq!(s.receives, vec![AssetAmount::new(eth(), 416), AssetAmount::new(btc(), 8)]);
        assert_eq!(s.consumed, vec![8, 416]);
        assert_eq!(s.remainder(&orders, 0), 2);
        assert_eq!(s.remainder(&orders, 1), 0);
    }

    #[test]
    fn test_settlement_rejects_zero_receive() {
        let orders = [btc_eth(1, 100, 10), eth_btc(100, 1, 10)];
        assert!(calc_settlement(&orders).is_none());
    }

    #[test]
    fn test_taker_is_latest_created() {
        let early = order_at(OrderSpec::new(btc(), eth(), 50, 1, 10, 1), 1, 5, 3);
        let late = order_at(OrderSpec::new(eth(), btc(), 1, 51, 510, 2), 2, 6, 0);
        assert_eq!(taker_index(&[early.clone(), late.clone()]), 1);
        assert_eq!(taker_index(&[late, early]), 0);
    }

    fn exact_product_le_one(ratios: &[(u64, u64)]) -> bool {
        let mut n = BigUint::from(1u32);
        let mut d = BigUint::from(1u32);
        for (a, b) in ratios {
            n *= *a;
            d *= *b;
        }
        n <= d
    }

    proptest! {
        #[test]
        fn prop_is_matched_is_exact_for_large_ratios(
            n1 in (i64::MAX - 1_000_000)..=i64::MAX,
            d1 in (i64::MAX - 1_000_000)..=i64::MAX,
            n2 in (i64::MAX - 1_000_000)..=i64::MAX,
            d2 in (i64::MAX - 1_000_000)..=i64::MAX,
        ) {
            let orders = [btc_eth(n1, d1, 10), eth_btc(n2, d2, 10)];
            let expected = exact_product_le_one(&[(n1 as u64, d1 as u64), (n2 as u64, d2 as u64)]);
            prop_assert_eq!(is_matched(&orders), expected);
        }

        #[test]
        fn prop_is_matched_ring_of_three(
            ratios in prop::collection::vec((1i64..=i64::MAX, 1i64..=i64::MAX), 3),
        ) {
            let orders = [
                order(OrderSpec::new(btc(), eth(), ratios[0].0, ratios[0].1, 10, 1), 1),
                order(OrderSpec::new(eth(), eos(), ratios[1].0, ratios[1].1, 10, 2), 2),
                order(OrderSpec::new(eos(), btc(), ratios[2].0, ratios[2].1, 10, 3), 3),
            ];
            let exact: Vec<(u64, u64)> = ratios.iter().map(|(n, d)| (*n as u64, *d as u64)).collect();
            prop_assert_eq!(is_matched(&orders), exact_product_le_one(&exact));
        }

        #[test]
        fn prop_settlement_never_overspends(
            n1 in 1i64..10_000, d1 in 1i64..10_000, a1 in 1u64..1_000_000,
            n2 in 1i64..10_000, d2 in 1i64..10_000, a2 in 1u64..1_000_000,
        ) {
            let orders = [btc_eth(n1, d1, a1), eth_btc(n2, d2, a2)];
            prop_assume!(is_matched(&orders));
            if let Some(s) = calc_settlement(&orders) {
                for i in 0..2 {
                    prop_assert!(s.consumed[i] <= orders[i].utxo.amount);
                    let prev = (i + 1) % 2;
                    prop_assert_eq!(s.consumed[i], s.receives[prev].amount + s.price_diffs[prev].amount);
                }
            }
        }
    }
}
