//! Matched transaction construction
//!
//! Output layout, in cycle order:
//! - per order: the payout to its beneficiary, followed by either a
//!   re-order (remainder re-locked under the original program) or a refund
//!   of a remainder too small to request anything
//! - then one fee output per asset with a non-zero fee, to the reward program

use crate::errors::MatchError;
use crate::fee::AllocatedAssets;
use crate::matching::crossing::{calc_request_amount, Settlement};
use types::order::Order;
use types::program::{full_trade_arguments, partial_trade_arguments};
use types::tx::{Tx, TxInput, TxOutput};

/// What happens to an order's unconsumed amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remainder {
    None,
    /// Re-locked at this output index as a new order.
    ReOrder(usize),
    /// Paid back to the beneficiary at this output index.
    Refund(usize),
}

/// A matched transaction plus where each order's remainder went.
#[derive(Debug, Clone)]
pub struct MatchedTx {
    pub tx: Tx,
    /// Index-aligned with the sorted orders.
    pub remainders: Vec<Remainder>,
}

impl MatchedTx {
    /// Re-orders as new orders, inheriting the spent order's creation position.
    pub fn re_orders(&self, orders: &[Order]) -> Result<Vec<Order>, MatchError> {
        let mut out = Vec::new();
        for (order, remainder) in orders.iter().zip(&self.remainders) {
            if let Remainder::ReOrder(index) = remainder {
                out.push(Order::from_output(
                    &self.tx,
                    *index,
                    order.block_height,
                    order.tx_index,
                )?);
            }
        }
        Ok(out)
    }
}

/// Build the matched transaction for a sorted, settled cycle.
pub fn build_matched_tx(
    orders: &[Order],
    settlement: &Settlement,
    allocated: &AllocatedAssets,
    reward_program: &[u8],
) -> Result<MatchedTx, MatchError> {
    if orders.len() != allocated.receives.len() || orders.len() != settlement.consumed.len() {
        return Err(MatchError::OrderBookInconsistent(format!(
            "{} orders but {} allocations",
            orders.len(),
            allocated.receives.len()
        )));
    }

    let mut inputs: Vec<TxInput> = Vec::with_capacity(orders.len());
    let mut outputs: Vec<TxOutput> = Vec::with_capacity(orders.len() * 2 + orders.len());
    let mut remainders = Vec::with_capacity(orders.len());

    for (i, order) in orders.iter().enumerate() {
        let payout = allocated.receives[i].amount;
        let position = outputs.len();
        outputs.push(TxOutput::new(
            order.to_asset_id,
            payout,
            order.beneficiary_program.clone(),
        ));

        let remainder = settlement.remainder(orders, i);
        let requestable = calc_request_amount(remainder, order.ratio_numerator, order.ratio_denominator)
            .is_some_and(|r| r >= 1);

        let (arguments, kind) = if remainder == 0 {
            (full_trade_arguments(position as u64), Remainder::None)
        } else if requestable {
            outputs.push(TxOutput::new(
                order.from_asset_id,
                remainder,
                order.utxo.control_program.clone(),
            ));
            // The contract checks the gross receive, before the fee split
            (
                partial_trade_arguments(settlement.receives[i].amount, position as u64),
                Remainder::ReOrder(position + 1),
            )
        } else {
            outputs.push(TxOutput::new(
                order.from_asset_id,
                remainder,
                order.beneficiary_program.clone(),
            ));
            (full_trade_arguments(position as u64), Remainder::Refund(position + 1))
        };

        inputs.push(order.spend_input(arguments));
        remainders.push(kind);
    }

    for fee in &allocated.fees {
        if fee.amount > 0 {
            outputs.push(TxOutput::new(fee.asset_id, fee.amount, reward_program.to_vec()));
        }
    }

    Ok(MatchedTx {
        tx: Tx::new(inputs, outputs),
        remainders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee::{DefaultFeeStrategy, FeeStrategy};
    use crate::matching::crossing::{calc_settlement, taker_index};
    use std::collections::BTreeMap;
    use types::ids::AssetId;
    use types::program::{as_int64, is_full_trade_clause_selector, is_partial_trade_clause_selector};
    use types::testing::{btc, eth, order_at, reward_program, OrderSpec};

    fn build(orders: &[Order]) -> MatchedTx {
        let settlement = calc_settlement(orders).unwrap();
        let allocated = DefaultFeeStrategy::default().allocate(
            &settlement.receives,
            &settlement.price_diffs,
            taker_index(orders),
        );
        build_matched_tx(orders, &settlement, &allocated, &reward_program()).unwrap()
    }

    fn totals(tx: &Tx) -> (BTreeMap<AssetId, u64>, BTreeMap<AssetId, u64>) {
        let mut ins = BTreeMap::new();
        let mut outs = BTreeMap::new();
        for i in &tx.inputs {
            *ins.entry(i.asset_id).or_default() += i.amount;
        }
        for o in &tx.outputs {
            *outs.entry(o.asset_id).or_default() += o.amount;
        }
        (ins, outs)
    }

    #[test]
    fn test_full_match_layout() {
        let o1 = order_at(OrderSpec::new(btc(), eth(), 50, 1, 10, 1), 1, 1, 0);
        let o2 = order_at(OrderSpec::new(eth(), btc(), 1, 51, 510, 2), 2, 1, 1);
        let m = build(&[o1.clone(), o2.clone()]);

        let amounts: Vec<(AssetId, u64)> = m.tx.outputs.iter().map(|o| (o.asset_id, o.amount)).collect();
        assert_eq!(amounts, vec![(eth(), 499), (btc(), 9), (eth(), 11), (btc(), 1)]);
        assert_eq!(m.tx.outputs[0].control_program, o1.beneficiary_program);
        assert_eq!(m.tx.outputs[2].control_program, reward_program());
        assert!(m.tx.inputs.iter().all(is_full_trade_clause_selector));
        assert_eq!(m.remainders, vec![Remainder::None, Remainder::None]);
        assert!(m.re_orders(&[o1, o2]).unwrap().is_empty());

        let (ins, outs) = totals(&m.tx);
        assert_eq!(ins, outs);
    }

    #[test]
    fn test_partial_match_emits_re_order() {
        let o1 = order_at(OrderSpec::new(btc(), eth(), 50, 1, 10, 1), 1, 3, 2);
        let o3 = order_at(OrderSpec::new(eth(), btc(), 1, 52, 416, 3), 3, 4, 0);
        let orders = [o1.clone(), o3];
        let m = build(&orders);

        let amounts: Vec<(AssetId, u64)> = m.tx.outputs.iter().map(|o| (o.asset_id, o.amount)).collect();
        assert_eq!(
            amounts,
            vec![(eth(), 415), (btc(), 2), (btc(), 7), (eth(), 1), (btc(), 1)]
        );
        assert_eq!(m.tx.outputs[1].control_program, o1.utxo.control_program);
        assert!(is_partial_trade_clause_selector(&m.tx.inputs[0]));
        assert!(is_full_trade_clause_selector(&m.tx.inputs[1]));
        // Receive argument is the gross 416, the payout is 415 after the fee
        assert_eq!(as_int64(&m.tx.inputs[0].arguments[0]).unwrap(), 416);
        assert_eq!(as_int64(&m.tx.inputs[0].arguments[1]).unwrap(), 0);

        let re = m.re_orders(&orders).unwrap();
        assert_eq!(re.len(), 1);
        assert_eq!(re[0].utxo.amount, 2);
        assert_eq!((re[0].block_height, re[0].tx_index), (3, 2));
        assert_eq!(re[0].cmp_rate(&o1), std::cmp::Ordering::Equal);

        let (ins, outs) = totals(&m.tx);
        assert_eq!(ins, outs);
    }

    #[test]
    fn test_dust_remainder_is_refunded() {
        // 3 ETH at 1/2 requests 1 BTC; the counter order only takes 2 ETH
        let o1 = order_at(OrderSpec::new(eth(), btc(), 1, 2, 3, 1), 1, 1, 0);
        let o2 = order_at(OrderSpec::new(btc(), eth(), 2, 1, 1, 2), 2, 1, 1);
        let orders = [o1.clone(), o2];
        let settlement = calc_settlement(&orders).unwrap();
        assert_eq!(settlement.remainder(&orders, 0), 1);

        let m = build(&orders);
        assert!(matches!(m.remainders[0], Remainder::Refund(1)));
        assert_eq!(m.tx.outputs[1].control_program, o1.beneficiary_program);
        let (ins, outs) = totals(&m.tx);
        assert_eq!(ins, outs);
    }
}
