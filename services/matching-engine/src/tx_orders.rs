//! Reading orders and fees out of block transactions

use crate::errors::MovError;
use std::collections::{BTreeMap, HashSet};
use types::errors::TypesError;
use types::ids::AssetId;
use types::order::{Order, OrderKey, TradePair};
use types::program::{
    decode_p2wmc_program, is_cancel_clause_selector, is_p2wmc_program, is_trade_clause_selector,
};
use types::tx::Tx;

/// Spends at least two orders and trades at least one of them.
pub fn is_matched_tx(tx: &Tx) -> bool {
    tx.inputs.len() >= 2
        && tx
            .inputs
            .iter()
            .any(|i| is_p2wmc_program(&i.control_program) && is_trade_clause_selector(i))
}

pub fn is_cancel_order_tx(tx: &Tx) -> bool {
    tx.inputs
        .iter()
        .any(|i| is_p2wmc_program(&i.control_program) && is_cancel_clause_selector(i))
}

/// Orders created by `tx`. Empty contract outputs are skipped.
pub fn add_orders_from_tx(tx: &Tx, block_height: u64, tx_index: u64) -> Result<Vec<Order>, TypesError> {
    let mut orders = Vec::new();
    for (i, output) in tx.outputs.iter().enumerate() {
        if output.amount == 0 || !is_p2wmc_program(&output.control_program) {
            continue;
        }
        orders.push(Order::from_output(tx, i, block_height, tx_index)?);
    }
    Ok(orders)
}

/// Orders spent by `tx`, without their creation position.
pub fn delete_orders_from_tx(tx: &Tx) -> Result<Vec<Order>, TypesError> {
    let mut orders = Vec::new();
    for (i, input) in tx.inputs.iter().enumerate() {
        if is_p2wmc_program(&input.control_program) {
            orders.push(Order::from_input(tx, i)?);
        }
    }
    Ok(orders)
}

/// Trade pair of every input, in input order.
pub fn trade_pairs_from_matched_tx(tx: &Tx) -> Result<Vec<TradePair>, TypesError> {
    tx.inputs
        .iter()
        .map(|input| {
            let args = decode_p2wmc_program(&input.control_program)?;
            Ok(TradePair::new(input.asset_id, args.requested_asset))
        })
        .collect()
}

/// Net order changes of a block: an order both created and spent drops
/// out of both sets. Results are sorted by order key.
pub fn merge_orders(add: Vec<Order>, delete: Vec<Order>) -> (Vec<Order>, Vec<Order>) {
    let mut adds: BTreeMap<OrderKey, Order> = add.into_iter().map(|o| (o.key(), o)).collect();
    let mut deletes: BTreeMap<OrderKey, Order> = delete.into_iter().map(|o| (o.key(), o)).collect();
    adds.retain(|key, _| deletes.remove(key).is_none());
    (adds.into_values().collect(), deletes.into_values().collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedTxFee {
    pub reward_program: Option<Vec<u8>>,
    pub amount: u64,
}

/// Fee charged per asset by a matched tx: what the inputs bring minus
/// what goes back to sellers or into new orders. Every other output of an
/// asset is its fee output, and there may be only one.
pub fn calc_fee_amount(tx: &Tx) -> Result<BTreeMap<AssetId, MatchedTxFee>, MovError> {
    let mut balances: BTreeMap<AssetId, (i128, Option<Vec<u8>>)> = BTreeMap::new();
    let mut deal_programs: HashSet<Vec<u8>> = HashSet::new();

    for input in &tx.inputs {
        let args = decode_p2wmc_program(&input.control_program)?;
        balances.insert(input.asset_id, (i128::from(input.amount), None));
        deal_programs.insert(args.seller_program);
    }

    for output in &tx.outputs {
        let Some(entry) = balances.get_mut(&output.asset_id) else {
            return Err(MovError::RewardProgramIsWrong(format!(
                "output asset {} is not spent by the tx",
                output.asset_id
            )));
        };
        if deal_programs.contains(&output.control_program) || is_p2wmc_program(&output.control_program) {
            entry.0 -= i128::from(output.amount);
        } else if entry.1.is_none() {
            entry.1 = Some(output.control_program.clone());
        } else {
            return Err(MovError::RewardProgramIsWrong("double reward program".into()));
        }
    }

    Ok(balances
        .into_iter()
        .filter(|(_, (amount, _))| *amount > 0)
        .map(|(asset, (amount, reward_program))| {
            let amount = u64::try_from(amount).unwrap_or(u64::MAX);
            (asset, MatchedTxFee { reward_program, amount })
        })
        .collect())
}
