//! Matching engine
//!
//! Turns the best orders of a closed cycle of trade pairs into one matched
//! transaction at a time, updating the order book as it goes.

use crate::book::OrderBook;
use crate::errors::MatchError;
use crate::fee::FeeStrategy;
use crate::matching::{build_matched_tx, calc_settlement, is_matched, sort_orders, taker_index, validate_trade_pairs};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use types::errors::TypesError;
use types::order::TradePair;
use types::tx::Tx;

pub struct Engine {
    order_book: OrderBook,
    fee_strategy: Arc<dyn FeeStrategy>,
    reward_program: Vec<u8>,
}

impl Engine {
    pub fn new(order_book: OrderBook, fee_strategy: Arc<dyn FeeStrategy>, reward_program: Vec<u8>) -> Self {
        Self {
            order_book,
            fee_strategy,
            reward_program,
        }
    }

    pub fn order_book(&self) -> &OrderBook {
        &self.order_book
    }

    pub fn order_book_mut(&mut self) -> &mut OrderBook {
        &mut self.order_book
    }

    /// Whether the best orders of `pairs` currently clear.
    pub fn has_matched_tx(&mut self, pairs: &[TradePair]) -> Result<bool, MatchError> {
        validate_trade_pairs(pairs)?;
        Ok(match self.order_book.peek_orders(pairs)? {
            Some(orders) => is_matched(&orders),
            None => false,
        })
    }

    /// Match the best orders of `pairs` and consume them from the book.
    /// Remainders that can still request something go back into the book.
    pub fn next_matched_tx(&mut self, pairs: &[TradePair]) -> Result<Tx, MatchError> {
        validate_trade_pairs(pairs)?;
        let orders = self
            .order_book
            .peek_orders(pairs)?
            .ok_or(MatchError::NotMatched)?;
        if !is_matched(&orders) {
            return Err(MatchError::NotMatched);
        }

        let sorted = sort_orders(&orders)?;
        let settlement = calc_settlement(&sorted).ok_or(MatchError::RequestAmountMath)?;
        let taker = taker_index(&sorted);
        let allocated = self
            .fee_strategy
            .allocate(&settlement.receives, &settlement.price_diffs, taker);
        let matched = build_matched_tx(&sorted, &settlement, &allocated, &self.reward_program)?;

        let popped = self.order_book.pop_orders(pairs)?;
        let expected: HashSet<_> = sorted.iter().map(|o| o.key()).collect();
        if popped.len() != sorted.len() || popped.iter().any(|o| !expected.contains(&o.key())) {
            return Err(MatchError::OrderBookInconsistent(
                "popped orders differ from the matched orders".into(),
            ));
        }

        for order in matched.re_orders(&sorted)? {
            self.order_book.add_order(order)?;
        }

        debug!(
            tx = %matched.tx.id(),
            orders = sorted.len(),
            outputs = matched.tx.outputs.len(),
            "orders matched"
        );
        Ok(matched.tx)
    }
}

/// Gas a matched tx consumes from the proposal budget.
pub fn matched_tx_gas(tx: &Tx, storage_gas_rate: u64, vm_gas_per_input: u64) -> Result<u64, TypesError> {
    let storage = tx.serialized_size()?.saturating_mul(storage_gas_rate);
    let vm = (tx.inputs.len() as u64).saturating_mul(vm_gas_per_input);
    Ok(storage.saturating_add(vm))
}
