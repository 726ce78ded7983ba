//! Order book merge layer
//!
//! Per trade pair the best order is the lower of two stack tops:
//! - `db_orders`: pages pulled lazily from the store, pushed in reverse so
//!   the top is the best order loaded so far
//! - `arrival_add`: orders created since the last persisted block, kept
//!   with the best order on top
//!
//! `arrival_del` marks persisted orders spent since the last persisted
//! block; they are skipped when they surface on the db stack. Nothing here
//! writes to the store.

use crate::errors::MatchError;
use persistence::{MovStore, OrderIterator};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;
use types::order::{Order, OrderKey, TradePair};

pub struct OrderBook {
    store: Arc<dyn MovStore>,
    db_orders: HashMap<String, Vec<Order>>,
    db_iters: HashMap<String, OrderIterator>,
    arrival_add: HashMap<String, Vec<Order>>,
    arrival_del: HashMap<OrderKey, Order>,
}

impl OrderBook {
    pub fn new(store: Arc<dyn MovStore>, arrival_add: Vec<Order>, arrival_del: Vec<Order>) -> Self {
        let mut book = Self {
            store,
            db_orders: HashMap::new(),
            db_iters: HashMap::new(),
            arrival_add: HashMap::new(),
            arrival_del: HashMap::new(),
        };
        for order in arrival_add {
            book.insert_order(order);
        }
        for order in arrival_del {
            book.del_order(&order);
        }
        book
    }

    /// Push an in-flight order whose rate is no worse than the best
    /// in-flight order of its pair.
    pub fn add_order(&mut self, order: Order) -> Result<(), MatchError> {
        let pair_key = order.trade_pair().key();
        let stack = self.arrival_add.entry(pair_key.clone()).or_default();
        if let Some(top) = stack.last() {
            if order.cmp_rate(top).is_gt() {
                return Err(MatchError::OrderOutOfSequence { pair: pair_key });
            }
        }
        stack.push(order);
        Ok(())
    }

    /// Place an in-flight order at its priority position, whatever its rate.
    pub fn insert_order(&mut self, order: Order) {
        let stack = self.arrival_add.entry(order.trade_pair().key()).or_default();
        // Stack is worst-first; the insertion point keeps it that way
        let at = stack.partition_point(|o| o.cmp_priority(&order).is_gt());
        stack.insert(at, order);
    }

    /// Remove an order: dropped directly if it is in flight, otherwise
    /// marked so it is skipped when loaded from the store.
    pub fn del_order(&mut self, order: &Order) {
        let key = order.key();
        if let Some(stack) = self.arrival_add.get_mut(&order.trade_pair().key()) {
            let before = stack.len();
            stack.retain(|o| o.key() != key);
            if stack.len() != before {
                return;
            }
        }
        self.arrival_del.insert(key, order.clone());
    }

    pub fn peek_order(&mut self, pair: &TradePair) -> Result<Option<Order>, MatchError> {
        let pair_key = pair.key();
        loop {
            if self.db_orders.get(&pair_key).map_or(true, Vec::is_empty) {
                self.refill(pair, &pair_key)?;
            }

            let db_top = self.db_orders.get(&pair_key).and_then(|s| s.last());
            if let Some(top) = db_top {
                if self.arrival_del.remove(&top.key()).is_some() {
                    trace!(order = %top.key(), "skipping spent order");
                    if let Some(stack) = self.db_orders.get_mut(&pair_key) {
                        stack.pop();
                    }
                    continue;
                }
            }

            let arrival_top = self.arrival_add.get(&pair_key).and_then(|s| s.last());
            let best = match (db_top, arrival_top) {
                (Some(db), Some(arrival)) => {
                    if arrival.cmp_priority(db).is_lt() {
                        arrival
                    } else {
                        db
                    }
                }
                (Some(db), None) => db,
                (None, Some(arrival)) => arrival,
                (None, None) => return Ok(None),
            };
            return Ok(Some(best.clone()));
        }
    }

    /// Best order of every pair, or `None` if any pair is empty.
    pub fn peek_orders(&mut self, pairs: &[TradePair]) -> Result<Option<Vec<Order>>, MatchError> {
        let mut orders = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match self.peek_order(pair)? {
                Some(order) => orders.push(order),
                None => return Ok(None),
            }
        }
        Ok(Some(orders))
    }

    pub fn pop_order(&mut self, pair: &TradePair) -> Result<Option<Order>, MatchError> {
        let Some(best) = self.peek_order(pair)? else {
            return Ok(None);
        };
        let pair_key = pair.key();
        let key = best.key();

        for stack in [self.db_orders.get_mut(&pair_key), self.arrival_add.get_mut(&pair_key)]
            .into_iter()
            .flatten()
        {
            if stack.last().map(Order::key) == Some(key) {
                stack.pop();
                return Ok(Some(best));
            }
        }
        Err(MatchError::OrderBookInconsistent(format!(
            "peeked order {} is on neither stack of {}",
            key, pair_key
        )))
    }

    /// Pop the best order of every pair; all of them must exist.
    pub fn pop_orders(&mut self, pairs: &[TradePair]) -> Result<Vec<Order>, MatchError> {
        let mut orders = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let order = self.pop_order(pair)?.ok_or_else(|| {
                MatchError::OrderBookInconsistent(format!("no order to pop for {}", pair))
            })?;
            orders.push(order);
        }
        Ok(orders)
    }

    fn refill(&mut self, pair: &TradePair, pair_key: &str) -> Result<(), MatchError> {
        let iter = self
            .db_iters
            .entry(pair_key.to_string())
            .or_insert_with(|| OrderIterator::new(self.store.clone(), pair.clone()));
        if let Some(page) = iter.next() {
            let mut page = page?;
            page.reverse();
            self.db_orders
                .entry(pair_key.to_string())
                .or_default()
                .extend(page);
        }
        Ok(())
    }
}
