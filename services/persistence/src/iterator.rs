//! Paginated cursors over the order store
//!
//! Both iterators pull one page at a time and remember the last item they
//! returned, so pages never overlap even when rates are equal.

use crate::mov_store::{MovStore, OrderCursor, StoreError};
use std::sync::Arc;
use types::order::{Order, TradePair};

/// Walks every trade pair row in key order.
pub struct TradePairIterator {
    store: Arc<dyn MovStore>,
    buffer: std::vec::IntoIter<TradePair>,
    last: Option<TradePair>,
    done: bool,
}

impl TradePairIterator {
    pub fn new(store: Arc<dyn MovStore>) -> Self {
        Self {
            store,
            buffer: Vec::new().into_iter(),
            last: None,
            done: false,
        }
    }
}

impl Iterator for TradePairIterator {
    type Item = Result<TradePair, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(pair) = self.buffer.next() {
            self.last = Some(pair.clone());
            return Some(Ok(pair));
        }
        if self.done {
            return None;
        }
        match self.store.list_trade_pairs(self.last.as_ref()) {
            Ok(page) if page.is_empty() => {
                self.done = true;
                None
            }
            Ok(page) => {
                self.buffer = page.into_iter();
                self.next()
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Yields one trade pair's orders a page at a time, best rate first.
pub struct OrderIterator {
    store: Arc<dyn MovStore>,
    pair: TradePair,
    cursor: Option<OrderCursor>,
    done: bool,
}

impl OrderIterator {
    pub fn new(store: Arc<dyn MovStore>, pair: TradePair) -> Self {
        Self {
            store,
            pair,
            cursor: None,
            done: false,
        }
    }

    pub fn trade_pair(&self) -> &TradePair {
        &self.pair
    }
}

impl Iterator for OrderIterator {
    type Item = Result<Vec<Order>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.store.list_orders(&self.pair, self.cursor.as_ref()) {
            Ok(page) => match page.last() {
                Some(last) => {
                    self.cursor = Some(OrderCursor::from(last));
                    Some(Ok(page))
                }
                None => {
                    self.done = true;
                    None
                }
            },
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Every order in the store, pair by pair.
pub fn all_orders(store: Arc<dyn MovStore>) -> Result<Vec<Order>, StoreError> {
    let mut orders = Vec::new();
    for pair in TradePairIterator::new(store.clone()) {
        for page in OrderIterator::new(store.clone(), pair?) {
            orders.extend(page?);
        }
    }
    Ok(orders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::mov_store::{KvMovStore, ORDERS_PAGE, TRADE_PAIRS_PAGE};
    use types::ids::{AssetId, Hash};
    use types::testing::{btc, eth, header, order, OrderSpec};

    fn seeded(orders: &[Order]) -> Arc<dyn MovStore> {
        let s = KvMovStore::new(MemoryKv::new());
        s.init_db_state(0, &Hash::new([0; 32])).unwrap();
        s.process_orders(orders, &[], &header(1, Hash::new([0; 32]))).unwrap();
        Arc::new(s)
    }

    #[test]
    fn test_trade_pair_iterator_crosses_pages() {
        let orders: Vec<Order> = (0..(TRADE_PAIRS_PAGE as u64 + 5))
            .map(|i| {
                let mut to = [0x40; 32];
                to[31] = i as u8;
                order(OrderSpec::new(btc(), AssetId::new(to), 1, 1, 10, 1), i)
            })
            .collect();
        let store = seeded(&orders);
        let pairs: Vec<TradePair> = TradePairIterator::new(store).map(Result::unwrap).collect();
        assert_eq!(pairs.len(), TRADE_PAIRS_PAGE + 5);
    }

    #[test]
    fn test_order_iterator_pages_in_rate_order() {
        let orders: Vec<Order> = (0..(ORDERS_PAGE as u64 * 2 + 1))
            .map(|i| order(OrderSpec::new(btc(), eth(), 50 + (i % 7) as i64, 1, 10, 1), i))
            .collect();
        let store = seeded(&orders);

        let pages: Vec<Vec<Order>> = OrderIterator::new(store, TradePair::new(btc(), eth()))
            .map(Result::unwrap)
            .collect();
        assert_eq!(pages.len(), 3);
        let flat: Vec<Order> = pages.into_iter().flatten().collect();
        assert_eq!(flat.len(), orders.len());
        for w in flat.windows(2) {
            assert!(w[0].cmp_priority(&w[1]).is_lt());
        }
    }

    #[test]
    fn test_all_orders() {
        let orders = vec![
            order(OrderSpec::new(btc(), eth(), 50, 1, 10, 1), 1),
            order(OrderSpec::new(eth(), btc(), 1, 51, 510, 2), 2),
        ];
        let store = seeded(&orders);
        assert_eq!(all_orders(store).unwrap().len(), 2);
    }
}
