//! In-memory `MovStore` test double
//!
//! Keeps orders in plain sorted vectors instead of encoded rows, and can be
//! told to fail reads so callers' error paths can be exercised.

use crate::kv::KvError;
use crate::mov_store::{
    check_header, next_state, Direction, MovStore, OrderCursor, StoreError, DEFAULT_UNDO_DEPTH, ORDERS_PAGE,
    TRADE_PAIRS_PAGE,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use types::ids::{AssetId, Hash};
use types::order::{MovDatabaseState, Order, TradePair};
use types::tx::BlockHeader;

#[derive(Default)]
struct State {
    db_state: Option<MovDatabaseState>,
    orders: BTreeMap<(AssetId, AssetId), Vec<Order>>,
    undo: BTreeMap<u64, Vec<Order>>,
}

#[derive(Default)]
pub struct MemMovStore {
    state: Mutex<State>,
    fail_reads: AtomicBool,
}

impl MemMovStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already initialized at (`height`, `hash`) holding `orders`.
    pub fn with_orders(height: u64, hash: Hash, orders: Vec<Order>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            state.db_state = Some(MovDatabaseState { height, hash });
            for order in orders {
                Self::insert(&mut state, order);
            }
        }
        store
    }

    /// Make every subsequent list call fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Kv(KvError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected read failure",
            ))));
        }
        Ok(())
    }

    fn insert(state: &mut State, order: Order) {
        let book = state
            .orders
            .entry((order.from_asset_id, order.to_asset_id))
            .or_default();
        if book.iter().any(|o| o.key() == order.key()) {
            return;
        }
        let at = book.partition_point(|o| o.cmp_priority(&order).is_lt());
        book.insert(at, order);
    }

    fn remove(state: &mut State, order: &Order) -> Option<Order> {
        let pair = (order.from_asset_id, order.to_asset_id);
        let book = state.orders.get_mut(&pair)?;
        let at = book.iter().position(|o| o.key() == order.key())?;
        let removed = book.remove(at);
        if book.is_empty() {
            state.orders.remove(&pair);
        }
        Some(removed)
    }
}

impl MovStore for MemMovStore {
    fn get_mov_database_state(&self) -> Result<MovDatabaseState, StoreError> {
        self.state.lock().db_state.ok_or(StoreError::NotInitialized)
    }

    fn init_db_state(&self, height: u64, hash: &Hash) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.db_state.is_some() {
            return Err(StoreError::AlreadyInitialized);
        }
        state.db_state = Some(MovDatabaseState { height, hash: *hash });
        Ok(())
    }

    fn list_orders(
        &self,
        pair: &TradePair,
        after: Option<&OrderCursor>,
    ) -> Result<Vec<Order>, StoreError> {
        self.check_reads()?;
        let state = self.state.lock();
        let Some(book) = state.orders.get(&(pair.from_asset_id, pair.to_asset_id)) else {
            return Ok(Vec::new());
        };
        let start = match after {
            Some(c) => book.partition_point(|o| {
                (o.rate_key(), o.utxo_hash()) <= (c.rate_key, c.utxo_hash)
            }),
            None => 0,
        };
        Ok(book.iter().skip(start).take(ORDERS_PAGE).cloned().collect())
    }

    fn list_trade_pairs(&self, after: Option<&TradePair>) -> Result<Vec<TradePair>, StoreError> {
        self.check_reads()?;
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .filter(|((from, to), _)| match after {
                Some(a) => (*from, *to) > (a.from_asset_id, a.to_asset_id),
                None => true,
            })
            .take(TRADE_PAIRS_PAGE)
            .map(|((from, to), book)| TradePair {
                from_asset_id: *from,
                to_asset_id: *to,
                count: book.len() as u64,
            })
            .collect())
    }

    fn process_orders(
        &self,
        add: &[Order],
        delete: &[Order],
        header: &BlockHeader,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let current = state.db_state.ok_or(StoreError::NotInitialized)?;
        let direction = check_header(&current, header)?;

        for order in add {
            Self::insert(&mut state, order.clone());
        }
        let removed: Vec<Order> = delete
            .iter()
            .filter_map(|order| Self::remove(&mut state, order))
            .collect();
        match direction {
            Direction::Attach => {
                if let Some(expired) = header.height.checked_sub(DEFAULT_UNDO_DEPTH) {
                    state.undo.remove(&expired);
                }
                state.undo.insert(header.height, removed);
            }
            Direction::Detach => {
                state.undo.remove(&header.height);
            }
        }
        state.db_state = Some(next_state(header, direction));
        Ok(())
    }

    fn deleted_orders_at(&self, height: u64) -> Result<Option<Vec<Order>>, StoreError> {
        Ok(self.state.lock().undo.get(&height).cloned())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.state.lock() = State::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::testing::{btc, eth, header, order, OrderSpec};

    #[test]
    fn test_orders_kept_in_priority_order() {
        let orders = vec![
            order(OrderSpec::new(btc(), eth(), 52, 1, 10, 1), 1),
            order(OrderSpec::new(btc(), eth(), 50, 1, 10, 2), 2),
            order(OrderSpec::new(btc(), eth(), 51, 1, 10, 3), 3),
        ];
        let store = MemMovStore::with_orders(0, Hash::default(), orders);
        let listed = store.list_orders(&TradePair::new(btc(), eth()), None).unwrap();
        let rates: Vec<u64> = listed.iter().map(|o| o.ratio_numerator).collect();
        assert_eq!(rates, vec![50, 51, 52]);

        let rest = store
            .list_orders(&TradePair::new(btc(), eth()), Some(&OrderCursor::from(&listed[0])))
            .unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn test_fail_reads() {
        let store = MemMovStore::new();
        store.set_fail_reads(true);
        let err = store.list_trade_pairs(None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_process_orders_checks_header() {
        let store = MemMovStore::with_orders(3, Hash::new([3; 32]), vec![]);
        let err = store.process_orders(&[], &[], &header(5, Hash::new([3; 32]))).unwrap_err();
        assert!(matches!(err, StoreError::InconsistentState { .. }));
        store.process_orders(&[], &[], &header(4, Hash::new([3; 32]))).unwrap();
        assert_eq!(store.get_mov_database_state().unwrap().height, 4);
    }
}
