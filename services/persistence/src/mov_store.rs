//! Order store: rate-sorted orders per trade pair on an ordered KV engine
//!
//! # Key Layout
//! ```text
//! order row:      "MOV:" 0x01 ∥ from(32) ∥ to(32) ∥ rate_key(24) ∥ utxo_hash(32) → bincode(Order)
//! trade pair row: "MOV:" 0x02 ∥ from(32) ∥ to(32)                                 → count (u64 BE)
//! state row:      "MOV:" 0x03                                                      → bincode(MovDatabaseState)
//! undo row:       "MOV:" 0x04 ∥ height (u64 BE)                                    → bincode(Vec<Order>)
//! ```
//!
//! Ascending byte order of order rows is ascending exact rate, with the utxo
//! hash breaking ties. Every block is applied or detached with exactly one
//! KV batch, so the rows, counters and state move together. Undo rows are
//! kept for the last `undo_depth` attached blocks; the batch attaching a
//! block drops the row that falls out of that window.

use crate::kv::{KvError, KvStore, WriteBatch};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};
use types::ids::{AssetId, Hash, ID_LEN};
use types::order::{MovDatabaseState, Order, TradePair, RATE_KEY_LEN};
use types::tx::BlockHeader;

/// Trade pairs returned per page.
pub const TRADE_PAIRS_PAGE: usize = 32;
/// Orders returned per page.
pub const ORDERS_PAGE: usize = 128;
/// Attached blocks whose undo rows are kept.
pub const DEFAULT_UNDO_DEPTH: u64 = 1024;

const MOV_PREFIX: &[u8] = b"MOV:";
const ORDERS_PREFIX: u8 = 0x01;
const TRADE_PAIRS_PREFIX: u8 = 0x02;
const STATE_KEY: u8 = 0x03;
const UNDO_PREFIX: u8 = 0x04;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Kv(#[from] KvError),

    #[error("Corrupt row {key}: {detail}")]
    Corruption { key: String, detail: String },

    #[error("Block {height} ({hash}) is inconsistent with store state {state_height} ({state_hash})")]
    InconsistentState {
        height: u64,
        hash: Hash,
        state_height: u64,
        state_hash: Hash,
    },

    #[error("mov database state is not initialized")]
    NotInitialized,

    #[error("mov chain status has already initialized")]
    AlreadyInitialized,

    #[error("Trade pair {pair} count would become negative")]
    NegativeTradeCount { pair: String },

    #[error("Invalid order {key}: {reason}")]
    InvalidOrder { key: String, reason: String },
}

impl StoreError {
    /// Storage failure or unreadable data: the store cannot be trusted and
    /// the caller decides whether to halt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Kv(_) | StoreError::Corruption { .. })
    }
}

// ── Store Trait ─────────────────────────────────────────────────────

/// Resume point for [`MovStore::list_orders`]: the last order already seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCursor {
    pub rate_key: [u8; RATE_KEY_LEN],
    pub utxo_hash: Hash,
}

impl From<&Order> for OrderCursor {
    fn from(order: &Order) -> Self {
        Self {
            rate_key: order.rate_key(),
            utxo_hash: order.utxo_hash(),
        }
    }
}

pub trait MovStore: Send + Sync {
    fn get_mov_database_state(&self) -> Result<MovDatabaseState, StoreError>;

    /// Write the initial state. Fails if a state already exists.
    fn init_db_state(&self, height: u64, hash: &Hash) -> Result<(), StoreError>;

    /// Next page of `pair`'s orders ascending by rate, strictly after `after`.
    fn list_orders(
        &self,
        pair: &TradePair,
        after: Option<&OrderCursor>,
    ) -> Result<Vec<Order>, StoreError>;

    /// Next page of trade pairs ascending by key, strictly after `after`.
    fn list_trade_pairs(&self, after: Option<&TradePair>) -> Result<Vec<TradePair>, StoreError>;

    /// Atomically attach or detach one block's order changes.
    fn process_orders(
        &self,
        add: &[Order],
        delete: &[Order],
        header: &BlockHeader,
    ) -> Result<(), StoreError>;

    /// Rows the block at `height` removed, as they were stored, recorded
    /// when it was attached.
    fn deleted_orders_at(&self, height: u64) -> Result<Option<Vec<Order>>, StoreError>;

    /// Remove every row, state included.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Whether `header` extends or rewinds the store state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Attach,
    Detach,
}

/// Decide how `header` relates to `state`, or fail with the mismatch.
pub fn check_header(state: &MovDatabaseState, header: &BlockHeader) -> Result<Direction, StoreError> {
    let hash = header.hash();
    if header.previous_block_hash == state.hash && header.height == state.height + 1 {
        return Ok(Direction::Attach);
    }
    if hash == state.hash && header.height == state.height {
        return Ok(Direction::Detach);
    }
    warn!(
        height = header.height,
        hash = %hash,
        state_height = state.height,
        state_hash = %state.hash,
        "block does not connect to mov store state"
    );
    Err(StoreError::InconsistentState {
        height: header.height,
        hash,
        state_height: state.height,
        state_hash: state.hash,
    })
}

/// State after applying `header` in `direction`.
pub fn next_state(header: &BlockHeader, direction: Direction) -> MovDatabaseState {
    match direction {
        Direction::Attach => MovDatabaseState {
            height: header.height,
            hash: header.hash(),
        },
        Direction::Detach => MovDatabaseState {
            height: header.height.saturating_sub(1),
            hash: header.previous_block_hash,
        },
    }
}

// ── Key Encoding ────────────────────────────────────────────────────

fn prefixed(kind: u8, capacity: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(MOV_PREFIX.len() + 1 + capacity);
    key.extend_from_slice(MOV_PREFIX);
    key.push(kind);
    key
}

fn pair_prefix(kind: u8, from: &AssetId, to: &AssetId) -> Vec<u8> {
    let mut key = prefixed(kind, 2 * ID_LEN + RATE_KEY_LEN + ID_LEN);
    key.extend_from_slice(from.as_bytes());
    key.extend_from_slice(to.as_bytes());
    key
}

pub fn order_key(from: &AssetId, to: &AssetId, rate_key: &[u8; RATE_KEY_LEN], utxo_hash: &Hash) -> Vec<u8> {
    let mut key = pair_prefix(ORDERS_PREFIX, from, to);
    key.extend_from_slice(rate_key);
    key.extend_from_slice(utxo_hash.as_bytes());
    key
}

fn order_row_key(order: &Order) -> Vec<u8> {
    order_key(
        &order.from_asset_id,
        &order.to_asset_id,
        &order.rate_key(),
        &order.utxo_hash(),
    )
}

fn trade_pair_key(from: &AssetId, to: &AssetId) -> Vec<u8> {
    pair_prefix(TRADE_PAIRS_PREFIX, from, to)
}

fn state_key() -> Vec<u8> {
    prefixed(STATE_KEY, 0)
}

fn undo_key(height: u64) -> Vec<u8> {
    let mut key = prefixed(UNDO_PREFIX, 8);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn decode<T: serde::de::DeserializeOwned>(key: &[u8], value: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(value).map_err(|e| StoreError::Corruption {
        key: hex::encode(key),
        detail: e.to_string(),
    })
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Kv(KvError::Serialization(e.to_string())))
}

fn decode_count(key: &[u8], value: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| StoreError::Corruption {
        key: hex::encode(key),
        detail: format!("count of {} bytes", value.len()),
    })?;
    Ok(u64::from_be_bytes(bytes))
}

// ── KV-backed Store ─────────────────────────────────────────────────

/// Production [`MovStore`] over any [`KvStore`] engine.
pub struct KvMovStore<K> {
    kv: K,
    undo_depth: u64,
}

impl<K: KvStore> KvMovStore<K> {
    pub fn new(kv: K) -> Self {
        Self::with_undo_depth(kv, DEFAULT_UNDO_DEPTH)
    }

    /// Keep undo rows for the last `depth` blocks (at least one). Detaching
    /// an older block falls back to the spends carried by its txs.
    pub fn with_undo_depth(kv: K, depth: u64) -> Self {
        Self {
            kv,
            undo_depth: depth.max(1),
        }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    fn read_count(&self, from: &AssetId, to: &AssetId) -> Result<u64, StoreError> {
        let key = trade_pair_key(from, to);
        match self.kv.get(&key)? {
            Some(value) => decode_count(&key, &value),
            None => Ok(0),
        }
    }

    /// Fold order row changes into `batch`, returning per-pair count deltas
    /// and the rows actually removed. Only rows that actually appear or
    /// disappear are counted.
    fn stage_orders(
        &self,
        batch: &mut WriteBatch,
        add: &[Order],
        delete: &[Order],
    ) -> Result<(BTreeMap<(AssetId, AssetId), i64>, Vec<Order>), StoreError> {
        let mut present: BTreeMap<Vec<u8>, bool> = BTreeMap::new();
        let mut deltas: BTreeMap<(AssetId, AssetId), i64> = BTreeMap::new();
        let mut removed = Vec::new();

        for order in add {
            if !order.has_valid_ratio() {
                return Err(StoreError::InvalidOrder {
                    key: order.key().to_string(),
                    reason: "ratio must be positive".into(),
                });
            }
            let key = order_row_key(order);
            let exists = match present.get(&key) {
                Some(p) => *p,
                None => self.kv.get(&key)?.is_some(),
            };
            batch.set(key.clone(), encode(order)?);
            if !exists {
                *deltas.entry((order.from_asset_id, order.to_asset_id)).or_default() += 1;
            }
            present.insert(key, true);
        }

        for order in delete {
            let key = order_row_key(order);
            let stored = match present.get(&key) {
                Some(true) => Some(order.clone()),
                Some(false) => None,
                None => match self.kv.get(&key)? {
                    Some(value) => Some(decode::<Order>(&key, &value)?),
                    None => None,
                },
            };
            if let Some(stored) = stored {
                batch.delete(key.clone());
                *deltas.entry((order.from_asset_id, order.to_asset_id)).or_default() -= 1;
                removed.push(stored);
            }
            present.insert(key, false);
        }

        Ok((deltas, removed))
    }

    fn stage_counts(
        &self,
        batch: &mut WriteBatch,
        deltas: BTreeMap<(AssetId, AssetId), i64>,
    ) -> Result<(), StoreError> {
        for ((from, to), delta) in deltas {
            if delta == 0 {
                continue;
            }
            let count = self.read_count(&from, &to)? as i64 + delta;
            if count < 0 {
                return Err(StoreError::NegativeTradeCount {
                    pair: TradePair::new(from, to).key(),
                });
            }
            let key = trade_pair_key(&from, &to);
            if count == 0 {
                batch.delete(key);
            } else {
                batch.set(key, (count as u64).to_be_bytes().to_vec());
            }
        }
        Ok(())
    }
}

impl<K: KvStore> MovStore for KvMovStore<K> {
    fn get_mov_database_state(&self) -> Result<MovDatabaseState, StoreError> {
        let key = state_key();
        match self.kv.get(&key)? {
            Some(value) => decode(&key, &value),
            None => Err(StoreError::NotInitialized),
        }
    }

    fn init_db_state(&self, height: u64, hash: &Hash) -> Result<(), StoreError> {
        if self.kv.get(&state_key())?.is_some() {
            return Err(StoreError::AlreadyInitialized);
        }
        let state = MovDatabaseState { height, hash: *hash };
        self.kv.set(&state_key(), &encode(&state)?)?;
        debug!(height, hash = %hash, "mov store state initialized");
        Ok(())
    }

    fn list_orders(
        &self,
        pair: &TradePair,
        after: Option<&OrderCursor>,
    ) -> Result<Vec<Order>, StoreError> {
        let prefix = pair_prefix(ORDERS_PREFIX, &pair.from_asset_id, &pair.to_asset_id);
        let start = after.map(|c| {
            order_key(&pair.from_asset_id, &pair.to_asset_id, &c.rate_key, &c.utxo_hash)
        });
        self.kv
            .scan_prefix(&prefix, start.as_deref(), ORDERS_PAGE)?
            .into_iter()
            .map(|(k, v)| decode(&k, &v))
            .collect()
    }

    fn list_trade_pairs(&self, after: Option<&TradePair>) -> Result<Vec<TradePair>, StoreError> {
        let prefix = prefixed(TRADE_PAIRS_PREFIX, 0);
        let start = after.map(|p| trade_pair_key(&p.from_asset_id, &p.to_asset_id));
        let rows = self
            .kv
            .scan_prefix(&prefix, start.as_deref(), TRADE_PAIRS_PAGE)?;

        let mut pairs = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let body = &key[prefix.len()..];
            if body.len() != 2 * ID_LEN {
                return Err(StoreError::Corruption {
                    key: hex::encode(&key),
                    detail: "trade pair key length".into(),
                });
            }
            let from = AssetId::from_slice(&body[..ID_LEN]).map_err(|e| StoreError::Corruption {
                key: hex::encode(&key),
                detail: e.to_string(),
            })?;
            let to = AssetId::from_slice(&body[ID_LEN..]).map_err(|e| StoreError::Corruption {
                key: hex::encode(&key),
                detail: e.to_string(),
            })?;
            pairs.push(TradePair {
                from_asset_id: from,
                to_asset_id: to,
                count: decode_count(&key, &value)?,
            });
        }
        Ok(pairs)
    }

    fn process_orders(
        &self,
        add: &[Order],
        delete: &[Order],
        header: &BlockHeader,
    ) -> Result<(), StoreError> {
        let state = self.get_mov_database_state()?;
        let direction = check_header(&state, header)?;

        let mut batch = WriteBatch::new();
        let (deltas, removed) = self.stage_orders(&mut batch, add, delete)?;
        self.stage_counts(&mut batch, deltas)?;

        match direction {
            Direction::Attach => {
                if let Some(expired) = header.height.checked_sub(self.undo_depth) {
                    batch.delete(undo_key(expired));
                }
                batch.set(undo_key(header.height), encode(&removed)?);
            }
            Direction::Detach => batch.delete(undo_key(header.height)),
        }
        batch.set(state_key(), encode(&next_state(header, direction))?);

        let ops = batch.len();
        self.kv.write_batch(batch)?;
        debug!(
            height = header.height,
            ?direction,
            added = add.len(),
            deleted = delete.len(),
            ops,
            "mov store updated"
        );
        Ok(())
    }

    fn deleted_orders_at(&self, height: u64) -> Result<Option<Vec<Order>>, StoreError> {
        let key = undo_key(height);
        match self.kv.get(&key)? {
            Some(value) => decode(&key, &value).map(Some),
            None => Ok(None),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        let mut after: Option<Vec<u8>> = None;
        loop {
            let rows = self.kv.scan_prefix(MOV_PREFIX, after.as_deref(), 1024)?;
            let Some((last, _)) = rows.last() else { break };
            after = Some(last.clone());
            for (key, _) in rows {
                batch.delete(key);
            }
        }
        let removed = batch.len();
        self.kv.write_batch(batch)?;
        debug!(removed, "mov store cleared");
        Ok(())
    }
}
