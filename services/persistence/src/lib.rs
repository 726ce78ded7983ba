//! Persistence for the order matching subsystem
//!
//! Provides the ordered key-value engines (in-memory and journaled), the
//! rate-sorted order store with its atomic per-block apply/detach, and
//! paginated iterators over trade pairs and orders.
//!
//! Storage failures surface as fatal [`StoreError`] values; nothing here
//! retries or panics on a bad read.

pub mod iterator;
pub mod journal;
pub mod kv;
pub mod mock;
pub mod mov_store;

pub use iterator::{all_orders, OrderIterator, TradePairIterator};
pub use journal::{JournalConfig, JournalKv};
pub use kv::{KvError, KvStore, MemoryKv, WriteBatch};
pub use mock::MemMovStore;
pub use mov_store::{KvMovStore, MovStore, OrderCursor, StoreError, DEFAULT_UNDO_DEPTH};
