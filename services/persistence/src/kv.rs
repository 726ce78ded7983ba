//! Ordered key-value abstraction
//!
//! The order store only needs point reads, atomic batches and forward
//! prefix scans. `MemoryKv` is the in-process engine; `JournalKv` in
//! [`crate::journal`] adds durability on top of the same map.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::ops::Bound;
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum KvError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corruption detected at byte offset {offset}: {detail}")]
    Corruption { offset: u64, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Journal unusable after a failed append could not be rolled back; reopen it")]
    Poisoned,
}

// ── Write Batch ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered list of writes committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Set { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

// ── Store Trait ─────────────────────────────────────────────────────

pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Apply every op in order, or none of them.
    fn write_batch(&self, batch: WriteBatch) -> Result<(), KvError>;

    /// Up to `limit` entries whose key starts with `prefix`, ascending,
    /// beginning strictly after `start_after` when given.
    fn scan_prefix(
        &self,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let mut batch = WriteBatch::new();
        batch.set(key.to_vec(), value.to_vec());
        self.write_batch(batch)
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.write_batch(batch)
    }
}

// ── In-Memory Engine ────────────────────────────────────────────────

/// Sorted map behind a read-write lock.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(map: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self {
            map: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Copy of every entry, ascending.
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn apply(map: &mut BTreeMap<Vec<u8>, Vec<u8>>, batch: &WriteBatch) {
        for op in batch.ops() {
            match op {
                BatchOp::Set { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    map.remove(key);
                }
            }
        }
    }

    pub(crate) fn scan(
        map: &BTreeMap<Vec<u8>, Vec<u8>>,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let lower = match start_after {
            Some(start) if start >= prefix => Bound::Excluded(start.to_vec()),
            _ => Bound::Included(prefix.to_vec()),
        };
        map.range((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut map = self.map.write();
        Self::apply(&mut map, &batch);
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        Ok(Self::scan(&self.map.read(), prefix, start_after, limit))
    }
}
