//! Journaled KV engine: append-only batch log with checksums
//!
//! Every committed [`WriteBatch`] is appended as one entry and fsynced
//! before it becomes visible in memory. On open the log is replayed into a
//! sorted map. A partially written final entry (crash mid-append) is cut
//! off; a complete entry with a bad checksum is corruption. A failed append
//! is truncated back to the last committed entry before the error is
//! returned; if that fails too, the engine refuses further writes.
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len: u32]
//! [sequence: u64]
//! [kind:     u8]      // 0 = batch, 1 = checkpoint
//! [payload_len: u32][payload: bytes]
//! [checksum: u32]     // CRC32C over sequence+kind+payload
//! ```
//!
//! Batch payloads are bincode-encoded `WriteBatch`es. A checkpoint payload
//! is the zstd-compressed bincode of every live entry, written by
//! [`JournalKv::compact`].

use crate::kv::{KvError, KvStore, MemoryKv, WriteBatch};
use crc32c::crc32c;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const KIND_BATCH: u8 = 0;
const KIND_CHECKPOINT: u8 = 1;

/// Bodies larger than this are treated as a garbage length prefix.
const MAX_BODY_LEN: usize = 256 * 1024 * 1024;

const JOURNAL_FILE: &str = "mov-journal.bin";

// ── Journal Entry ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub sequence: u64,
    pub kind: u8,
    pub payload: Vec<u8>,
    pub checksum: u32,
}

/// Outcome of parsing one entry from a byte slice.
#[derive(Debug, PartialEq)]
enum Parsed {
    Entry(JournalEntry, usize),
    /// Not enough bytes for the declared entry.
    Truncated,
}

impl JournalEntry {
    pub fn new(sequence: u64, kind: u8, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(sequence, kind, &payload);
        Self {
            sequence,
            kind,
            payload,
            checksum,
        }
    }

    pub fn compute_checksum(sequence: u64, kind: u8, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(9 + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.push(kind);
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == Self::compute_checksum(self.sequence, self.kind, &self.payload)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // body = 8 (seq) + 1 (kind) + 4 (pl_len) + payload + 4 (crc)
        let body_len = (8 + 1 + 4 + self.payload.len() + 4) as u32;
        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.push(self.kind);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    fn parse(data: &[u8], offset: u64) -> Result<Parsed, KvError> {
        if data.len() < 4 {
            return Ok(Parsed::Truncated);
        }
        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if body_len > MAX_BODY_LEN || body_len < 17 {
            return Err(KvError::Corruption {
                offset,
                detail: format!("implausible body length {}", body_len),
            });
        }
        if data.len() < 4 + body_len {
            return Ok(Parsed::Truncated);
        }

        let body = &data[4..4 + body_len];
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&body[..8]);
        let sequence = u64::from_le_bytes(seq);
        let kind = body[8];
        let payload_len = u32::from_le_bytes([body[9], body[10], body[11], body[12]]) as usize;
        if 13 + payload_len + 4 != body_len {
            return Err(KvError::Corruption {
                offset,
                detail: format!("payload length {} disagrees with body {}", payload_len, body_len),
            });
        }
        let payload = body[13..13 + payload_len].to_vec();
        let crc_at = 13 + payload_len;
        let checksum = u32::from_le_bytes([
            body[crc_at],
            body[crc_at + 1],
            body[crc_at + 2],
            body[crc_at + 3],
        ]);

        Ok(Parsed::Entry(
            JournalEntry {
                sequence,
                kind,
                payload,
                checksum,
            },
            4 + body_len,
        ))
    }
}

// ── Fsync Policy ────────────────────────────────────────────────────

/// Controls when `fsync` is called after an append.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    /// Fsync after every batch.
    EveryWrite,
    /// Leave durability to the OS; tests and throwaway stores.
    Never,
}

#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory holding the journal file.
    pub dir: PathBuf,
    pub fsync_policy: FsyncPolicy,
    /// zstd level used for checkpoints.
    pub checkpoint_level: i32,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fsync_policy: FsyncPolicy::EveryWrite,
            checkpoint_level: 3,
        }
    }
}

// ── Journaled Store ─────────────────────────────────────────────────

struct Inner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    writer: BufWriter<File>,
    next_sequence: u64,
    /// File length up to the end of the last complete entry.
    committed_len: u64,
    poisoned: bool,
    /// Bytes the next append writes before failing.
    #[cfg(test)]
    fail_next_append: Option<usize>,
}

/// Durable [`KvStore`]: an in-memory sorted map rebuilt from the journal.
pub struct JournalKv {
    config: JournalConfig,
    inner: Mutex<Inner>,
}

/// Summary of a replay on open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayStats {
    pub entries: u64,
    pub truncated_bytes: u64,
}

impl JournalKv {
    pub fn open(config: JournalConfig) -> Result<Self, KvError> {
        Self::open_with_stats(config).map(|(kv, _)| kv)
    }

    /// Open, replay, and report what the replay did.
    pub fn open_with_stats(config: JournalConfig) -> Result<(Self, ReplayStats), KvError> {
        fs::create_dir_all(&config.dir)?;
        let path = Self::journal_path(&config.dir);

        let mut data = Vec::new();
        if path.exists() {
            File::open(&path)?.read_to_end(&mut data)?;
        }

        let mut map = BTreeMap::new();
        let mut stats = ReplayStats::default();
        let mut pos = 0usize;
        let mut next_sequence = 0u64;

        while pos < data.len() {
            match JournalEntry::parse(&data[pos..], pos as u64)? {
                Parsed::Truncated => break,
                Parsed::Entry(entry, consumed) => {
                    if !entry.verify_checksum() {
                        return Err(KvError::Corruption {
                            offset: pos as u64,
                            detail: format!(
                                "CRC32C mismatch for seq={}, stored={:#010x}",
                                entry.sequence, entry.checksum
                            ),
                        });
                    }
                    if entry.sequence != next_sequence {
                        return Err(KvError::Corruption {
                            offset: pos as u64,
                            detail: format!(
                                "sequence gap: expected {}, got {}",
                                next_sequence, entry.sequence
                            ),
                        });
                    }
                    Self::replay_entry(&mut map, &entry, pos as u64)?;
                    next_sequence += 1;
                    stats.entries += 1;
                    pos += consumed;
                }
            }
        }

        if pos < data.len() {
            stats.truncated_bytes = (data.len() - pos) as u64;
            warn!(
                path = %path.display(),
                offset = pos,
                dropped = stats.truncated_bytes,
                "discarding torn journal tail"
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(pos as u64)?;
            file.sync_all()?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(entries = stats.entries, keys = map.len(), "journal replayed");

        Ok((
            Self {
                config,
                inner: Mutex::new(Inner {
                    map,
                    writer: BufWriter::new(file),
                    next_sequence,
                    committed_len: pos as u64,
                    poisoned: false,
                    #[cfg(test)]
                    fail_next_append: None,
                }),
            },
            stats,
        ))
    }

    /// Replace the log with a single checkpoint of the current contents.
    ///
    /// The checkpoint is written to a temporary file, fsynced and renamed
    /// over the journal, so a crash leaves either the old or the new log.
    pub fn compact(&self) -> Result<(), KvError> {
        let mut inner = self.inner.lock();
        if inner.poisoned {
            return Err(KvError::Poisoned);
        }

        let entries: Vec<(&Vec<u8>, &Vec<u8>)> = inner.map.iter().collect();
        let raw = bincode::serialize(&entries).map_err(|e| KvError::Serialization(e.to_string()))?;
        let compressed = zstd::encode_all(raw.as_slice(), self.config.checkpoint_level)?;
        let entry = JournalEntry::new(0, KIND_CHECKPOINT, compressed);

        let path = Self::journal_path(&self.config.dir);
        let tmp_path = self.config.dir.join(format!("{}.tmp", JOURNAL_FILE));
        let bytes = entry.to_bytes();
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        let file = OpenOptions::new().append(true).open(&path)?;
        inner.writer = BufWriter::new(file);
        inner.next_sequence = 1;
        inner.committed_len = bytes.len() as u64;
        debug!(keys = inner.map.len(), "journal compacted");
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        Self::journal_path(&self.config.dir)
    }

    /// Snapshot of the live contents as a plain in-memory store.
    pub fn to_memory(&self) -> MemoryKv {
        MemoryKv::from_map(self.inner.lock().map.clone())
    }

    fn append(&self, inner: &mut Inner, bytes: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(written) = inner.fail_next_append.take() {
            inner.writer.write_all(&bytes[..written])?;
            inner.writer.flush()?;
            return Err(io::Error::new(io::ErrorKind::Other, "injected append failure"));
        }
        inner.writer.write_all(bytes)?;
        inner.writer.flush()?;
        if self.config.fsync_policy == FsyncPolicy::EveryWrite {
            inner.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Drop whatever a failed append left buffered or on disk.
    fn roll_back(&self, inner: &mut Inner) -> io::Result<()> {
        let path = self.path();
        let fresh = BufWriter::new(OpenOptions::new().append(true).open(&path)?);
        // into_parts discards the buffer instead of flushing it
        let (_, _unflushed) = std::mem::replace(&mut inner.writer, fresh).into_parts();
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(inner.committed_len)?;
        file.sync_all()
    }

    fn replay_entry(
        map: &mut BTreeMap<Vec<u8>, Vec<u8>>,
        entry: &JournalEntry,
        offset: u64,
    ) -> Result<(), KvError> {
        match entry.kind {
            KIND_BATCH => {
                let batch: WriteBatch = bincode::deserialize(&entry.payload)
                    .map_err(|e| KvError::Serialization(e.to_string()))?;
                MemoryKv::apply(map, &batch);
            }
            KIND_CHECKPOINT => {
                let raw = zstd::decode_all(entry.payload.as_slice())?;
                let entries: Vec<(Vec<u8>, Vec<u8>)> = bincode::deserialize(&raw)
                    .map_err(|e| KvError::Serialization(e.to_string()))?;
                map.clear();
                map.extend(entries);
            }
            other => {
                return Err(KvError::Corruption {
                    offset,
                    detail: format!("unknown entry kind {}", other),
                })
            }
        }
        Ok(())
    }

    fn journal_path(dir: &Path) -> PathBuf {
        dir.join(JOURNAL_FILE)
    }
}

impl KvStore for JournalKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.inner.lock().map.get(key).cloned())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), KvError> {
        if batch.is_empty() {
            return Ok(());
        }
        let payload = bincode::serialize(&batch).map_err(|e| KvError::Serialization(e.to_string()))?;

        let mut inner = self.inner.lock();
        if inner.poisoned {
            return Err(KvError::Poisoned);
        }
        let entry = JournalEntry::new(inner.next_sequence, KIND_BATCH, payload);
        let bytes = entry.to_bytes();
        if let Err(e) = self.append(&mut inner, &bytes) {
            if let Err(rollback) = self.roll_back(&mut inner) {
                warn!(error = %rollback, "journal rollback failed, refusing further writes");
                inner.poisoned = true;
            }
            return Err(e.into());
        }

        // Durable first, visible second
        inner.next_sequence += 1;
        inner.committed_len += bytes.len() as u64;
        MemoryKv::apply(&mut inner.map, &batch);
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        Ok(MemoryKv::scan(&self.inner.lock().map, prefix, start_after, limit))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
