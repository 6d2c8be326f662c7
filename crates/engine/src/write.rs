//! Write path: `put()`, `delete()`, and the flush handoff.
//!
//! All mutations flow through this module. Each write allocates a sequence
//! number and appends to the WAL under one lock (keeping the log in
//! sequence order), then applies to the memtable, which may seal the
//! current generation into the immutable slot on the way.

use anyhow::Result;
use memtable::Table;
use std::sync::Arc;
use wal::Record;

use crate::{Engine, MAX_KEY_SIZE, MAX_VALUE_SIZE};

impl Engine {
    /// Inserts a key-value pair.
    ///
    /// The record is appended to the WAL before the memtable update; with
    /// `sync_on_write` the call also waits for the durability barrier.
    /// Empty keys and empty values are both legal.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        anyhow::ensure!(
            key.len() <= MAX_KEY_SIZE,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        );
        anyhow::ensure!(
            value.len() <= MAX_VALUE_SIZE,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        );

        let seq = {
            let mut guard = self.seq.lock();
            let seq = guard
                .checked_add(1)
                .ok_or_else(|| anyhow::anyhow!("sequence number overflow (u64::MAX reached)"))?;
            self.wal.append(&Record::Put {
                seq,
                key: key.to_vec(),
                value: value.to_vec(),
            })?;
            *guard = seq;
            seq
        };

        // Durability before visibility: the record must not be readable in
        // memory and then lost by a crash.
        if self.sync_on_write {
            self.wal.wait_for_pending()?;
        }
        self.mem.put(key, value, seq)?;
        Ok(())
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// The tombstone lands in the current generation where it shadows any
    /// older value still sitting in the sealed one.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        anyhow::ensure!(
            key.len() <= MAX_KEY_SIZE,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        );

        let seq = {
            let mut guard = self.seq.lock();
            let seq = guard
                .checked_add(1)
                .ok_or_else(|| anyhow::anyhow!("sequence number overflow (u64::MAX reached)"))?;
            self.wal.append(&Record::Delete {
                seq,
                key: key.to_vec(),
            })?;
            *guard = seq;
            seq
        };

        if self.sync_on_write {
            self.wal.wait_for_pending()?;
        }
        self.mem.delete(key, seq)?;
        Ok(())
    }

    /// Whether a sealed generation is waiting for the flusher.
    #[must_use]
    pub fn has_immutable(&self) -> bool {
        self.mem.has_immutable()
    }

    /// Hands the sealed generation to an external flusher and clears the
    /// slot. The flusher reads it through its iterator and drops it when
    /// done; until the flushed data is durable elsewhere, the WAL remains
    /// the only persistent copy and must not be truncated.
    pub fn pop_immutable(&self) -> Option<Arc<Table>> {
        self.mem.pop_immutable()
    }
}
