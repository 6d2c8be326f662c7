//! # Engine — the durable write path
//!
//! Ties the [`wal`] and [`memtable`] crates into a crash-safe embedded
//! key-value engine: every mutation is appended to the write-ahead log
//! before it becomes visible in the versioned in-memory table.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌────────────────────────────────────────────────┐
//! │                    ENGINE                      │
//! │                                                │
//! │ write.rs → seq++ → WAL append → Memtable put   │
//! │                        |                       │
//! │                        | (threshold exceeded?) │
//! │                        v                       │
//! │              current sealed → immutable slot   │
//! │                        |                       │
//! │                        v                       │
//! │            pop_immutable() → external flusher  │
//! │                                                │
//! │ read.rs → get / scan over merged generations   │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! | Module        | Purpose                                            |
//! |---------------|----------------------------------------------------|
//! | `lib.rs`      | `Engine` struct, constructor, accessors, lifecycle |
//! | `config.rs`   | Tunables and their defaults                        |
//! | `recovery.rs` | WAL replay on cold start                           |
//! | `write.rs`    | `put()`, `delete()`, flush handoff                 |
//! | `read.rs`     | `get()`, `iter()`, `scan()`                        |
//!
//! ## Crash Safety
//!
//! A mutation is appended to the WAL **before** the memtable update, and the
//! sequence counter is advanced under the same lock as the append, so the
//! log is totally ordered by sequence. The WAL is never truncated here:
//! that is only sound once an external flusher has made a sealed generation
//! durable on disk, which is outside this engine's scope.

use std::path::PathBuf;

use anyhow::Result;
use memtable::Memtable;
use parking_lot::Mutex;
use wal::Wal;

mod config;
mod read;
mod recovery;
mod write;

pub use config::Config;
pub use recovery::replay_wal_into;

/// Maximum allowed key size in bytes.
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes.
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// The embedded storage engine: a WAL-durable, two-generation memtable.
///
/// All operations take `&self`; the engine is safe to share across threads
/// behind an `Arc`.
///
/// # Write Path
///
/// 1. Allocate the next sequence number and append the record to the WAL,
///    both under the write lock.
/// 2. Apply the mutation to the memtable (which may seal the current
///    generation on the way).
/// 3. Optionally wait for the durability barrier (`sync_on_write`).
///
/// # Recovery
///
/// [`Engine::open`] replays the WAL into a fresh memtable and resumes the
/// sequence counter after the highest replayed sequence. Appends continue
/// on the same file.
pub struct Engine {
    pub(crate) mem: Memtable,
    pub(crate) wal: Wal,
    wal_path: PathBuf,
    /// Last allocated sequence number; the lock also serializes WAL appends
    /// so records hit the log in sequence order.
    pub(crate) seq: Mutex<u64>,
    pub(crate) sync_on_write: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("wal_path", &self.wal_path)
            .field("seq", &*self.seq.lock())
            .field("memtable_bytes", &self.mem.approx_size_bytes())
            .field("has_immutable", &self.mem.has_immutable())
            .field("sync_on_write", &self.sync_on_write)
            .finish()
    }
}

impl Engine {
    /// Opens the engine, replaying any existing WAL at `wal_path` into a
    /// fresh memtable. A missing file is a fresh start.
    pub fn open<P: Into<PathBuf>>(wal_path: P, config: Config) -> Result<Self> {
        let wal_path = wal_path.into();

        // Replay before opening the writer so the append handle never
        // races the recovery read.
        let mem = Memtable::new(config.memtable_threshold, config.arena_capacity);
        let max_seq = replay_wal_into(&wal_path, &mem)?;

        let wal = Wal::open(&wal_path, config.wal.clone())?;

        tracing::info!(
            path = %wal_path.display(),
            recovered_seq = max_seq,
            "engine opened"
        );

        Ok(Self {
            mem,
            wal,
            wal_path,
            seq: Mutex::new(max_seq),
            sync_on_write: config.sync_on_write,
        })
    }

    /// The highest sequence number allocated so far.
    #[must_use]
    pub fn seq(&self) -> u64 {
        *self.seq.lock()
    }

    /// Rough byte footprint of the current memtable generation.
    #[must_use]
    pub fn memtable_size(&self) -> usize {
        self.mem.approx_size_bytes()
    }

    /// Requests an immediate WAL flush without waiting for it.
    pub fn sync(&self) -> Result<()> {
        self.wal.sync()?;
        Ok(())
    }

    /// Durability barrier: returns once every previously acknowledged
    /// mutation is fsynced.
    pub fn wait_for_pending(&self) -> Result<()> {
        self.wal.wait_for_pending()?;
        Ok(())
    }

    /// Shuts the engine down: stops the WAL worker, flushes, fsyncs, and
    /// surfaces any deferred background error. The memtable is volatile by
    /// design; its contents are recoverable from the WAL.
    pub fn close(mut self) -> Result<()> {
        tracing::info!(path = %self.wal_path.display(), "engine closing");
        self.wal.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
