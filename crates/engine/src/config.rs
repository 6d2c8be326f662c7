//! Engine configuration with sensible defaults.

use wal::WalOptions;

/// Tunables for [`crate::Engine::open`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Memtable byte threshold that seals the current generation on a put.
    pub memtable_threshold: usize,

    /// Arena seed size for each memtable generation.
    pub arena_capacity: usize,

    /// WAL mode and buffering, passed through to [`wal::Wal::open`].
    pub wal: WalOptions,

    /// If `true`, every `put`/`delete` waits for the WAL durability barrier
    /// before returning. Safest, slowest.
    pub sync_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memtable_threshold: 4 * 1024 * 1024,
            arena_capacity: 1 << 20,
            wal: WalOptions::default(),
            sync_on_write: false,
        }
    }
}
