use crate::Config;
use wal::WalOptions;


/// A config with a synchronous WAL, handy when a test wants the log on
/// disk the moment `put` returns.
pub fn direct_config(memtable_threshold: usize) -> Config {
    Config {
        memtable_threshold,
        arena_capacity: 1024,
        wal: WalOptions {
            group_commit: false,
            ..WalOptions::default()
        },
        sync_on_write: false,
    }
}
