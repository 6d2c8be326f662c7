//! Cold-start recovery: replaying the WAL into a fresh memtable.

use anyhow::{Context, Result};
use memtable::Memtable;
use std::path::Path;
use wal::{Record, WalError, WalReader};

/// Replays the WAL at `path` into `mem`, returning the highest sequence
/// number encountered.
///
/// A missing file is a fresh start (`Ok(0)`). A torn tail after at least
/// one good record is tolerated by the reader; every other corruption or
/// I/O failure propagates.
pub fn replay_wal_into<P: AsRef<Path>>(path: P, mem: &Memtable) -> Result<u64> {
    let mut reader = match WalReader::open(path.as_ref()) {
        Ok(reader) => reader,
        Err(WalError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(0);
        }
        Err(e) => {
            return Err(anyhow::Error::new(e).context("failed to open WAL for replay"));
        }
    };

    let mut max_seq = 0u64;
    let mut replayed = 0usize;

    reader
        .replay(|record| -> Result<()> {
            match record {
                Record::Put { seq, key, value } => {
                    mem.put(&key, &value, seq)?;
                    max_seq = max_seq.max(seq);
                }
                Record::Delete { seq, key } => {
                    mem.delete(&key, seq)?;
                    max_seq = max_seq.max(seq);
                }
            }
            replayed += 1;
            Ok(())
        })
        .context("wal replay failed")?;

    tracing::debug!(records = replayed, max_seq, "wal replay complete");
    Ok(max_seq)
}
