//! # WAL — Write-Ahead Log
//!
//! Crash-safe durability for the storage engine's write path.
//!
//! Every mutation (`Put` or `Delete`) is serialized into a checksummed binary
//! frame and appended to the log **before** the corresponding in-memory
//! update is acknowledged. On restart the log is replayed to reconstruct the
//! memtable, guaranteeing that no acknowledged write is lost.
//!
//! ## Binary Frame Format
//!
//! All integers are big-endian:
//!
//! ```text
//! [payload_len: u32][crc32: u32][type: u8][seq: u64][key_len: u32][key][val_len: u32][val]
//! ```
//!
//! `payload_len` counts everything after the CRC. `crc32` is CRC-32 (IEEE)
//! over the payload bytes. `type` is 0 for Put, 1 for Delete; a Delete frame
//! always carries `val_len = 0`.
//!
//! ## Write Modes
//!
//! [`Wal::append`] either writes directly through a buffered writer under a
//! mutex (direct mode), or hands the frame to a background group-commit
//! worker that batches frames and amortizes `fsync` (group-commit mode, the
//! default). In group-commit mode an append is acknowledged once enqueued;
//! [`Wal::wait_for_pending`] erects a durability barrier, and I/O errors from
//! background flushes surface at the next synchronous call.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{Record, Wal, WalOptions, WalReader};
//!
//! let mut wal = Wal::open("wal.log", WalOptions::default()).unwrap();
//! wal.append(&Record::Put {
//!     seq: 1,
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//! }).unwrap();
//! wal.wait_for_pending().unwrap();
//! wal.close().unwrap();
//!
//! let mut r = WalReader::open("wal.log").unwrap();
//! r.replay(|rec| -> Result<(), wal::WalError> {
//!     println!("{:?}", rec);
//!     Ok(())
//! }).unwrap();
//! ```

use std::io;

use thiserror::Error;

mod reader;
mod record;
mod writer;

pub use reader::WalReader;
pub use record::{Record, FRAME_HEADER_LEN};
pub use writer::{Wal, WalOptions};

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying file open/read/write/sync failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A short read before the first complete record during replay.
    #[error("wal truncated before the first complete record")]
    Truncated,

    /// A frame's CRC-32 did not match its payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The input buffer is too small to hold the frame it claims to contain.
    #[error("buffer too short for record frame")]
    BufferTooShort,

    /// The frame's type byte is neither Put nor Delete.
    #[error("unknown record type: {0}")]
    UnknownRecordType(u8),

    /// An operation was attempted on a closed WAL.
    #[error("wal is closed")]
    Closed,
}

#[cfg(test)]
mod tests;
