//! Sequential replay of a WAL file, tolerant to a torn tail.
//!
//! A single-appender log can only lose bytes at its end, so a short read
//! after at least one good record is treated as a crash artifact and replay
//! ends cleanly. A checksum failure, by contrast, means mid-stream damage
//! and is always surfaced.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};

use crate::{Record, WalError, FRAME_HEADER_LEN};

/// Outcome of trying to fill a fixed-size buffer from the stream.
enum Fill {
    /// Buffer filled completely.
    Full,
    /// Stream ended exactly on a frame boundary.
    CleanEof,
    /// Stream ended partway through the buffer.
    Torn,
}

/// Sequential WAL reader.
///
/// Generic over any `Read` implementor so tests can replay from in-memory
/// buffers; production code uses [`WalReader::open`] on a file.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    /// Opens an existing WAL file for sequential replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let file = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(file),
        })
    }
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Reads exactly one frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream. A stream that ends
    /// partway through a frame yields [`WalError::Truncated`]; it is up to
    /// the caller (normally [`WalReader::replay`]) to decide whether that is
    /// a tolerable torn tail.
    pub fn read_record(&mut self) -> Result<Option<Record>, WalError> {
        let mut frame = vec![0u8; FRAME_HEADER_LEN];
        match read_full(&mut self.rdr, &mut frame)? {
            Fill::CleanEof => return Ok(None),
            Fill::Torn => return Err(WalError::Truncated),
            Fill::Full => {}
        }
        let payload_len = BigEndian::read_u32(&frame[0..4]) as usize;

        // Read through `take` rather than pre-sizing a buffer: a corrupted
        // length prefix must not trigger a multi-gigabyte allocation.
        let read = (&mut self.rdr)
            .take(payload_len as u64)
            .read_to_end(&mut frame)?;
        if read < payload_len {
            return Err(WalError::Truncated);
        }

        Record::decode(&frame).map(Some)
    }

    /// Replays every record in the log, invoking `callback` for each.
    ///
    /// # Termination
    ///
    /// * Clean end of stream → `Ok(())`.
    /// * Torn tail after at least one delivered record → `Ok(())`; the tail
    ///   is the residue of a crashed append.
    /// * Torn read with zero delivered records → [`WalError::Truncated`].
    /// * Checksum failure, I/O error, or malformed frame → the error.
    /// * An error from `callback` aborts replay and propagates.
    pub fn replay<E, F>(&mut self, mut callback: F) -> Result<(), E>
    where
        F: FnMut(Record) -> Result<(), E>,
        E: From<WalError>,
    {
        let mut delivered = 0usize;
        loop {
            match self.read_record() {
                Ok(Some(record)) => {
                    callback(record)?;
                    delivered += 1;
                }
                Ok(None) => return Ok(()),
                Err(WalError::Truncated) => {
                    if delivered == 0 {
                        return Err(E::from(WalError::Truncated));
                    }
                    tracing::warn!(delivered, "wal ends in a torn frame; dropping the tail");
                    return Ok(());
                }
                Err(e) => return Err(E::from(e)),
            }
        }
    }
}

/// Fills `buf` completely, distinguishing a clean EOF (zero bytes read)
/// from a torn one (some bytes read). `std::io::Read::read_exact` collapses
/// the two cases, and replay needs them apart.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 { Fill::CleanEof } else { Fill::Torn });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Fill::Full)
}
