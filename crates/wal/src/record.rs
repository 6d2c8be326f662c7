//! The WAL record codec: a self-describing, checksum-guarded binary frame
//! for a single mutation.

use byteorder::{BigEndian, ByteOrder};
use crc32fast::Hasher as Crc32;

use crate::WalError;

/// Bytes occupied by the frame header (`payload_len` + `crc32`).
pub const FRAME_HEADER_LEN: usize = 8;

/// Fixed payload overhead: type (1) + seq (8) + key_len (4) + val_len (4).
const PAYLOAD_FIXED_LEN: usize = 17;

const TYPE_PUT: u8 = 0;
const TYPE_DELETE: u8 = 1;

/// A single WAL record representing either a key-value insertion or a
/// deletion.
///
/// Each record carries the **sequence number** assigned by the engine, used
/// during replay for per-key conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A key-value insertion.
    Put {
        /// Sequence number assigned by the engine.
        seq: u64,
        /// The lookup key.
        key: Vec<u8>,
        /// The payload value.
        value: Vec<u8>,
    },
    /// A key deletion (tombstone). Encoded with a zero-length value.
    Delete {
        /// Sequence number assigned by the engine.
        seq: u64,
        /// The key to delete.
        key: Vec<u8>,
    },
}

impl Record {
    /// Serializes the record into a complete frame, including the length
    /// prefix and the CRC-32 of the payload.
    pub fn encode(&self) -> Vec<u8> {
        let (type_byte, seq, key, value): (u8, u64, &[u8], &[u8]) = match self {
            Record::Put { seq, key, value } => (TYPE_PUT, *seq, key.as_slice(), value.as_slice()),
            Record::Delete { seq, key } => (TYPE_DELETE, *seq, key.as_slice(), &[]),
        };

        let payload_len = PAYLOAD_FIXED_LEN + key.len() + value.len();
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload_len);

        buf.extend_from_slice(&(payload_len as u32).to_be_bytes());
        buf.extend_from_slice(&[0u8; 4]); // crc placeholder, filled below
        buf.push(type_byte);
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buf.extend_from_slice(value);

        let mut hasher = Crc32::new();
        hasher.update(&buf[FRAME_HEADER_LEN..]);
        let crc = hasher.finalize();
        buf[4..FRAME_HEADER_LEN].copy_from_slice(&crc.to_be_bytes());

        buf
    }

    /// Decodes a complete frame, validating the length prefix and CRC.
    ///
    /// The buffer must hold the entire frame (`FRAME_HEADER_LEN` +
    /// `payload_len` bytes); trailing bytes beyond the frame are ignored.
    ///
    /// # Errors
    ///
    /// * [`WalError::BufferTooShort`] if the buffer cannot hold the frame it
    ///   claims, or the payload is structurally too small.
    /// * [`WalError::ChecksumMismatch`] if the CRC does not match.
    /// * [`WalError::UnknownRecordType`] for an unrecognized type byte.
    pub fn decode(buf: &[u8]) -> Result<Record, WalError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(WalError::BufferTooShort);
        }
        let payload_len = BigEndian::read_u32(&buf[0..4]) as usize;
        let checksum = BigEndian::read_u32(&buf[4..8]);
        if buf.len() < FRAME_HEADER_LEN + payload_len {
            return Err(WalError::BufferTooShort);
        }
        let payload = &buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload_len];

        let mut hasher = Crc32::new();
        hasher.update(payload);
        if hasher.finalize() != checksum {
            return Err(WalError::ChecksumMismatch);
        }

        // The CRC protects the payload, but the frame may still have been
        // written by a buggy or hostile producer; bounds-check every field.
        if payload_len < PAYLOAD_FIXED_LEN {
            return Err(WalError::BufferTooShort);
        }
        let type_byte = payload[0];
        let seq = BigEndian::read_u64(&payload[1..9]);
        let key_len = BigEndian::read_u32(&payload[9..13]) as usize;
        let rest = &payload[13..];
        if rest.len() < key_len + 4 {
            return Err(WalError::BufferTooShort);
        }
        let key = rest[..key_len].to_vec();
        let val_len = BigEndian::read_u32(&rest[key_len..key_len + 4]) as usize;
        let val_bytes = &rest[key_len + 4..];
        if val_bytes.len() < val_len {
            return Err(WalError::BufferTooShort);
        }

        match type_byte {
            TYPE_PUT => Ok(Record::Put {
                seq,
                key,
                value: val_bytes[..val_len].to_vec(),
            }),
            TYPE_DELETE => Ok(Record::Delete { seq, key }),
            t => Err(WalError::UnknownRecordType(t)),
        }
    }

    /// The sequence number carried by the record.
    pub fn seq(&self) -> u64 {
        match self {
            Record::Put { seq, .. } | Record::Delete { seq, .. } => *seq,
        }
    }
}
