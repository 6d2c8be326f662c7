use super::*;
use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn make_put(seq: u64, key: &[u8], value: &[u8]) -> Record {
    Record::Put {
        seq,
        key: key.to_vec(),
        value: value.to_vec(),
    }
}

fn make_del(seq: u64, key: &[u8]) -> Record {
    Record::Delete {
        seq,
        key: key.to_vec(),
    }
}

fn direct_options() -> WalOptions {
    WalOptions {
        group_commit: false,
        ..WalOptions::default()
    }
}

fn replay_all(path: &std::path::Path) -> Result<Vec<Record>, WalError> {
    let mut reader = WalReader::open(path)?;
    let mut recs = Vec::new();
    reader.replay(|r| {
        recs.push(r);
        Ok::<(), WalError>(())
    })?;
    Ok(recs)
}

fn replay_from_bytes(data: &[u8]) -> Result<Vec<Record>, WalError> {
    let mut reader = WalReader::from_reader(Cursor::new(data.to_vec()));
    let mut recs = Vec::new();
    reader.replay(|r| {
        recs.push(r);
        Ok::<(), WalError>(())
    })?;
    Ok(recs)
}

// -------------------- Codec roundtrips --------------------

#[test]
fn encode_decode_put_roundtrip() {
    let rec = make_put(42, b"hello", b"world");
    assert_eq!(Record::decode(&rec.encode()).unwrap(), rec);
}

#[test]
fn encode_decode_delete_roundtrip() {
    let rec = make_del(7, b"gone");
    assert_eq!(Record::decode(&rec.encode()).unwrap(), rec);
}

#[test]
fn encode_decode_empty_key_and_value() {
    let rec = make_put(1, b"", b"");
    assert_eq!(Record::decode(&rec.encode()).unwrap(), rec);

    let rec = make_del(2, b"");
    assert_eq!(Record::decode(&rec.encode()).unwrap(), rec);
}

#[test]
fn encode_decode_binary_payload() {
    let rec = make_put(1, &[0x00, 0xFF, 0x80], &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(Record::decode(&rec.encode()).unwrap(), rec);
}

#[test]
fn encode_decode_seq_extremes() {
    for seq in [0, u64::MAX] {
        let rec = make_put(seq, b"k", b"v");
        assert_eq!(Record::decode(&rec.encode()).unwrap(), rec);
    }
}

#[test]
fn decode_ignores_trailing_bytes() {
    let rec = make_put(9, b"k", b"v");
    let mut frame = rec.encode();
    frame.extend_from_slice(b"trailing garbage");
    assert_eq!(Record::decode(&frame).unwrap(), rec);
}

// -------------------- Codec corruption --------------------

#[test]
fn decode_too_short_buffers() {
    assert!(matches!(
        Record::decode(&[]),
        Err(WalError::BufferTooShort)
    ));
    assert!(matches!(
        Record::decode(&[0u8; 7]),
        Err(WalError::BufferTooShort)
    ));

    // Frame claims more payload than the buffer holds.
    let mut frame = make_put(1, b"k", b"v").encode();
    frame.truncate(frame.len() - 1);
    assert!(matches!(
        Record::decode(&frame),
        Err(WalError::BufferTooShort)
    ));
}

#[test]
fn decode_unknown_type_byte() {
    let mut frame = make_put(1, b"k", b"v").encode();
    // Rewrite the type byte and fix up the CRC so only the type is wrong.
    frame[FRAME_HEADER_LEN] = 7;
    let crc = {
        let mut h = crc32fast::Hasher::new();
        h.update(&frame[FRAME_HEADER_LEN..]);
        h.finalize()
    };
    frame[4..8].copy_from_slice(&crc.to_be_bytes());
    assert!(matches!(
        Record::decode(&frame),
        Err(WalError::UnknownRecordType(7))
    ));
}

#[test]
fn checksum_field_bit_flips_are_detected() {
    let frame = make_put(3, b"key", b"value").encode();
    for byte in 4..8 {
        for bit in 0..8 {
            let mut corrupted = frame.clone();
            corrupted[byte] ^= 1 << bit;
            assert!(
                matches!(Record::decode(&corrupted), Err(WalError::ChecksumMismatch)),
                "flip at byte {} bit {} went undetected",
                byte,
                bit
            );
        }
    }
}

#[test]
fn payload_bit_flips_are_detected() {
    let frame = make_put(3, b"key", b"value").encode();
    for byte in FRAME_HEADER_LEN..frame.len() {
        for bit in 0..8 {
            let mut corrupted = frame.clone();
            corrupted[byte] ^= 1 << bit;
            assert!(
                matches!(Record::decode(&corrupted), Err(WalError::ChecksumMismatch)),
                "flip at byte {} bit {} went undetected",
                byte,
                bit
            );
        }
    }
}

#[test]
fn length_field_bit_flips_fail_decode() {
    // A flipped length bit either shrinks the payload (CRC mismatch) or
    // claims more bytes than the buffer holds (too short). Decode must fail
    // one way or the other, never panic.
    let frame = make_put(3, b"key", b"value").encode();
    for byte in 0..4 {
        for bit in 0..8 {
            let mut corrupted = frame.clone();
            corrupted[byte] ^= 1 << bit;
            assert!(
                Record::decode(&corrupted).is_err(),
                "flip at byte {} bit {} went undetected",
                byte,
                bit
            );
        }
    }
}

// -------------------- Direct mode write & replay --------------------

#[test]
fn direct_append_sync_replay() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut wal = Wal::open(&path, direct_options()).unwrap();
    wal.append(&make_put(1, b"k", b"v1")).unwrap();
    wal.append(&make_put(2, b"k2", b"v2")).unwrap();
    wal.append(&make_del(3, b"k")).unwrap();
    wal.sync().unwrap();

    let recs = replay_all(&path).unwrap();
    assert_eq!(
        recs,
        vec![
            make_put(1, b"k", b"v1"),
            make_put(2, b"k2", b"v2"),
            make_del(3, b"k"),
        ]
    );
    wal.close().unwrap();
}

#[test]
fn close_flushes_buffered_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut wal = Wal::open(&path, direct_options()).unwrap();
    wal.append(&make_put(1, b"k", b"v")).unwrap();
    // No sync; close must flush the write buffer.
    wal.close().unwrap();

    assert_eq!(replay_all(&path).unwrap().len(), 1);
}

#[test]
fn drop_without_close_flushes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let wal = Wal::open(&path, direct_options()).unwrap();
        wal.append(&make_put(1, b"k", b"v")).unwrap();
    }

    assert_eq!(replay_all(&path).unwrap().len(), 1);
}

#[test]
fn append_to_existing_wal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut wal = Wal::open(&path, direct_options()).unwrap();
        wal.append(&make_put(1, b"a", b"1")).unwrap();
        wal.close().unwrap();
    }
    {
        let mut wal = Wal::open(&path, direct_options()).unwrap();
        wal.append(&make_put(2, b"b", b"2")).unwrap();
        wal.close().unwrap();
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs, vec![make_put(1, b"a", b"1"), make_put(2, b"b", b"2")]);
}

// -------------------- Closed WAL --------------------

#[test]
fn operations_after_close_fail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut wal = Wal::open(&path, direct_options()).unwrap();
    wal.close().unwrap();

    assert!(matches!(
        wal.append(&make_put(1, b"k", b"v")),
        Err(WalError::Closed)
    ));
    assert!(matches!(wal.sync(), Err(WalError::Closed)));
    assert!(matches!(wal.wait_for_pending(), Err(WalError::Closed)));
    assert!(matches!(wal.close(), Err(WalError::Closed)));
}

#[test]
fn close_group_commit_wal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut wal = Wal::open(&path, WalOptions::default()).unwrap();
    for i in 0..5u64 {
        wal.append(&make_put(i, b"k", b"v")).unwrap();
    }
    // Close must stop the worker and make everything batched durable.
    wal.close().unwrap();

    assert_eq!(replay_all(&path).unwrap().len(), 5);
}

// -------------------- Group commit --------------------

#[test]
fn group_commit_replay_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut wal = Wal::open(&path, WalOptions::default()).unwrap();
    for i in 0..10u64 {
        wal.append(&make_put(i, format!("k{}", i).as_bytes(), b"v"))
            .unwrap();
    }
    wal.wait_for_pending().unwrap();

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs.len(), 10);
    for (i, rec) in recs.iter().enumerate() {
        assert_eq!(rec.seq(), i as u64);
    }
    wal.close().unwrap();
}

#[test]
fn barrier_covers_prior_appends_from_many_threads() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let wal = Arc::new(Wal::open(&path, WalOptions::default()).unwrap());

    let mut handles = Vec::new();
    for t in 0..4u64 {
        let wal = Arc::clone(&wal);
        handles.push(thread::spawn(move || {
            for i in 0..25u64 {
                wal.append(&make_put(t * 25 + i, b"k", b"v")).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    wal.wait_for_pending().unwrap();
    assert_eq!(replay_all(&path).unwrap().len(), 100);
}

#[test]
fn group_commit_preserves_enqueue_order_per_thread() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut wal = Wal::open(
        &path,
        WalOptions {
            group_commit: true,
            group_commit_interval: std::time::Duration::from_millis(1),
            ..WalOptions::default()
        },
    )
    .unwrap();
    // More than one batch worth of records from one producer.
    for i in 0..37u64 {
        wal.append(&make_put(i, b"k", b"v")).unwrap();
    }
    wal.wait_for_pending().unwrap();
    wal.close().unwrap();

    let recs = replay_all(&path).unwrap();
    let seqs: Vec<u64> = recs.iter().map(|r| r.seq()).collect();
    assert_eq!(seqs, (0..37).collect::<Vec<u64>>());
}

#[test]
fn sync_requests_flush_without_waiting() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut wal = Wal::open(&path, WalOptions::default()).unwrap();
    wal.append(&make_put(1, b"k", b"v")).unwrap();
    wal.sync().unwrap();
    // The flush request is asynchronous; the barrier makes it observable.
    wal.wait_for_pending().unwrap();

    assert_eq!(replay_all(&path).unwrap().len(), 1);
    wal.close().unwrap();
}

// -------------------- Reader: EOF and truncation --------------------

#[test]
fn replay_empty_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    fs::write(&path, b"").unwrap();

    assert!(replay_all(&path).unwrap().is_empty());
}

#[test]
fn truncated_with_zero_records_is_an_error() {
    // Eight header bytes and nothing else: not even one full frame.
    let result = replay_from_bytes(&[0, 0, 0, 21, 1, 2, 3, 4]);
    assert!(matches!(result, Err(WalError::Truncated)));

    // A torn header alone is the same story.
    let result = replay_from_bytes(&[0, 1, 2]);
    assert!(matches!(result, Err(WalError::Truncated)));
}

#[test]
fn torn_tail_after_valid_records_is_tolerated() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut wal = Wal::open(&path, direct_options()).unwrap();
        wal.append(&make_put(1, b"k1", b"v1")).unwrap();
        wal.append(&make_put(2, b"k2", b"v2")).unwrap();
        wal.close().unwrap();
    }

    // Append a partial frame: a length prefix with no body behind it.
    let mut data = fs::read(&path).unwrap();
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x20]);
    fs::write(&path, &data).unwrap();

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs, vec![make_put(1, b"k1", b"v1"), make_put(2, b"k2", b"v2")]);
}

#[test]
fn trailing_truncation_drops_only_the_torn_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut wal = Wal::open(&path, direct_options()).unwrap();
        for i in 0..5u64 {
            wal.append(&make_put(i, format!("k{}", i).as_bytes(), b"v"))
                .unwrap();
        }
        wal.append(&make_put(5, b"big", &vec![b'x'; 4096])).unwrap();
        wal.sync().unwrap();
        wal.close().unwrap();
    }

    let mut data = fs::read(&path).unwrap();
    data.truncate(data.len() - 2);
    fs::write(&path, &data).unwrap();

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs.len(), 5);
    for (i, rec) in recs.iter().enumerate() {
        assert_eq!(rec.seq(), i as u64);
    }
}

#[test]
fn every_truncation_point_yields_the_whole_frames() {
    let records: Vec<Record> = (0..4u64)
        .map(|i| make_put(i, format!("key{}", i).as_bytes(), format!("val{}", i).as_bytes()))
        .collect();

    let mut data = Vec::new();
    let mut boundaries = vec![0usize];
    for rec in &records {
        data.extend_from_slice(&rec.encode());
        boundaries.push(data.len());
    }

    for cut in 0..=data.len() {
        let whole = boundaries.iter().filter(|&&b| b > 0 && b <= cut).count();
        let result = replay_from_bytes(&data[..cut]);
        if whole == 0 && cut > 0 {
            // Partial first frame and nothing delivered: surfaced.
            assert!(matches!(result, Err(WalError::Truncated)), "cut={}", cut);
        } else {
            let recs = result.unwrap();
            assert_eq!(recs.len(), whole, "cut={}", cut);
            assert_eq!(recs[..], records[..whole]);
        }
    }
}

// -------------------- Reader: corruption --------------------

#[test]
fn corrupted_checksum_field_surfaces_mismatch() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut wal = Wal::open(&path, direct_options()).unwrap();
        wal.append(&make_put(1, b"k", b"v")).unwrap();
        wal.close().unwrap();
    }

    // XOR a byte inside the checksum field of the first frame.
    let mut data = fs::read(&path).unwrap();
    data[5] ^= 0xFF;
    fs::write(&path, &data).unwrap();

    let result = replay_all(&path);
    assert!(matches!(result, Err(WalError::ChecksumMismatch)));
}

#[test]
fn mid_stream_corruption_is_not_skipped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut wal = Wal::open(&path, direct_options()).unwrap();
        wal.append(&make_put(1, b"k1", b"v1")).unwrap();
        wal.append(&make_put(2, b"k2", b"v2")).unwrap();
        wal.close().unwrap();
    }

    // Damage the payload of the *first* record; the intact second record
    // must not be delivered past the error.
    let mut data = fs::read(&path).unwrap();
    data[FRAME_HEADER_LEN + 2] ^= 0x01;
    fs::write(&path, &data).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    let mut recs = Vec::new();
    let result = reader.replay(|r| {
        recs.push(r);
        Ok::<(), WalError>(())
    });
    assert!(matches!(result, Err(WalError::ChecksumMismatch)));
    assert!(recs.is_empty());
}

// -------------------- Reader: callback errors --------------------

#[test]
fn callback_error_aborts_replay() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut wal = Wal::open(&path, direct_options()).unwrap();
        for i in 0..3u64 {
            wal.append(&make_put(i, b"k", b"v")).unwrap();
        }
        wal.close().unwrap();
    }

    let mut reader = WalReader::open(&path).unwrap();
    let mut seen = 0;
    let result = reader.replay(|_| {
        seen += 1;
        if seen == 2 {
            Err(WalError::Closed)
        } else {
            Ok(())
        }
    });
    assert!(matches!(result, Err(WalError::Closed)));
    assert_eq!(seen, 2);
}

// -------------------- Stress --------------------

#[test]
fn many_records_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let n = 5_000u64;
    {
        let mut wal = Wal::open(&path, direct_options()).unwrap();
        for i in 0..n {
            wal.append(&make_put(
                i,
                format!("key{}", i).as_bytes(),
                format!("val{}", i).as_bytes(),
            ))
            .unwrap();
        }
        wal.close().unwrap();
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs.len(), n as usize);
    for (i, rec) in recs.iter().enumerate() {
        assert_eq!(rec.seq(), i as u64);
    }
}
