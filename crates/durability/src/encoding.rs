//! WAL record encoding and decoding
//!
//! ## Record Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: size of type + payload + crc (NOT including length itself)
//! - **type**: record type tag (1 = Commit)
//! - **payload**: bincode-serialized [`WalRecord`]
//! - **crc32**: CRC32 over \[type\]\[payload\]
//!
//! A buffer that ends before the declared length is a torn tail, reported
//! as [`Decoded::Incomplete`]. A complete record whose checksum or payload
//! is wrong is `Error::Corrupt`.

use crate::wal::WalRecord;
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher;
use mosaic_core::error::{Error, Result};
use std::io::Cursor;

const TYPE_COMMIT: u8 = 1;

/// Minimum encoded size of type + crc
const MIN_BODY_LEN: usize = 5;

/// Outcome of decoding at an offset
#[derive(Debug, PartialEq)]
pub enum Decoded {
    /// A full record and the number of bytes it occupied
    Record(WalRecord, usize),
    /// Not enough bytes for a full record (torn write at the tail)
    Incomplete,
}

fn type_tag(record: &WalRecord) -> u8 {
    match record {
        WalRecord::Commit { .. } => TYPE_COMMIT,
    }
}

/// Encode a WAL record to bytes
///
/// Format: `[length: u32][type: u8][payload: bytes][crc32: u32]`
pub fn encode_record(record: &WalRecord) -> Result<Vec<u8>> {
    let tag = type_tag(record);
    let payload = bincode::serialize(record)?;

    let total_len = 1 + payload.len() + 4;
    let mut buf = Vec::with_capacity(4 + total_len);
    buf.extend_from_slice(&(total_len as u32).to_le_bytes());
    buf.push(tag);
    buf.extend_from_slice(&payload);

    let mut hasher = Hasher::new();
    hasher.update(&[tag]);
    hasher.update(&payload);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());

    Ok(buf)
}

/// Decode one record from the front of `buf`
///
/// `offset` is the file offset of `buf[0]`, used only in error messages.
pub fn decode_record(buf: &[u8], offset: u64) -> Result<Decoded> {
    if buf.len() < 4 {
        return Ok(Decoded::Incomplete);
    }
    let mut cursor = Cursor::new(buf);
    let total_len = cursor.read_u32::<LittleEndian>()? as usize;

    if total_len < MIN_BODY_LEN {
        return Err(Error::Corrupt(format!(
            "offset {}: invalid record length {} (minimum is {})",
            offset, total_len, MIN_BODY_LEN
        )));
    }
    if buf.len() < 4 + total_len {
        return Ok(Decoded::Incomplete);
    }

    let tag = buf[4];
    let payload = &buf[5..4 + total_len - 4];
    let crc_bytes = &buf[4 + total_len - 4..4 + total_len];
    let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

    let mut hasher = Hasher::new();
    hasher.update(&[tag]);
    hasher.update(payload);
    let computed = hasher.finalize();
    if computed != stored_crc {
        return Err(Error::Corrupt(format!(
            "offset {}: CRC mismatch (stored {:08x}, computed {:08x})",
            offset, stored_crc, computed
        )));
    }

    let record: WalRecord = bincode::deserialize(payload).map_err(|e| {
        Error::Corrupt(format!("offset {}: undecodable record payload: {}", offset, e))
    })?;
    if type_tag(&record) != tag {
        return Err(Error::Corrupt(format!(
            "offset {}: type tag {} does not match payload",
            offset, tag
        )));
    }

    Ok(Decoded::Record(record, 4 + total_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalOp;
    use proptest::prelude::*;

    fn commit(seq: u64) -> WalRecord {
        WalRecord::Commit {
            seq,
            ops: vec![
                WalOp::Put {
                    key: "users:1".into(),
                    value: b"alice".to_vec(),
                },
                WalOp::Delete {
                    key: "users:2".into(),
                },
            ],
        }
    }

    #[test]
    fn test_encode_decode() {
        let bytes = encode_record(&commit(7)).unwrap();
        match decode_record(&bytes, 0).unwrap() {
            Decoded::Record(rec, used) => {
                assert_eq!(rec, commit(7));
                assert_eq!(used, bytes.len());
            }
            Decoded::Incomplete => panic!("expected a record"),
        }
    }

    #[test]
    fn test_truncated_is_incomplete() {
        let bytes = encode_record(&commit(1)).unwrap();
        for cut in [0, 3, 4, bytes.len() - 1] {
            assert_eq!(decode_record(&bytes[..cut], 0).unwrap(), Decoded::Incomplete);
        }
    }

    #[test]
    fn test_bit_flip_is_corrupt() {
        let mut bytes = encode_record(&commit(1)).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        assert!(matches!(decode_record(&bytes, 100), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_tiny_length_is_corrupt() {
        let bytes = [2u8, 0, 0, 0, 1, 0];
        assert!(matches!(decode_record(&bytes, 0), Err(Error::Corrupt(_))));
    }

    fn op() -> impl Strategy<Value = WalOp> {
        prop_oneof![
            ("[a-z:0-9]{1,12}", prop::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(key, value)| WalOp::Put { key, value }),
            "[a-z:0-9]{1,12}".prop_map(|key| WalOp::Delete { key }),
        ]
    }

    proptest! {
        #[test]
        fn prop_back_to_back_records_split_cleanly(
            batches in prop::collection::vec(prop::collection::vec(op(), 0..6), 1..6),
            cut in any::<prop::sample::Index>(),
        ) {
            let records: Vec<WalRecord> = batches
                .into_iter()
                .enumerate()
                .map(|(i, ops)| WalRecord::Commit { seq: i as u64 + 1, ops })
                .collect();
            let mut log = Vec::new();
            for r in &records {
                log.extend(encode_record(r).unwrap());
            }

            let mut at = 0;
            for r in &records {
                match decode_record(&log[at..], at as u64).unwrap() {
                    Decoded::Record(got, used) => {
                        prop_assert_eq!(&got, r);
                        at += used;
                    }
                    Decoded::Incomplete => prop_assert!(false, "record at {} incomplete", at),
                }
            }
            prop_assert_eq!(at, log.len());

            // A torn tail never decodes as a record
            let last = encode_record(records.last().unwrap()).unwrap();
            let torn = cut.index(last.len());
            prop_assert_eq!(decode_record(&last[..torn], 0).unwrap(), Decoded::Incomplete);
        }
    }
}
