//! WAL replay
//!
//! Reads every record of a segment in order. A torn record at the very end
//! (crash during append) is cut off and the file truncated to the last
//! complete record. A checksum failure anywhere else is `Corrupt`: the log
//! cannot be trusted past that point and the error is surfaced.

use super::{list_segments, segment_path, WalRecord};
use crate::encoding::{decode_record, Decoded};
use mosaic_core::error::Result;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Records recovered from one segment
#[derive(Debug, Default)]
pub struct SegmentReplay {
    /// Complete records in file order
    pub records: Vec<WalRecord>,
    /// Length of the valid prefix in bytes
    pub valid_len: u64,
    /// Bytes cut off from a torn tail
    pub truncated_bytes: u64,
}

/// Reads WAL segments from a directory
pub struct WalReader {
    dir: PathBuf,
}

impl WalReader {
    /// Reader over the segments in `dir`
    pub fn new(dir: &Path) -> Self {
        WalReader {
            dir: dir.to_path_buf(),
        }
    }

    /// Segment ids present on disk, ascending
    pub fn segments(&self) -> Result<Vec<u64>> {
        Ok(list_segments(&self.dir)?)
    }

    /// Replay one segment, truncating a torn tail in place
    pub fn replay_segment(&self, id: u64) -> Result<SegmentReplay> {
        let path = segment_path(&self.dir, id);
        let data = std::fs::read(&path)?;

        let mut replay = SegmentReplay::default();
        let mut pos = 0usize;
        while pos < data.len() {
            match decode_record(&data[pos..], pos as u64)? {
                Decoded::Record(record, used) => {
                    replay.records.push(record);
                    pos += used;
                }
                Decoded::Incomplete => break,
            }
        }

        replay.valid_len = pos as u64;
        replay.truncated_bytes = (data.len() - pos) as u64;
        if replay.truncated_bytes > 0 {
            warn!(
                target: "mosaic::wal",
                segment = id,
                valid_len = replay.valid_len,
                truncated = replay.truncated_bytes,
                "Truncating torn WAL tail"
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        Ok(replay)
    }

    /// Replay every segment with id >= `from_segment`, in order
    pub fn replay_from(&self, from_segment: u64) -> Result<Vec<WalRecord>> {
        let mut records = Vec::new();
        for id in self.segments()? {
            if id < from_segment {
                continue;
            }
            records.extend(self.replay_segment(id)?.records);
        }
        Ok(records)
    }
}
