//! Write-ahead log
//!
//! The WAL is a directory of numbered segment files `wal-000001.log`, ...
//! Each committed batch is exactly one [`WalRecord::Commit`], so replay is
//! all-or-nothing per transaction.
//!
//! - `writer`: appends records to the active segment, fsyncs per [`DurabilityMode`]
//! - `reader`: replays segments, truncating a torn tail
//!
//! The storage engine rotates to a fresh segment whenever it freezes a
//! memtable; older segments are deleted once their data is in an SSTable.

pub mod reader;
pub mod writer;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use reader::{SegmentReplay, WalReader};
pub use writer::{WalCounters, WalWriter};

/// A single key mutation inside a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    /// Insert or overwrite
    Put {
        /// Storage key
        key: String,
        /// Raw value bytes
        value: Vec<u8>,
    },
    /// Remove
    Delete {
        /// Storage key
        key: String,
    },
}

impl WalOp {
    /// Key touched by the op
    pub fn key(&self) -> &str {
        match self {
            WalOp::Put { key, .. } | WalOp::Delete { key } => key,
        }
    }
}

/// WAL record types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    /// An atomically committed batch
    Commit {
        /// Commit sequence assigned by the engine
        seq: u64,
        /// Mutations in application order
        ops: Vec<WalOp>,
    },
}

impl WalRecord {
    /// Commit sequence of the record
    pub fn seq(&self) -> u64 {
        match self {
            WalRecord::Commit { seq, .. } => *seq,
        }
    }
}

/// When the WAL forces data to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync after every commit (slow, maximum durability)
    Strict,

    /// fsync every N commits OR every T milliseconds
    ///
    /// Records always reach the OS before the commit returns, so a process
    /// crash loses nothing; a power failure may lose up to one batch.
    Batched {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum writes between fsyncs
        batch_size: usize,
    },
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Batched {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

/// Path of segment `id` inside `dir`
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", SEGMENT_PREFIX, id, SEGMENT_SUFFIX))
}

/// Segment ids present in `dir`, ascending
pub fn list_segments(dir: &Path) -> std::io::Result<Vec<u64>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id) = name
            .strip_prefix(SEGMENT_PREFIX)
            .and_then(|rest| rest.strip_suffix(SEGMENT_SUFFIX))
            .and_then(|num| num.parse::<u64>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_segment_naming_and_listing() {
        let dir = TempDir::new().unwrap();
        for id in [3, 1, 12] {
            std::fs::write(segment_path(dir.path(), id), b"").unwrap();
        }
        std::fs::write(dir.path().join("MANIFEST"), b"").unwrap();
        assert_eq!(list_segments(dir.path()).unwrap(), vec![1, 3, 12]);
        assert!(segment_path(dir.path(), 1)
            .to_string_lossy()
            .ends_with("wal-000001.log"));
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(list_segments(&dir.path().join("nope")).unwrap().is_empty());
    }
}
