//! WAL writer with durability mode support.
//!
//! The writer appends encoded records to one segment file and decides when
//! to fsync based on the configured [`DurabilityMode`].

use super::{segment_path, DurabilityMode, WalRecord};
use crate::encoding::encode_record;
use mosaic_core::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Cumulative WAL operation counters.
///
/// These counters accumulate over the lifetime of the writer and are never
/// reset.
#[derive(Debug, Clone, Default)]
pub struct WalCounters {
    /// Total record appends
    pub wal_appends: u64,
    /// Total fsync calls
    pub sync_calls: u64,
    /// Total bytes written
    pub bytes_written: u64,
}

/// Appends records to a single WAL segment
pub struct WalWriter {
    path: PathBuf,
    segment_id: u64,
    file: BufWriter<File>,
    durability: DurabilityMode,
    size: u64,
    writes_since_sync: usize,
    last_sync_time: Instant,
    has_unsynced_data: bool,
    counters: WalCounters,
}

impl WalWriter {
    /// Open (or create) segment `segment_id` in `dir` for appending
    pub fn open(dir: &Path, segment_id: u64, durability: DurabilityMode) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = segment_path(dir, segment_id);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(WalWriter {
            path,
            segment_id,
            file: BufWriter::new(file),
            durability,
            size,
            writes_since_sync: 0,
            last_sync_time: Instant::now(),
            has_unsynced_data: false,
            counters: WalCounters::default(),
        })
    }

    /// Append a record.
    ///
    /// The bytes are handed to the OS before returning. Whether they are
    /// also fsynced depends on the durability mode.
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        let bytes = encode_record(record)?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;

        self.size += bytes.len() as u64;
        self.writes_since_sync += 1;
        self.has_unsynced_data = true;
        self.counters.wal_appends += 1;
        self.counters.bytes_written += bytes.len() as u64;

        self.maybe_sync()
    }

    fn maybe_sync(&mut self) -> Result<()> {
        match self.durability {
            DurabilityMode::Strict => self.sync(),
            DurabilityMode::Batched {
                interval_ms,
                batch_size,
            } => {
                if self.writes_since_sync >= batch_size
                    || self.last_sync_time.elapsed().as_millis() as u64 >= interval_ms
                {
                    self.sync()?;
                }
                Ok(())
            }
        }
    }

    /// Force buffered data to stable storage
    pub fn sync(&mut self) -> Result<()> {
        if !self.has_unsynced_data {
            return Ok(());
        }
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        self.counters.sync_calls += 1;
        self.writes_since_sync = 0;
        self.last_sync_time = Instant::now();
        self.has_unsynced_data = false;
        Ok(())
    }

    /// Segment number being written
    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Path of the active segment
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the active segment
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Snapshot of cumulative counters
    pub fn counters(&self) -> WalCounters {
        self.counters.clone()
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            tracing::warn!(target: "mosaic::wal", path = ?self.path, error = %e, "Final WAL sync failed");
        }
    }
}
