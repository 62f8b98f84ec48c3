//! Point-in-time read views
//!
//! A [`Snapshot`] pins a commit sequence. Reads through it see every commit
//! at or below that sequence and nothing after, regardless of concurrent
//! writes, flushes or compactions. Live snapshots are tracked in a
//! [`SnapshotRegistry`] so compaction keeps the versions they still need.

use crate::engine::LsmEngine;
use crate::traits::{KeyRange, KvRead, ScanFn};
use mosaic_core::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Multiset of pinned sequences
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    pinned: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the current value of `visible`.
    ///
    /// The load happens under the registry lock so a concurrent
    /// [`horizon`](Self::horizon) never computes a bound above a snapshot
    /// that is about to be registered.
    pub fn acquire(&self, visible: &AtomicU64) -> u64 {
        let mut pinned = self.pinned.lock();
        let seq = visible.load(Ordering::Acquire);
        *pinned.entry(seq).or_insert(0) += 1;
        seq
    }

    /// Unpin one holder of `seq`
    pub fn release(&self, seq: u64) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&seq);
            }
        }
    }

    /// Oldest sequence any reader may still ask for
    pub fn horizon(&self, visible: &AtomicU64) -> u64 {
        let pinned = self.pinned.lock();
        let current = visible.load(Ordering::Acquire);
        pinned
            .keys()
            .next()
            .copied()
            .map_or(current, |oldest| oldest.min(current))
    }

    /// Number of live snapshots
    pub fn active(&self) -> usize {
        self.pinned.lock().values().sum()
    }
}

/// Read-only view pinned at one commit sequence; unpins on drop
pub struct Snapshot {
    engine: LsmEngine,
    seq: u64,
}

impl Snapshot {
    pub(crate) fn new(engine: LsmEngine, seq: u64) -> Self {
        Snapshot { engine, seq }
    }

    /// Pinned sequence
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Engine this snapshot reads from
    pub fn engine(&self) -> &LsmEngine {
        &self.engine
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("seq", &self.seq).finish()
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.engine.release_snapshot(self.seq);
    }
}

impl KvRead for Snapshot {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.engine.get_at(key, self.seq)
    }

    fn scan(&self, range: &KeyRange, f: &mut ScanFn<'_>) -> Result<()> {
        self.engine.scan_at(range, self.seq, f)
    }
}
