//! Staged writes with read-your-writes
//!
//! [`Overlay`] holds pending puts and deletes keyed by storage key and
//! knows how to lay them over a base view. [`WriteBatch`] pairs an overlay
//! with a snapshot and commits without conflict checks; the OCC
//! transaction in `mosaic-concurrency` reuses the same overlay.

use crate::engine::LsmEngine;
use crate::snapshot::Snapshot;
use crate::traits::{KeyRange, KvRead, KvWrite, ScanFn};
use mosaic_core::Result;
use mosaic_durability::WalOp;
use std::collections::BTreeMap;

/// Pending mutations; `None` marks a delete
#[derive(Debug, Default, Clone)]
pub struct Overlay {
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl Overlay {
    /// Empty overlay
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a put
    pub fn put(&mut self, key: &str, value: Vec<u8>) {
        self.writes.insert(key.to_string(), Some(value));
    }

    /// Stage a delete
    pub fn delete(&mut self, key: &str) {
        self.writes.insert(key.to_string(), None);
    }

    /// Staged state of `key`: `Some(None)` is a staged delete
    pub fn get(&self, key: &str) -> Option<Option<&[u8]>> {
        self.writes.get(key).map(|v| v.as_deref())
    }

    /// Number of staged keys
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Nothing staged
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Staged keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.writes.keys().map(String::as_str)
    }

    /// Drop everything staged
    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Convert to WAL ops in key order
    pub fn into_ops(self) -> Vec<WalOp> {
        self.writes
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => WalOp::Put { key, value },
                None => WalOp::Delete { key },
            })
            .collect()
    }

    /// Point read through the overlay
    pub fn read_through(&self, base: &dyn KvRead, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get(key) {
            Some(staged) => Ok(staged.map(<[u8]>::to_vec)),
            None => base.get(key),
        }
    }

    /// Scan `base` with staged writes applied on top.
    ///
    /// The base range is materialized first so that limits and direction
    /// apply to the merged result.
    pub fn scan_through(
        &self,
        base: &dyn KvRead,
        range: &KeyRange,
        f: &mut ScanFn<'_>,
    ) -> Result<()> {
        if self.writes.is_empty() {
            return base.scan(range, f);
        }
        let unbounded = KeyRange::new(range.start.clone(), range.end.clone());
        let mut merged: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        base.scan(&unbounded, &mut |k, v| {
            merged.insert(k.to_string(), v.to_vec());
            true
        })?;
        for (key, value) in self.writes.iter().filter(|(k, _)| range.contains(k)) {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        let limit = range.limit.unwrap_or(usize::MAX);
        if range.reverse {
            for (k, v) in merged.iter().rev().take(limit) {
                if !f(k, v) {
                    break;
                }
            }
        } else {
            for (k, v) in merged.iter().take(limit) {
                if !f(k, v) {
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Unvalidated atomic batch
///
/// Reads see the snapshot taken at creation plus the batch's own writes.
/// [`commit`](Self::commit) applies everything as one WAL record; there is
/// no conflict detection, last writer wins.
pub struct WriteBatch {
    snapshot: Snapshot,
    overlay: Overlay,
}

impl WriteBatch {
    pub(crate) fn new(snapshot: Snapshot) -> Self {
        WriteBatch {
            snapshot,
            overlay: Overlay::new(),
        }
    }

    /// Number of staged keys
    pub fn len(&self) -> usize {
        self.overlay.len()
    }

    /// Nothing staged
    pub fn is_empty(&self) -> bool {
        self.overlay.is_empty()
    }

    /// Apply the batch; returns the commit sequence
    pub fn commit(self) -> Result<u64> {
        let WriteBatch { snapshot, overlay } = self;
        let engine: LsmEngine = snapshot.engine().clone();
        drop(snapshot);
        engine.commit_batch(overlay.into_ops(), |_| Ok(()))
    }
}

impl KvRead for WriteBatch {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.overlay.read_through(&self.snapshot, key)
    }

    fn scan(&self, range: &KeyRange, f: &mut ScanFn<'_>) -> Result<()> {
        self.overlay.scan_through(&self.snapshot, range, f)
    }
}

impl KvWrite for WriteBatch {
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.overlay.put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.overlay.delete(key);
        Ok(())
    }
}
