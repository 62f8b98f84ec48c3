//! In-memory write buffer
//!
//! A `BTreeMap` keyed by `(key, Reverse(seq))`, so all versions of a key are
//! adjacent and the newest comes first. Old versions stay until the table
//! is flushed; compaction decides which survive on disk.

use crate::merge::Entry;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::traits::KeyRange;

/// Per-entry bookkeeping overhead counted towards the size limit
const ENTRY_OVERHEAD: usize = 32;

type VersionedKey = (String, Reverse<u64>);

/// Sorted multi-version buffer
#[derive(Debug, Default)]
pub struct Memtable {
    map: RwLock<BTreeMap<VersionedKey, Option<Vec<u8>>>>,
    approx_bytes: AtomicUsize,
    max_seq: AtomicU64,
}

impl Memtable {
    /// Empty memtable
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a version of `key`
    pub fn insert(&self, key: &str, seq: u64, value: Option<Vec<u8>>) {
        let size = key.len() + value.as_ref().map_or(0, |v| v.len()) + ENTRY_OVERHEAD;
        self.map.write().insert((key.to_string(), Reverse(seq)), value);
        self.approx_bytes.fetch_add(size, Ordering::Relaxed);
        self.max_seq.fetch_max(seq, Ordering::Relaxed);
    }

    /// Newest version of `key` at or below `snapshot`.
    ///
    /// `Some(None)` is a tombstone; `None` means this memtable has no
    /// visible version.
    pub fn get(&self, key: &str, snapshot: u64) -> Option<Option<Vec<u8>>> {
        let map = self.map.read();
        let from = (key.to_string(), Reverse(snapshot));
        map.range(from..)
            .next()
            .filter(|((k, _), _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// All versions inside `range`, in `(key asc, seq desc)` order
    pub fn collect_range(&self, range: &KeyRange) -> Vec<Entry> {
        let start: Bound<VersionedKey> = match &range.start {
            Bound::Included(s) => Bound::Included((s.clone(), Reverse(u64::MAX))),
            Bound::Excluded(s) => Bound::Excluded((s.clone(), Reverse(0))),
            Bound::Unbounded => Bound::Unbounded,
        };
        let end: Bound<VersionedKey> = match &range.end {
            Bound::Included(e) => Bound::Included((e.clone(), Reverse(0))),
            Bound::Excluded(e) => Bound::Excluded((e.clone(), Reverse(u64::MAX))),
            Bound::Unbounded => Bound::Unbounded,
        };
        // BTreeMap::range panics on inverted bounds
        match (&start, &end) {
            (Bound::Excluded(s), Bound::Excluded(e)) if s >= e => return Vec::new(),
            (Bound::Included(s) | Bound::Excluded(s), Bound::Included(e) | Bound::Excluded(e))
                if s > e =>
            {
                return Vec::new()
            }
            _ => {}
        }
        let map = self.map.read();
        map.range((start, end))
            .map(|((k, Reverse(seq)), v)| Entry {
                key: k.clone(),
                seq: *seq,
                value: v.clone(),
            })
            .collect()
    }

    /// Every version, sorted, for flushing
    pub fn entries(&self) -> Vec<Entry> {
        self.collect_range(&KeyRange::all())
    }

    /// Approximate memory footprint
    pub fn approx_bytes(&self) -> usize {
        self.approx_bytes.load(Ordering::Relaxed)
    }

    /// Highest sequence inserted
    pub fn max_seq(&self) -> u64 {
        self.max_seq.load(Ordering::Relaxed)
    }

    /// Number of versions held
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// True when nothing has been inserted
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
