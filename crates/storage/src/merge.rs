//! K-way merge over versioned sources
//!
//! Every source yields entries ordered by `(key asc, seq desc)`. The merge
//! produces the same order across all sources; [`VisibleIter`] then keeps
//! only the newest version at or below a snapshot sequence per key and
//! hides tombstones.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// One versioned cell; `value == None` is a tombstone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// User key
    pub key: String,
    /// Commit sequence that wrote it
    pub seq: u64,
    /// Value or tombstone
    pub value: Option<Vec<u8>>,
}

/// Boxed entry source
pub type Source<'a> = Box<dyn Iterator<Item = Entry> + 'a>;

struct HeapItem {
    entry: Entry,
    source: usize,
}

impl HeapItem {
    fn sort_key(&self) -> (&str, Reverse<u64>, usize) {
        (&self.entry.key, Reverse(self.entry.seq), self.source)
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Merges sources into one `(key asc, seq desc)` stream
pub struct MergeIter<'a> {
    sources: Vec<Source<'a>>,
    heap: BinaryHeap<Reverse<HeapItem>>,
}

impl<'a> MergeIter<'a> {
    /// Start merging
    pub fn new(mut sources: Vec<Source<'a>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (idx, src) in sources.iter_mut().enumerate() {
            if let Some(entry) = src.next() {
                heap.push(Reverse(HeapItem { entry, source: idx }));
            }
        }
        MergeIter { sources, heap }
    }
}

impl<'a> Iterator for MergeIter<'a> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        let Reverse(item) = self.heap.pop()?;
        if let Some(next) = self.sources[item.source].next() {
            self.heap.push(Reverse(HeapItem {
                entry: next,
                source: item.source,
            }));
        }
        Some(item.entry)
    }
}

/// Newest visible live version per key at `snapshot`
pub struct VisibleIter<I> {
    inner: I,
    snapshot: u64,
    last_key: Option<String>,
}

impl<I: Iterator<Item = Entry>> VisibleIter<I> {
    /// Filter `inner` down to what a reader at `snapshot` sees
    pub fn new(inner: I, snapshot: u64) -> Self {
        VisibleIter {
            inner,
            snapshot,
            last_key: None,
        }
    }
}

impl<I: Iterator<Item = Entry>> Iterator for VisibleIter<I> {
    type Item = (String, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.inner.by_ref() {
            if entry.seq > self.snapshot {
                continue;
            }
            if self.last_key.as_deref() == Some(entry.key.as_str()) {
                continue;
            }
            self.last_key = Some(entry.key.clone());
            if let Some(value) = entry.value {
                return Some((entry.key, value));
            }
        }
        None
    }
}
