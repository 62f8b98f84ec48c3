//! Read/write seams shared by the engine, snapshots, batches and transactions
//!
//! Index managers are written against these traits so the same staging code
//! runs against a [`WriteBatch`](crate::WriteBatch) or an OCC transaction.

use mosaic_core::key::prefix_successor;
use mosaic_core::Result;
use std::ops::Bound;

/// Callback receiving `(key, value)`; returning `false` stops the scan
pub type ScanFn<'a> = dyn FnMut(&str, &[u8]) -> bool + 'a;

/// Key interval plus scan options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound
    pub start: Bound<String>,
    /// Upper bound
    pub end: Bound<String>,
    /// Stop after this many visible entries
    pub limit: Option<usize>,
    /// Descending key order
    pub reverse: bool,
}

impl KeyRange {
    /// Range from explicit bounds
    pub fn new(start: Bound<String>, end: Bound<String>) -> Self {
        KeyRange {
            start,
            end,
            limit: None,
            reverse: false,
        }
    }

    /// Every key starting with `prefix`
    pub fn prefix(prefix: &str) -> Self {
        let end = match prefix_successor(prefix) {
            Some(succ) => Bound::Excluded(succ),
            None => Bound::Unbounded,
        };
        Self::new(Bound::Included(prefix.to_string()), end)
    }

    /// `[start, end)`
    pub fn half_open(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Excluded(end.into()))
    }

    /// Every key
    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Limit the number of visited entries
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Iterate in descending order
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Whether `key` is below the upper bound
    pub fn before_end(&self, key: &str) -> bool {
        match &self.end {
            Bound::Included(e) => key <= e.as_str(),
            Bound::Excluded(e) => key < e.as_str(),
            Bound::Unbounded => true,
        }
    }

    /// Whether `key` is above the lower bound
    pub fn after_start(&self, key: &str) -> bool {
        match &self.start {
            Bound::Included(s) => key >= s.as_str(),
            Bound::Excluded(s) => key > s.as_str(),
            Bound::Unbounded => true,
        }
    }

    /// Whether `key` lies inside the range
    pub fn contains(&self, key: &str) -> bool {
        self.after_start(key) && self.before_end(key)
    }
}

/// Point reads and ordered scans
pub trait KvRead {
    /// Latest visible value of `key`
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Visit visible entries of `range` in order until the callback says stop
    fn scan(&self, range: &KeyRange, f: &mut ScanFn<'_>) -> Result<()>;

    /// Visit every visible key starting with `prefix`
    fn scan_prefix(&self, prefix: &str, f: &mut ScanFn<'_>) -> Result<()> {
        self.scan(&KeyRange::prefix(prefix), f)
    }

    /// Collect keys starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.scan_prefix(prefix, &mut |k, _| {
            keys.push(k.to_string());
            true
        })?;
        Ok(keys)
    }
}

/// Buffered mutations
pub trait KvWrite {
    /// Stage a put
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Stage a delete
    fn delete(&mut self, key: &str) -> Result<()>;
}

/// Something that can both read its own view and stage writes
pub trait KvStage: KvRead + KvWrite {}

impl<T: KvRead + KvWrite + ?Sized> KvStage for T {}
