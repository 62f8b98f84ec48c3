//! Transaction accounting
//!
//! The [`TransactionManager`] hands out transaction ids and keeps the
//! counters behind [`TransactionStats`]. It does not coordinate commits
//! itself; each [`Transaction`](crate::Transaction) commits its own engine
//! transaction and reports the outcome here.
//!
//! Counters use relaxed atomics. They are observational only and never
//! order other memory operations.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of transaction counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionStats {
    /// Transactions started
    pub begun: u64,
    /// Transactions committed
    pub committed: u64,
    /// Transactions aborted or rolled back, conflicts included
    pub aborted: u64,
    /// Commits that failed with `Conflict`
    pub conflicts: u64,
    /// Transactions neither committed nor aborted
    pub active: u64,
    /// Mean wall time of successful commits, in microseconds
    pub avg_commit_micros: u64,
    /// Slowest successful commit, in microseconds
    pub max_commit_micros: u64,
    /// Wall clock time of the last successful commit
    pub last_commit_at: Option<DateTime<Utc>>,
}

/// Id allocation and counters for all transactions of one database
#[derive(Debug, Default)]
pub struct TransactionManager {
    next_id: AtomicU64,
    active: AtomicU64,
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    conflicts: AtomicU64,
    commit_micros_total: AtomicU64,
    commit_micros_max: AtomicU64,
    last_commit_at: Mutex<Option<DateTime<Utc>>>,
}

impl TransactionManager {
    /// Fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and count a started transaction
    pub fn record_begin(&self) -> u64 {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.begun.fetch_add(1, Ordering::Relaxed);
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a successful commit that took `elapsed`
    pub fn record_commit(&self, elapsed: Duration) {
        self.leave_active();
        self.committed.fetch_add(1, Ordering::Relaxed);
        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.commit_micros_total.fetch_add(micros, Ordering::Relaxed);
        self.commit_micros_max.fetch_max(micros, Ordering::Relaxed);
        *self.last_commit_at.lock() = Some(Utc::now());
    }

    /// Count an abort; `conflict` marks a failed validation
    pub fn record_abort(&self, conflict: bool) {
        self.leave_active();
        self.aborted.fetch_add(1, Ordering::Relaxed);
        if conflict {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn leave_active(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| Some(x.saturating_sub(1)));
    }

    /// Transactions currently open
    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Current counters
    pub fn stats(&self) -> TransactionStats {
        let committed = self.committed.load(Ordering::Relaxed);
        let total = self.commit_micros_total.load(Ordering::Relaxed);
        TransactionStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed,
            aborted: self.aborted.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            avg_commit_micros: if committed == 0 { 0 } else { total / committed },
            max_commit_micros: self.commit_micros_max.load(Ordering::Relaxed),
            last_commit_at: *self.last_commit_at.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = TransactionManager::new();
        assert_eq!(m.record_begin(), 1);
        assert_eq!(m.record_begin(), 2);
        m.record_begin();
        m.record_commit(Duration::from_micros(10));
        m.record_commit(Duration::from_micros(30));
        m.record_abort(true);

        let s = m.stats();
        assert_eq!(s.begun, 3);
        assert_eq!(s.committed, 2);
        assert_eq!(s.aborted, 1);
        assert_eq!(s.conflicts, 1);
        assert_eq!(s.active, 0);
        assert_eq!(s.avg_commit_micros, 20);
        assert_eq!(s.max_commit_micros, 30);
        assert!(s.last_commit_at.is_some());
    }

    #[test]
    fn test_active_never_underflows() {
        let m = TransactionManager::new();
        m.record_abort(false);
        assert_eq!(m.active_count(), 0);
        assert_eq!(m.stats().aborted, 1);
    }
}
