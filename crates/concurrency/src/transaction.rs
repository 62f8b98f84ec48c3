//! Transaction context for OCC
//!
//! A [`TransactionContext`] reads from a snapshot pinned at `begin`, buffers
//! writes in an [`Overlay`], and records every key it reads. Nothing is
//! visible to other readers until [`commit`](TransactionContext::commit)
//! validates the read and write sets and applies the overlay as one engine
//! batch.
//!
//! ## State Machine
//!
//! ```text
//! Active ──commit ok──▶ Committed
//!   │  └──conflict/error──▶ Aborted
//!   └──rollback──────────▶ Aborted
//! ```
//!
//! Both end states are terminal.

use crate::validation::validate_transaction;
use mosaic_core::error::{Error, Result};
use mosaic_storage::{KeyRange, KvRead, KvWrite, LsmEngine, Overlay, ScanFn, Snapshot};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Lifecycle state of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Reads and writes allowed
    Active,
    /// Changes applied at the given sequence
    Committed {
        /// Commit sequence
        seq: u64,
    },
    /// Discarded
    Aborted {
        /// Why the transaction ended
        reason: String,
    },
}

/// Read/write set tracking transaction
pub struct TransactionContext {
    snapshot: Snapshot,
    read_set: RefCell<BTreeSet<String>>,
    writes: Overlay,
    status: TransactionStatus,
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("start_seq", &self.start_seq())
            .field("reads", &self.read_set.borrow().len())
            .field("writes", &self.writes.len())
            .field("status", &self.status)
            .finish()
    }
}

impl TransactionContext {
    /// Start a transaction against the engine's current state
    pub fn begin(engine: &LsmEngine) -> Self {
        TransactionContext {
            snapshot: engine.snapshot(),
            read_set: RefCell::new(BTreeSet::new()),
            writes: Overlay::new(),
            status: TransactionStatus::Active,
        }
    }

    /// Sequence of the snapshot this transaction reads from
    pub fn start_seq(&self) -> u64 {
        self.snapshot.seq()
    }

    /// Current state
    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    /// Whether reads and writes are still allowed
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Error unless the transaction is active
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "transaction started at {} is not active: {:?}",
                self.start_seq(),
                self.status
            )))
        }
    }

    /// Keys read so far
    pub fn read_count(&self) -> usize {
        self.read_set.borrow().len()
    }

    /// Keys staged for writing
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Engine this transaction belongs to
    pub fn engine(&self) -> &LsmEngine {
        self.snapshot.engine()
    }

    fn track_read(&self, key: &str) {
        let mut reads = self.read_set.borrow_mut();
        if !reads.contains(key) {
            reads.insert(key.to_string());
        }
    }

    /// Validate and apply.
    ///
    /// On a conflict the transaction moves to `Aborted` and the conflict is
    /// returned; the caller may retry with a fresh transaction.
    pub fn commit(&mut self) -> Result<u64> {
        let seq = self.commit_deferred()?;
        self.engine().run_pending_maintenance();
        Ok(seq)
    }

    /// Like [`commit`](Self::commit) but leaves any flush the commit
    /// triggered to `LsmEngine::run_pending_maintenance`. Used when the
    /// caller commits under a lock of its own.
    pub fn commit_deferred(&mut self) -> Result<u64> {
        self.ensure_active()?;
        let start_seq = self.start_seq();
        let reads = self.read_set.take();
        let writes = std::mem::take(&mut self.writes);
        let write_keys: Vec<String> = writes.keys().map(str::to_string).collect();

        let outcome = self.engine().commit_batch_deferred(writes.into_ops(), |engine| {
            validate_transaction(engine, start_seq, &reads, write_keys.iter().map(String::as_str))
                .into_result()
        });

        match outcome {
            Ok(seq) => {
                self.status = TransactionStatus::Committed { seq };
                Ok(seq)
            }
            Err(e) => {
                if let Error::Conflict { key, .. } = &e {
                    debug!(target: "mosaic::txn", start_seq, key = %key, "Transaction conflict");
                }
                self.status = TransactionStatus::Aborted {
                    reason: e.to_string(),
                };
                Err(e)
            }
        }
    }

    /// Discard all staged writes
    pub fn rollback(&mut self) {
        if self.is_active() {
            self.writes.clear();
            self.status = TransactionStatus::Aborted {
                reason: "rolled back".into(),
            };
        }
    }

    /// Mark the transaction failed without committing
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.is_active() {
            self.writes.clear();
            self.status = TransactionStatus::Aborted {
                reason: reason.into(),
            };
        }
    }
}

impl KvRead for TransactionContext {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_active()?;
        if self.writes.get(key).is_none() {
            self.track_read(key);
        }
        self.writes.read_through(&self.snapshot, key)
    }

    fn scan(&self, range: &KeyRange, f: &mut ScanFn<'_>) -> Result<()> {
        self.ensure_active()?;
        let mut visited = Vec::new();
        let result = self.writes.scan_through(&self.snapshot, range, &mut |k, v| {
            visited.push(k.to_string());
            f(k, v)
        });
        let mut reads = self.read_set.borrow_mut();
        reads.extend(visited);
        result
    }
}

impl KvWrite for TransactionContext {
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_active()?;
        self.writes.put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.ensure_active()?;
        self.writes.delete(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_storage::StorageConfig;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> LsmEngine {
        LsmEngine::open(dir.path(), StorageConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_read_your_writes_and_isolation() {
        let dir = TempDir::new().unwrap();
        let e = engine(&dir);
        let mut txn = TransactionContext::begin(&e);
        txn.put("k", b"v".to_vec()).unwrap();
        assert_eq!(txn.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(e.get("k").unwrap(), None);
        assert_eq!(txn.read_count(), 0);
        let seq = txn.commit().unwrap();
        assert_eq!(txn.status(), &TransactionStatus::Committed { seq });
        assert_eq!(e.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_write_write_conflict() {
        let dir = TempDir::new().unwrap();
        let e = engine(&dir);
        let mut t1 = TransactionContext::begin(&e);
        let mut t2 = TransactionContext::begin(&e);
        t1.put("pk", b"one".to_vec()).unwrap();
        t2.put("pk", b"two".to_vec()).unwrap();
        t1.commit().unwrap();
        let err = t2.commit().unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(t2.status(), TransactionStatus::Aborted { .. }));
        assert_eq!(e.get("pk").unwrap(), Some(b"one".to_vec()));
    }

    #[test]
    fn test_read_set_conflict() {
        let dir = TempDir::new().unwrap();
        let e = engine(&dir);
        let mut reader = TransactionContext::begin(&e);
        assert_eq!(reader.get("watched").unwrap(), None);

        let mut writer = TransactionContext::begin(&e);
        writer.put("watched", b"x".to_vec()).unwrap();
        writer.commit().unwrap();

        reader.put("other", b"y".to_vec()).unwrap();
        assert!(reader.commit().unwrap_err().is_conflict());
    }

    #[test]
    fn test_scan_tracks_reads_and_merges_writes() {
        let dir = TempDir::new().unwrap();
        let e = engine(&dir);
        let mut seed = TransactionContext::begin(&e);
        seed.put("p:1", vec![1]).unwrap();
        seed.commit().unwrap();

        let mut txn = TransactionContext::begin(&e);
        txn.put("p:2", vec![2]).unwrap();
        let keys = txn.keys_with_prefix("p:").unwrap();
        assert_eq!(keys, vec!["p:1".to_string(), "p:2".to_string()]);
        assert_eq!(txn.read_count(), 2);
    }

    #[test]
    fn test_finished_transaction_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let e = engine(&dir);
        let mut txn = TransactionContext::begin(&e);
        txn.put("a", vec![1]).unwrap();
        txn.rollback();
        assert!(txn.put("b", vec![2]).is_err());
        assert!(txn.commit().is_err());
        assert_eq!(e.get("a").unwrap(), None);
    }
}
