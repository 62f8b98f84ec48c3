//! Expired entity cleanup
//!
//! Expiry keys sort by time, so every expired entry of a TTL index lies in
//! one prefix range ending at the current time. The range is scanned from a
//! snapshot and every candidate is checked again inside the erasing
//! transaction, so an entity rewritten in between keeps its new expiry.

use crate::descriptor::IndexType;
use crate::keys::{self, TTL};
use crate::manager::{parse_expiry, SecondaryIndexManager};
use crate::query::scan_entries;
use mosaic_core::Result;
use mosaic_storage::{KeyRange, KvRead};
use std::ops::Bound;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

impl SecondaryIndexManager {
    /// Erase every entity whose TTL on `column` has passed; returns the
    /// number of entities removed
    pub fn cleanup_expired_entities(&self, table: &str, column: &str) -> Result<usize> {
        self.cleanup_expired_entities_at(table, column, self.now())
    }

    /// Like [`cleanup_expired_entities`](Self::cleanup_expired_entities) with
    /// an explicit time in epoch seconds
    pub fn cleanup_expired_entities_at(&self, table: &str, column: &str, now: i64) -> Result<usize> {
        let expired = self.expired_keys_at(table, column, now)?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        self.in_transaction(|txn| {
            for pk in &expired {
                if !self.is_expired_in(&*txn, table, column, pk, now)? {
                    debug!(target: "mosaic::index", table, pk = %pk, "Entity rewritten since expiry scan, kept");
                    continue;
                }
                self.stage_erase(txn, table, pk)?;
                removed += 1;
            }
            Ok(())
        })?;
        info!(target: "mosaic::index", table, column, removed, "Removed expired entities");
        Ok(removed)
    }

    /// Primary keys whose TTL on `column` is at or before `now`, as of the
    /// latest snapshot, in expiry order
    pub fn expired_keys_at(&self, table: &str, column: &str, now: i64) -> Result<Vec<String>> {
        self.require(table, column, IndexType::Ttl)?;
        let prefix = keys::column_prefix(TTL, table, column);
        // ';' sorts after every pk stored under the expiry `now`
        let end = format!("{}{};", prefix, keys::encode_expiry(now));
        let range = KeyRange::new(Bound::Included(prefix), Bound::Excluded(end));

        let mut expired = Vec::new();
        scan_entries(&self.engine().snapshot(), &range, &AtomicBool::new(false), &mut |pk, _| {
            expired.push(pk);
            Ok(true)
        })?;
        Ok(expired)
    }

    /// Whether `pk` has expired on `column` as `view` sees it.
    ///
    /// Reading through a transaction puts the expiry in its read set, so a
    /// rewrite committed after the check fails the commit with `Conflict`.
    pub fn is_expired_in<R: KvRead + ?Sized>(
        &self,
        view: &R,
        table: &str,
        column: &str,
        pk: &str,
        now: i64,
    ) -> Result<bool> {
        match view.get(&keys::ttl_ptr_key(table, column, pk))? {
            Some(raw) => Ok(parse_expiry(&raw)? <= now),
            None => Ok(false),
        }
    }
}
