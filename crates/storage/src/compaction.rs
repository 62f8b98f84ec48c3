//! Flush and compaction
//!
//! Frozen memtables are written out oldest first. After each flush the
//! manifest is rewritten and the covered WAL segments deleted. Once
//! `compaction_trigger` tables exist they are merged into one.
//!
//! # Garbage collection
//!
//! Compaction merges every live table, so its output is the bottom of the
//! tree. For each key it keeps all versions newer than the snapshot horizon
//! plus the newest version at or below it. A tombstone in that last slot
//! hides nothing below and is dropped.

use crate::engine::{delete_wal_segments, flush_memtable, table_path, EngineInner};
use crate::merge::{Entry, MergeIter, Source};
use crate::sstable::{write_table, SsTable};
use mosaic_core::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

const IDLE_WAIT: Duration = Duration::from_millis(200);

/// Wakes the background worker
#[derive(Debug, Default)]
pub(crate) struct FlushSignal {
    pending: Mutex<bool>,
    cond: Condvar,
    stop: AtomicBool,
}

impl FlushSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn notify(&self) {
        *self.pending.lock() = true;
        self.cond.notify_one();
    }

    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        self.notify();
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Block until notified or the idle timeout passes
    fn wait(&self) {
        let mut pending = self.pending.lock();
        if !*pending && !self.is_stopped() {
            self.cond.wait_for(&mut pending, IDLE_WAIT);
        }
        *pending = false;
    }
}

/// Start the background flush thread.
///
/// The thread only holds a weak reference between rounds, so dropping the
/// last engine handle lets it exit.
pub(crate) fn spawn_worker(engine: Weak<EngineInner>, signal: Arc<FlushSignal>) -> Result<()> {
    std::thread::Builder::new()
        .name("mosaic-flush".into())
        .spawn(move || loop {
            signal.wait();
            if signal.is_stopped() {
                break;
            }
            let Some(inner) = engine.upgrade() else {
                break;
            };
            if let Err(e) = run_maintenance(&inner) {
                inner.note_maintenance_failure("background flush", &e);
            }
        })
        .map(|_| ())
        .map_err(Error::StorageIo)
}

/// Flush every frozen memtable, then compact if enough tables piled up
pub(crate) fn run_maintenance(inner: &EngineInner) -> Result<()> {
    let _m = inner.maintenance.lock();
    while flush_oldest(inner)? {}
    if inner.state.read().tables.len() >= inner.config.compaction_trigger.max(2) {
        compact_tables(inner)?;
    }
    Ok(())
}

/// Flush the oldest frozen memtable; false when none is waiting.
/// Caller holds the maintenance lock.
fn flush_oldest(inner: &EngineInner) -> Result<bool> {
    let Some((mem, covered)) = inner.state.read().frozen.first().cloned() else {
        return Ok(false);
    };
    let id = inner.manifest.lock().next_table_id;
    let table = flush_memtable(inner, &mem, id)?;

    {
        let mut st = inner.state.write();
        st.frozen.remove(0);
        st.tables.insert(0, table);
    }
    {
        let mut manifest = inner.manifest.lock();
        manifest.tables.insert(0, id);
        manifest.next_table_id = id + 1;
        manifest.flushed_seq = manifest.flushed_seq.max(mem.max_seq());
        manifest.wal_segment = covered + 1;
        manifest.store(&inner.dir)?;
    }
    delete_wal_segments(inner, covered)?;
    inner.counters.flushes.fetch_add(1, Ordering::Relaxed);

    let horizon = inner.snapshots.horizon(&inner.visible_seq);
    inner.key_versions.retain(|_, seq| *seq > horizon);
    Ok(true)
}

/// Merge every live table into one. Caller holds the maintenance lock.
pub(crate) fn compact_tables(inner: &EngineInner) -> Result<()> {
    let inputs = inner.state.read().tables.clone();
    if inputs.len() < 2 {
        return Ok(());
    }
    let horizon = inner.snapshots.horizon(&inner.visible_seq);
    let id = inner.manifest.lock().next_table_id;
    let path = table_path(inner, id);

    let sources: Vec<Source<'_>> = inputs
        .iter()
        .map(|t| Box::new(t.iter_all()) as Source<'_>)
        .collect();
    let input_entries: u64 = inputs.iter().map(|t| t.entry_count()).sum();
    let meta = write_table(
        &path,
        GcIter::new(MergeIter::new(sources), horizon),
        inner.config.sparse_index_interval,
    )?;
    let table = Arc::new(SsTable::open(&path, id)?);

    let input_ids: Vec<u64> = inputs.iter().map(|t| t.id()).collect();
    {
        let mut st = inner.state.write();
        st.tables.retain(|t| !input_ids.contains(&t.id()));
        st.tables.push(table);
    }
    {
        let mut manifest = inner.manifest.lock();
        manifest.tables.retain(|t| !input_ids.contains(t));
        manifest.tables.push(id);
        manifest.next_table_id = id + 1;
        manifest.store(&inner.dir)?;
    }
    for old in &input_ids {
        if let Err(e) = fs::remove_file(table_path(inner, *old)) {
            debug!(target: "mosaic::storage", table = old, error = %e, "Could not remove compacted table");
        }
    }
    inner.counters.compactions.fetch_add(1, Ordering::Relaxed);
    info!(
        target: "mosaic::storage",
        inputs = input_ids.len(),
        input_entries,
        output_entries = meta.entry_count,
        horizon,
        "Compacted tables"
    );
    Ok(())
}

/// Drops versions no reader can see anymore
pub(crate) struct GcIter<I> {
    inner: I,
    horizon: u64,
    current: Option<String>,
    kept_base: bool,
}

impl<I: Iterator<Item = Entry>> GcIter<I> {
    pub(crate) fn new(inner: I, horizon: u64) -> Self {
        GcIter {
            inner,
            horizon,
            current: None,
            kept_base: false,
        }
    }
}

impl<I: Iterator<Item = Entry>> Iterator for GcIter<I> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        for entry in self.inner.by_ref() {
            if self.current.as_deref() != Some(entry.key.as_str()) {
                self.current = Some(entry.key.clone());
                self.kept_base = false;
            }
            if entry.seq > self.horizon {
                return Some(entry);
            }
            if self.kept_base {
                continue;
            }
            self.kept_base = true;
            if entry.value.is_some() {
                return Some(entry);
            }
        }
        None
    }
}
