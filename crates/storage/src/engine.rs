//! LSM storage engine
//!
//! ## Layout
//!
//! ```text
//! <dir>/LOCK            exclusive process lock
//! <dir>/MANIFEST        live tables, flushed sequence, oldest live WAL segment
//! <dir>/wal/wal-N.log   write-ahead log segments
//! <dir>/sst/N.sst       immutable sorted tables
//! ```
//!
//! ## Write path
//!
//! Commits are serialized by `commit_lock`. Each commit gets the next
//! sequence, is appended to the WAL as one record, inserted into the active
//! memtable and then published by bumping `visible_seq`. Readers only ever
//! look at sequences at or below `visible_seq`, so a commit becomes visible
//! all at once.
//!
//! When the active memtable outgrows `memtable_size_bytes` it is frozen,
//! the WAL rotates to a new segment, and the frozen table is flushed to an
//! SSTable (on the background thread or inline). Once an SSTable is in the
//! manifest the WAL segments it covers are deleted.
//!
//! ## Read path
//!
//! Active memtable, then frozen memtables newest first, then SSTables newest
//! first. The first version at or below the read sequence wins.

use crate::batch::WriteBatch;
use crate::compaction::{self, FlushSignal};
use crate::config::StorageConfig;
use crate::memtable::Memtable;
use crate::merge::{MergeIter, Source, VisibleIter};
use crate::snapshot::{Snapshot, SnapshotRegistry};
use crate::sstable::{parse_table_file_name, table_file_name, write_table, SsTable};
use crate::traits::{KeyRange, KvRead, ScanFn};
use dashmap::DashMap;
use fs2::FileExt;
use mosaic_core::error::{Error, Result};
use mosaic_durability::wal::{list_segments, segment_path};
use mosaic_durability::{Manifest, WalOp, WalReader, WalRecord, WalWriter};
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const WAL_DIR: &str = "wal";
const SST_DIR: &str = "sst";
const LOCK_FILE: &str = "LOCK";

/// Memtables and tables currently serving reads
pub(crate) struct LevelState {
    pub(crate) active: Arc<Memtable>,
    /// Frozen memtables oldest first, each with the last WAL segment it covers
    pub(crate) frozen: Vec<(Arc<Memtable>, u64)>,
    /// SSTables newest first
    pub(crate) tables: Vec<Arc<SsTable>>,
}

/// Monotonic engine counters
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub(crate) commits: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) compactions: AtomicU64,
    pub(crate) maintenance_failures: AtomicU64,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Highest published commit sequence
    pub visible_seq: u64,
    /// Commits applied since open
    pub commits: u64,
    /// Memtables flushed since open
    pub flushes: u64,
    /// Compactions run since open
    pub compactions: u64,
    /// Flushes, compactions and memtable freezes that failed since open
    pub maintenance_failures: u64,
    /// Bytes held by the active memtable
    pub memtable_bytes: usize,
    /// Frozen memtables waiting for flush
    pub frozen_memtables: usize,
    /// Live SSTables
    pub sstables: usize,
    /// Entries across live SSTables
    pub sstable_entries: u64,
    /// Live snapshots
    pub active_snapshots: usize,
    /// Keys tracked for conflict detection
    pub tracked_keys: usize,
}

pub(crate) struct EngineInner {
    pub(crate) dir: PathBuf,
    pub(crate) config: StorageConfig,
    pub(crate) state: RwLock<LevelState>,
    wal: Mutex<WalWriter>,
    pub(crate) manifest: Mutex<Manifest>,
    commit_lock: Mutex<()>,
    /// Serializes flush, compaction and checkpoint
    pub(crate) maintenance: Mutex<()>,
    /// A commit froze a memtable that nobody has flushed yet
    maintenance_pending: AtomicBool,
    pub(crate) visible_seq: AtomicU64,
    /// Last commit sequence per key, for conflict detection
    pub(crate) key_versions: DashMap<String, u64>,
    pub(crate) snapshots: SnapshotRegistry,
    pub(crate) signal: Arc<FlushSignal>,
    pub(crate) counters: EngineCounters,
    _lock: File,
}

impl EngineInner {
    /// Log and count a failed flush, compaction or freeze
    pub(crate) fn note_maintenance_failure(&self, stage: &str, e: &Error) {
        self.counters.maintenance_failures.fetch_add(1, Ordering::Relaxed);
        warn!(target: "mosaic::storage", stage, error = %e, "Storage maintenance failed");
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.signal.shutdown();
    }
}

/// Handle to an open engine; cheap to clone
#[derive(Clone)]
pub struct LsmEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for LsmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LsmEngine")
            .field("dir", &self.inner.dir)
            .field("visible_seq", &self.visible_seq())
            .finish()
    }
}

impl LsmEngine {
    /// Open or create an engine in `dir`, replaying any unflushed WAL
    pub fn open(dir: impl AsRef<Path>, config: StorageConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let wal_dir = dir.join(WAL_DIR);
        let sst_dir = dir.join(SST_DIR);
        fs::create_dir_all(&wal_dir)?;
        fs::create_dir_all(&sst_dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        lock.try_lock_exclusive().map_err(|_| {
            Error::InvalidOperation(format!("database at {} is already open", dir.display()))
        })?;

        let manifest = match Manifest::load(&dir)? {
            Some(m) => m,
            None => {
                let m = Manifest::new();
                m.store(&dir)?;
                info!(target: "mosaic::storage", database_id = %m.database_id, "Created new database");
                m
            }
        };

        let mut tables = Vec::with_capacity(manifest.tables.len());
        for &id in &manifest.tables {
            tables.push(Arc::new(SsTable::open(&sst_dir.join(table_file_name(id)), id)?));
        }
        remove_orphan_tables(&sst_dir, &manifest.tables)?;

        let active = Memtable::new();
        let mut max_seq = manifest.flushed_seq;
        for t in &tables {
            max_seq = max_seq.max(t.max_seq());
        }
        let mut replayed = 0usize;
        for record in WalReader::new(&wal_dir).replay_from(manifest.wal_segment)? {
            let WalRecord::Commit { seq, ops } = record;
            if seq <= manifest.flushed_seq {
                continue;
            }
            for op in ops {
                match op {
                    WalOp::Put { key, value } => active.insert(&key, seq, Some(value)),
                    WalOp::Delete { key } => active.insert(&key, seq, None),
                }
            }
            max_seq = max_seq.max(seq);
            replayed += 1;
        }

        let next_segment = list_segments(&wal_dir)?
            .last()
            .map_or(1, |last| last + 1)
            .max(manifest.wal_segment);
        let wal = WalWriter::open(&wal_dir, next_segment, config.durability)?;

        info!(
            target: "mosaic::storage",
            dir = %dir.display(),
            tables = tables.len(),
            replayed_commits = replayed,
            visible_seq = max_seq,
            "Opened storage engine"
        );

        let signal = Arc::new(FlushSignal::new());
        let inner = Arc::new(EngineInner {
            dir,
            state: RwLock::new(LevelState {
                active: Arc::new(active),
                frozen: Vec::new(),
                tables,
            }),
            wal: Mutex::new(wal),
            manifest: Mutex::new(manifest),
            commit_lock: Mutex::new(()),
            maintenance: Mutex::new(()),
            maintenance_pending: AtomicBool::new(false),
            visible_seq: AtomicU64::new(max_seq),
            key_versions: DashMap::new(),
            snapshots: SnapshotRegistry::new(),
            signal: Arc::clone(&signal),
            counters: EngineCounters::default(),
            config,
            _lock: lock,
        });

        if inner.config.background_compaction {
            compaction::spawn_worker(Arc::downgrade(&inner), signal)?;
        }
        Ok(LsmEngine { inner })
    }

    /// Directory the engine lives in
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Configuration in effect
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Highest published commit sequence
    pub fn visible_seq(&self) -> u64 {
        self.inner.visible_seq.load(Ordering::Acquire)
    }

    /// Pin the current state for reading
    pub fn snapshot(&self) -> Snapshot {
        let seq = self.inner.snapshots.acquire(&self.inner.visible_seq);
        Snapshot::new(self.clone(), seq)
    }

    pub(crate) fn release_snapshot(&self, seq: u64) {
        self.inner.snapshots.release(seq);
    }

    /// Start an unvalidated write batch
    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new(self.snapshot())
    }

    /// Sequence of the last commit that wrote `key`, if still tracked.
    ///
    /// Entries at or below the oldest live snapshot may have been pruned;
    /// a transaction holding a snapshot never needs those.
    pub fn last_commit_seq(&self, key: &str) -> Option<u64> {
        self.inner.key_versions.get(key).map(|v| *v)
    }

    /// Newest version of `key` at or below `seq`
    pub fn get_at(&self, key: &str, seq: u64) -> Result<Option<Vec<u8>>> {
        let st = self.inner.state.read();
        if let Some(v) = st.active.get(key, seq) {
            return Ok(v);
        }
        for (mem, _) in st.frozen.iter().rev() {
            if let Some(v) = mem.get(key, seq) {
                return Ok(v);
            }
        }
        let tables = st.tables.clone();
        drop(st);
        for table in &tables {
            if let Some(v) = table.get(key, seq)? {
                return Ok(v);
            }
        }
        Ok(None)
    }

    /// Point reads of several keys at one sequence
    pub fn multi_get(&self, keys: &[&str], seq: u64) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get_at(k, seq)).collect()
    }

    /// Ordered scan of `range` as of `seq`
    pub fn scan_at(&self, range: &KeyRange, seq: u64, f: &mut ScanFn<'_>) -> Result<()> {
        let (mem_runs, tables) = {
            let st = self.inner.state.read();
            let mut runs = Vec::with_capacity(1 + st.frozen.len());
            runs.push(st.active.collect_range(range));
            for (mem, _) in st.frozen.iter().rev() {
                runs.push(mem.collect_range(range));
            }
            (runs, st.tables.clone())
        };

        let mut sources: Vec<Source<'_>> = Vec::with_capacity(mem_runs.len() + tables.len());
        for run in mem_runs {
            sources.push(Box::new(run.into_iter()));
        }
        for table in &tables {
            sources.push(Box::new(table.iter_range(range)));
        }
        let visible = VisibleIter::new(MergeIter::new(sources), seq);
        let limit = range.limit.unwrap_or(usize::MAX);

        if range.reverse {
            let all: Vec<(String, Vec<u8>)> = visible.collect();
            for (k, v) in all.iter().rev().take(limit) {
                if !f(k, v) {
                    break;
                }
            }
        } else {
            for (k, v) in visible.take(limit) {
                if !f(&k, &v) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Apply `ops` atomically after `validate` accepts them.
    ///
    /// `validate` runs under the commit lock, so nothing can commit between
    /// the check and the write. Returns the commit sequence; an empty batch
    /// returns the current sequence without touching the WAL.
    ///
    /// Once the batch is published the commit succeeds. A flush or
    /// compaction failing afterwards is logged and counted in
    /// [`EngineStats::maintenance_failures`]; [`flush`](Self::flush) reports
    /// it if it persists.
    pub fn commit_batch<F>(&self, ops: Vec<WalOp>, validate: F) -> Result<u64>
    where
        F: FnOnce(&LsmEngine) -> Result<()>,
    {
        let seq = self.commit_batch_deferred(ops, validate)?;
        self.run_pending_maintenance();
        Ok(seq)
    }

    /// Like [`commit_batch`](Self::commit_batch) but leaves flush and
    /// compaction for [`run_pending_maintenance`](Self::run_pending_maintenance).
    /// For callers that commit while holding a lock of their own.
    pub fn commit_batch_deferred<F>(&self, ops: Vec<WalOp>, validate: F) -> Result<u64>
    where
        F: FnOnce(&LsmEngine) -> Result<()>,
    {
        let inner = &self.inner;
        let _commit = inner.commit_lock.lock();
        validate(self)?;
        if ops.is_empty() {
            return Ok(self.visible_seq());
        }
        let seq = self.visible_seq() + 1;
        let record = WalRecord::Commit { seq, ops };
        inner.wal.lock().append(&record)?;
        let WalRecord::Commit { ops, .. } = record;

        {
            let st = inner.state.read();
            for op in ops {
                match op {
                    WalOp::Put { key, value } => {
                        st.active.insert(&key, seq, Some(value));
                        inner.key_versions.insert(key, seq);
                    }
                    WalOp::Delete { key } => {
                        st.active.insert(&key, seq, None);
                        inner.key_versions.insert(key, seq);
                    }
                }
            }
        }
        inner.visible_seq.store(seq, Ordering::Release);
        inner.counters.commits.fetch_add(1, Ordering::Relaxed);

        // Published: nothing below may fail the commit
        if inner.state.read().active.approx_bytes() >= inner.config.memtable_size_bytes {
            match self.freeze_active() {
                Ok(()) => inner.maintenance_pending.store(true, Ordering::Release),
                Err(e) => inner.note_maintenance_failure("freeze", &e),
            }
        }
        Ok(seq)
    }

    /// Flush and compact if a commit froze a memtable, on the background
    /// thread or inline. Failures are logged and counted, not returned.
    pub fn run_pending_maintenance(&self) {
        let inner = &self.inner;
        if !inner.maintenance_pending.swap(false, Ordering::AcqRel) {
            return;
        }
        if inner.config.background_compaction {
            inner.signal.notify();
        } else if let Err(e) = compaction::run_maintenance(inner) {
            inner.note_maintenance_failure("flush", &e);
        }
    }

    /// Freeze the active memtable and rotate the WAL. Caller holds the
    /// commit lock.
    fn freeze_active(&self) -> Result<()> {
        let inner = &self.inner;
        let mut wal = inner.wal.lock();
        let covered = wal.segment_id();
        let next = WalWriter::open(&inner.dir.join(WAL_DIR), covered + 1, inner.config.durability)?;
        let mut old = std::mem::replace(&mut *wal, next);
        old.sync()?;
        drop(old);

        let mut st = inner.state.write();
        let frozen = std::mem::replace(&mut st.active, Arc::new(Memtable::new()));
        debug!(
            target: "mosaic::storage",
            bytes = frozen.approx_bytes(),
            covered_segment = covered,
            "Froze memtable"
        );
        st.frozen.push((frozen, covered));
        Ok(())
    }

    /// Force everything in memory out to SSTables
    pub fn flush(&self) -> Result<()> {
        {
            let _commit = self.inner.commit_lock.lock();
            if !self.inner.state.read().active.is_empty() {
                self.freeze_active()?;
            }
        }
        compaction::run_maintenance(&self.inner)
    }

    /// Merge every SSTable into one
    pub fn compact(&self) -> Result<()> {
        let _m = self.inner.maintenance.lock();
        compaction::compact_tables(&self.inner)
    }

    /// Copy a consistent image of the database into `dest`.
    ///
    /// Memory is flushed first, so the image consists only of the manifest
    /// and SSTables. Opening `dest` restores it.
    pub fn checkpoint(&self, dest: impl AsRef<Path>) -> Result<()> {
        let dest = dest.as_ref();
        self.flush()?;
        let _m = self.inner.maintenance.lock();
        let manifest = self.inner.manifest.lock().clone();
        fs::create_dir_all(dest.join(SST_DIR))?;
        fs::create_dir_all(dest.join(WAL_DIR))?;
        for &id in &manifest.tables {
            let name = table_file_name(id);
            fs::copy(
                self.inner.dir.join(SST_DIR).join(&name),
                dest.join(SST_DIR).join(&name),
            )?;
        }
        let mut image = manifest;
        image.wal_segment = 1;
        image.store(dest)?;
        info!(
            target: "mosaic::storage",
            dest = %dest.display(),
            tables = image.tables.len(),
            flushed_seq = image.flushed_seq,
            "Checkpoint written"
        );
        Ok(())
    }

    /// fsync the WAL regardless of durability mode
    pub fn sync(&self) -> Result<()> {
        self.inner.wal.lock().sync()
    }

    /// Current statistics
    pub fn stats(&self) -> EngineStats {
        let st = self.inner.state.read();
        EngineStats {
            visible_seq: self.visible_seq(),
            commits: self.inner.counters.commits.load(Ordering::Relaxed),
            flushes: self.inner.counters.flushes.load(Ordering::Relaxed),
            compactions: self.inner.counters.compactions.load(Ordering::Relaxed),
            maintenance_failures: self.inner.counters.maintenance_failures.load(Ordering::Relaxed),
            memtable_bytes: st.active.approx_bytes(),
            frozen_memtables: st.frozen.len(),
            sstables: st.tables.len(),
            sstable_entries: st.tables.iter().map(|t| t.entry_count()).sum(),
            active_snapshots: self.inner.snapshots.active(),
            tracked_keys: self.inner.key_versions.len(),
        }
    }
}

impl KvRead for LsmEngine {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_at(key, self.visible_seq())
    }

    fn scan(&self, range: &KeyRange, f: &mut ScanFn<'_>) -> Result<()> {
        self.scan_at(range, self.visible_seq(), f)
    }
}

/// Remove table files that no manifest references (crash between write and
/// manifest update)
fn remove_orphan_tables(sst_dir: &Path, live: &[u64]) -> Result<()> {
    for entry in fs::read_dir(sst_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let orphan = match parse_table_file_name(&name) {
            Some(id) => !live.contains(&id),
            None => name.ends_with(".tmp"),
        };
        if orphan {
            warn!(target: "mosaic::storage", file = %name, "Removing orphaned table file");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Write `mem` to a new SSTable and return it
pub(crate) fn flush_memtable(inner: &EngineInner, mem: &Memtable, id: u64) -> Result<Arc<SsTable>> {
    let path = inner.dir.join(SST_DIR).join(table_file_name(id));
    let meta = write_table(&path, mem.entries(), inner.config.sparse_index_interval)?;
    debug!(
        target: "mosaic::storage",
        table = id,
        entries = meta.entry_count,
        bytes = meta.file_size,
        "Flushed memtable"
    );
    Ok(Arc::new(SsTable::open(&path, id)?))
}

/// Path of table `id`
pub(crate) fn table_path(inner: &EngineInner, id: u64) -> PathBuf {
    inner.dir.join(SST_DIR).join(table_file_name(id))
}

/// Delete WAL segments up to and including `covered`
pub(crate) fn delete_wal_segments(inner: &EngineInner, covered: u64) -> Result<()> {
    let wal_dir = inner.dir.join(WAL_DIR);
    for id in list_segments(&wal_dir)? {
        if id <= covered {
            fs::remove_file(segment_path(&wal_dir, id))?;
        }
    }
    Ok(())
}
