//! Secondary index manager
//!
//! Owns the descriptor cache and the write path. Every entity write reads
//! the previously stored entity, diffs the index entries derived from the
//! old and new values, and stages the entity blob plus the entry delta into
//! one [`KvStage`]. Staging into a transaction or a batch makes the entity
//! and all of its index entries land together or not at all.
//!
//! Queries live in `query`, admin operations in `maintenance`, TTL cleanup
//! in `ttl`.

use crate::descriptor::{IndexDescriptor, IndexKind, IndexType};
use crate::fulltext::tokenize;
use crate::geo::{self, GEOHASH_PRECISION};
use crate::keys::{self, EQUALITY, FT_POSTING, GEO, RANGE, SPARSE, TTL, UNIQUE};
use crate::sortable;
use mosaic_concurrency::TransactionContext;
use mosaic_core::key::{entity_key, validate_table_name};
use mosaic_core::{BaseEntity, EntityCodec, Error, FieldValue, Result, Status};
use mosaic_storage::{KvRead, KvStage, LsmEngine};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Source of the current time in epoch seconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock
pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

/// Derived entries of one index for one entity: key to value
pub(crate) type Entries = BTreeMap<String, Vec<u8>>;

/// Counters of rebuild runs
#[derive(Debug, Default)]
pub struct RebuildMetrics {
    /// Completed rebuilds
    pub rebuild_count: AtomicU64,
    /// Total wall time spent rebuilding
    pub rebuild_duration_ms: AtomicU64,
    /// Entities re-indexed across all rebuilds
    pub rebuild_entities_processed: AtomicU64,
}

impl RebuildMetrics {
    pub(crate) fn record(&self, entities: u64, duration_ms: u64) {
        self.rebuild_count.fetch_add(1, Ordering::Relaxed);
        self.rebuild_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.rebuild_entities_processed.fetch_add(entities, Ordering::Relaxed);
    }
}

/// Maintains every secondary index of one engine
pub struct SecondaryIndexManager {
    pub(crate) engine: LsmEngine,
    pub(crate) codec: EntityCodec,
    /// table -> descriptors, in definition order
    pub(crate) descriptors: RwLock<HashMap<String, Vec<IndexDescriptor>>>,
    pub(crate) clock: Clock,
    pub(crate) metrics: RebuildMetrics,
}

impl fmt::Debug for SecondaryIndexManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.descriptors.read().len();
        f.debug_struct("SecondaryIndexManager")
            .field("indexed_tables", &tables)
            .finish()
    }
}

impl SecondaryIndexManager {
    /// Open over `engine`, loading persisted descriptors
    pub fn open(engine: LsmEngine, codec: EntityCodec) -> Result<Self> {
        let mut descriptors: HashMap<String, Vec<IndexDescriptor>> = HashMap::new();
        let mut loaded = 0usize;
        let mut failure = None;
        engine.scan_prefix(&keys::meta_prefix(), &mut |key, value| {
            match serde_json::from_slice::<IndexDescriptor>(value) {
                Ok(desc) => {
                    descriptors.entry(desc.table.clone()).or_default().push(desc);
                    loaded += 1;
                    true
                }
                Err(e) => {
                    failure = Some(Error::Corrupt(format!("index descriptor {}: {}", key, e)));
                    false
                }
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        if loaded > 0 {
            info!(target: "mosaic::index", descriptors = loaded, "Loaded index descriptors");
        }
        Ok(SecondaryIndexManager {
            engine,
            codec,
            descriptors: RwLock::new(descriptors),
            clock: system_clock(),
            metrics: RebuildMetrics::default(),
        })
    }

    /// Replace the clock used for TTL expiry
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current time in epoch seconds
    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Underlying engine
    pub fn engine(&self) -> &LsmEngine {
        &self.engine
    }

    /// Codec used for entity blobs
    pub fn codec(&self) -> &EntityCodec {
        &self.codec
    }

    /// Rebuild counters
    pub fn rebuild_metrics(&self) -> &RebuildMetrics {
        &self.metrics
    }

    /// Descriptors of `table`
    pub fn descriptors_for(&self, table: &str) -> Vec<IndexDescriptor> {
        self.descriptors
            .read()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Descriptor of one index, if defined
    pub fn descriptor(&self, table: &str, column: &str, index_type: IndexType) -> Option<IndexDescriptor> {
        self.descriptors.read().get(table).and_then(|descs| {
            descs
                .iter()
                .find(|d| d.column == column && d.index_type() == index_type)
                .cloned()
        })
    }

    /// Descriptor or `IndexMisconfigured`
    pub(crate) fn require(&self, table: &str, column: &str, index_type: IndexType) -> Result<IndexDescriptor> {
        self.descriptor(table, column, index_type).ok_or_else(|| {
            Error::IndexMisconfigured(format!("no {} index on {}.{}", index_type, table, column))
        })
    }

    /// Latest committed entity
    pub fn get(&self, table: &str, pk: &str) -> Result<Option<BaseEntity>> {
        self.get_in(&self.engine, table, pk)
    }

    /// Entity as seen by `view`
    pub fn get_in<R: KvRead + ?Sized>(&self, view: &R, table: &str, pk: &str) -> Result<Option<BaseEntity>> {
        match view.get(&entity_key(table, pk))? {
            Some(blob) => Ok(Some(self.codec.decode(table, pk, &blob)?)),
            None => Ok(None),
        }
    }

    /// Write `entity` and its index entries in a transaction of its own.
    ///
    /// A concurrent commit touching the same keys yields a `Conflict` status;
    /// the write is not retried.
    pub fn put(&self, table: &str, entity: &BaseEntity) -> Status {
        self.in_transaction(|txn| self.stage_put(txn, table, entity)).into()
    }

    /// Remove the entity and all of its index entries in a transaction of
    /// its own. Removing an absent entity succeeds.
    pub fn erase(&self, table: &str, pk: &str) -> Status {
        self.in_transaction(|txn| self.stage_erase(txn, table, pk)).into()
    }

    /// Stage `entity` and its index delta into `stage`
    pub fn put_in<S: KvStage + ?Sized>(&self, stage: &mut S, table: &str, entity: &BaseEntity) -> Status {
        self.stage_put(stage, table, entity).into()
    }

    /// Stage the removal of an entity and its index entries into `stage`
    pub fn erase_in<S: KvStage + ?Sized>(&self, stage: &mut S, table: &str, pk: &str) -> Status {
        self.stage_erase(stage, table, pk).into()
    }

    pub(crate) fn in_transaction<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut TransactionContext) -> Result<()>,
    {
        let mut txn = TransactionContext::begin(&self.engine);
        match f(&mut txn) {
            Ok(()) => txn.commit().map(|_| ()),
            Err(e) => {
                txn.abort(e.to_string());
                Err(e)
            }
        }
    }

    pub(crate) fn stage_put<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        table: &str,
        entity: &BaseEntity,
    ) -> Result<()> {
        validate_table_name(table)?;
        let pk = entity.primary_key();
        if pk.is_empty() {
            return Err(Error::InvalidArgument("entity has no primary key".into()));
        }
        let old = self.get_in(&*stage, table, pk)?;
        stage.put(&entity_key(table, pk), self.codec.encode(table, entity)?)?;

        let now = self.now();
        for desc in self.descriptors_for(table) {
            let before = self.stored_entries(&*stage, &desc, old.as_ref(), pk)?;
            let after = self.entries_for(&desc, entity, now)?;
            apply_delta(stage, &desc, pk, before, after)?;
        }
        Ok(())
    }

    pub(crate) fn stage_erase<S: KvStage + ?Sized>(&self, stage: &mut S, table: &str, pk: &str) -> Result<()> {
        validate_table_name(table)?;
        if pk.is_empty() {
            return Err(Error::InvalidArgument("primary key must not be empty".into()));
        }
        let Some(old) = self.get_in(&*stage, table, pk)? else {
            return Ok(());
        };
        stage.delete(&entity_key(table, pk))?;
        for desc in self.descriptors_for(table) {
            for key in self.stored_entries(&*stage, &desc, Some(&old), pk)?.keys() {
                stage.delete(key)?;
            }
        }
        Ok(())
    }

    /// Entries currently stored for `pk`.
    ///
    /// TTL entries depend on the time of the write, so they come from the
    /// stored pointer instead of being recomputed.
    pub(crate) fn stored_entries<R: KvRead + ?Sized>(
        &self,
        view: &R,
        desc: &IndexDescriptor,
        old: Option<&BaseEntity>,
        pk: &str,
    ) -> Result<Entries> {
        if let IndexKind::Ttl { .. } = desc.kind {
            let mut entries = Entries::new();
            let ptr = keys::ttl_ptr_key(&desc.table, &desc.column, pk);
            if let Some(raw) = view.get(&ptr)? {
                let expiry = parse_expiry(&raw)?;
                let key = keys::entry_key(
                    TTL,
                    &desc.table,
                    &desc.column,
                    &[&keys::encode_expiry(expiry)],
                    pk,
                );
                entries.insert(key, Vec::new());
                entries.insert(ptr, raw);
            }
            return Ok(entries);
        }
        match old {
            Some(entity) => self.entries_for(desc, entity, 0),
            None => Ok(Entries::new()),
        }
    }

    /// Entries `entity` should have under `desc` if written at `now`
    pub(crate) fn entries_for(&self, desc: &IndexDescriptor, entity: &BaseEntity, now: i64) -> Result<Entries> {
        let (table, column) = (desc.table.as_str(), desc.column.as_str());
        let pk = entity.primary_key();
        let mut entries = Entries::new();
        match &desc.kind {
            IndexKind::Equality { unique } => {
                let mut values = Vec::new();
                for col in desc.columns() {
                    match entity.get_field(col)? {
                        Some(v) if !desc.is_composite() || !v.is_null() => values.push(v.to_text()),
                        _ => return Ok(entries),
                    }
                }
                let parts: Vec<&str> = values.iter().map(String::as_str).collect();
                entries.insert(keys::entry_key(EQUALITY, table, column, &parts, pk), Vec::new());
                if *unique {
                    let guard = keys::unique_key(table, column, IndexType::Equality, &parts);
                    entries.insert(guard, pk.as_bytes().to_vec());
                }
            }
            IndexKind::Sparse { unique } => {
                let Some(value) = entity.get_field(column)? else {
                    return Ok(entries);
                };
                if !is_present(&value) {
                    return Ok(entries);
                }
                let text = value.to_text();
                entries.insert(keys::entry_key(SPARSE, table, column, &[&text], pk), Vec::new());
                if *unique {
                    let guard = keys::unique_key(table, column, IndexType::Sparse, &[&text]);
                    entries.insert(guard, pk.as_bytes().to_vec());
                }
            }
            IndexKind::Range => {
                if let Some(enc) = entity.get_field(column)?.as_ref().and_then(sortable::encode_value) {
                    entries.insert(keys::entry_key(RANGE, table, column, &[&enc], pk), Vec::new());
                }
            }
            IndexKind::Geo => {
                let lat = entity.get_field_as_double(&format!("{}_lat", column))?;
                let lon = entity.get_field_as_double(&format!("{}_lon", column))?;
                if let (Some(lat), Some(lon)) = (lat, lon) {
                    if geo::valid_coordinates(lat, lon) {
                        let hash = geo::encode(lat, lon, GEOHASH_PRECISION);
                        entries.insert(
                            keys::entry_key(GEO, table, column, &[&hash], pk),
                            format!("{},{}", lat, lon).into_bytes(),
                        );
                    } else {
                        warn!(target: "mosaic::index", table, column, pk, lat, lon, "Skipping invalid coordinates");
                    }
                }
            }
            IndexKind::Ttl { ttl_seconds } => {
                if entity.has_field(column)? {
                    let expiry = now.saturating_add(*ttl_seconds);
                    let enc = keys::encode_expiry(expiry);
                    entries.insert(keys::entry_key(TTL, table, column, &[&enc], pk), Vec::new());
                    entries.insert(
                        keys::ttl_ptr_key(table, column, pk),
                        expiry.to_string().into_bytes(),
                    );
                }
            }
            IndexKind::Fulltext(config) => {
                let Some(value) = entity.get_field(column)? else {
                    return Ok(entries);
                };
                if value.is_null() {
                    return Ok(entries);
                }
                let tokens = tokenize(&value.to_text(), config);
                if tokens.is_empty() {
                    return Ok(entries);
                }
                let mut tf: BTreeMap<&str, u32> = BTreeMap::new();
                for t in &tokens {
                    *tf.entry(t.as_str()).or_default() += 1;
                }
                for (token, count) in tf {
                    entries.insert(
                        keys::entry_key(FT_POSTING, table, column, &[token], pk),
                        count.to_string().into_bytes(),
                    );
                }
                entries.insert(
                    keys::ft_length_key(table, column, pk),
                    tokens.len().to_string().into_bytes(),
                );
            }
        }
        Ok(entries)
    }

    /// Whether `pk` has not expired under any TTL index of `table`
    pub(crate) fn is_live<R: KvRead + ?Sized>(
        &self,
        view: &R,
        ttl: &[IndexDescriptor],
        pk: &str,
        now: i64,
    ) -> Result<bool> {
        for desc in ttl {
            if let Some(raw) = view.get(&keys::ttl_ptr_key(&desc.table, &desc.column, pk))? {
                if parse_expiry(&raw)? <= now {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// TTL descriptors of `table`
    pub(crate) fn ttl_descriptors(&self, table: &str) -> Vec<IndexDescriptor> {
        self.descriptors_for(table)
            .into_iter()
            .filter(|d| d.index_type() == IndexType::Ttl)
            .collect()
    }
}

/// Sparse indexes skip nulls and empty strings
fn is_present(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => false,
        FieldValue::String(s) => !s.is_empty(),
        _ => true,
    }
}

pub(crate) fn parse_expiry(raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Corrupt("unreadable ttl expiry".into()))
}

/// Stage the difference between two entry sets, enforcing unique guards
fn apply_delta<S: KvStage + ?Sized>(
    stage: &mut S,
    desc: &IndexDescriptor,
    pk: &str,
    before: Entries,
    after: Entries,
) -> Result<()> {
    for key in before.keys() {
        if !after.contains_key(key) {
            stage.delete(key)?;
        }
    }
    for (key, value) in after {
        if before.get(&key) == Some(&value) {
            continue;
        }
        if key.starts_with(UNIQUE) {
            if let Some(owner) = stage.get(&key)? {
                if owner != pk.as_bytes() {
                    return Err(Error::InvalidOperation(format!(
                        "unique index {}.{} already holds this value for {}",
                        desc.table,
                        desc.column,
                        String::from_utf8_lossy(&owner)
                    )));
                }
            }
        }
        stage.put(&key, value)?;
    }
    Ok(())
}
