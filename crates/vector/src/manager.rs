//! Vector index manager
//!
//! One manager owns one named index. Entities carrying the vector live in
//! the table named after the index and are written through the secondary
//! index manager, so ordinary indexes on that table keep working.
//!
//! The HNSW state is in memory only. Writes stage the entity into a
//! transaction and record a [`VectorPatch`]; the patch is applied after the
//! commit succeeds, tagged with the commit sequence. A failed commit leaves
//! the HNSW untouched.

use crate::config::VectorConfig;
use crate::index::{VectorIndex, VectorOp};
use crate::persist;
use mosaic_concurrency::TransactionContext;
use mosaic_core::key::{entity_prefix, last_component, validate_table_name};
use mosaic_core::{BaseEntity, Error, Result, Status};
use mosaic_index::SecondaryIndexManager;
use mosaic_storage::{KvRead, KvStage, LsmEngine};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Vector mutations staged alongside one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorPatch {
    ops: Vec<VectorOp>,
}

impl VectorPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing was staged
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of staged ops
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Staged ops in order
    pub fn ops(&self) -> &[VectorOp] {
        &self.ops
    }

    fn push(&mut self, op: VectorOp) {
        self.ops.push(op);
    }
}

/// Point-in-time description of an index
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStats {
    /// Index name
    pub name: String,
    /// Vector dimension
    pub dimension: usize,
    /// Distance function
    pub metric: crate::config::Metric,
    /// Searchable vectors
    pub live: usize,
    /// Removed vectors still linked in the graph
    pub tombstones: usize,
    /// HNSW `m`
    pub m: usize,
    /// HNSW `ef_construction`
    pub ef_construction: usize,
    /// HNSW `ef_search`
    pub ef_search: usize,
    /// Approximate bytes held in memory
    pub memory_bytes: usize,
}

/// Approximate nearest-neighbor index over one entity table
pub struct VectorIndexManager {
    indexes: Arc<SecondaryIndexManager>,
    name: String,
    state: RwLock<VectorIndex>,
}

impl std::fmt::Debug for VectorIndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("VectorIndexManager")
            .field("name", &self.name)
            .field("config", &state.config)
            .field("live", &state.live())
            .finish()
    }
}

impl VectorIndexManager {
    /// Allocate index `name`, or load it from `load_dir` if a saved file
    /// exists there.
    ///
    /// A fresh index is empty; call [`rebuild_from_storage`](Self::rebuild_from_storage)
    /// to fill it from stored entities. A saved file that fails its checksum
    /// is an error, never silently replaced.
    pub fn init(
        indexes: Arc<SecondaryIndexManager>,
        name: impl Into<String>,
        config: VectorConfig,
        load_dir: Option<&Path>,
    ) -> Result<Self> {
        let name = name.into();
        validate_table_name(&name)?;
        // Also the file name of the saved index
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(Error::InvalidArgument(format!(
                "vector index name {:?} may only use letters, digits, '_' and '-'",
                name
            )));
        }
        config.validate()?;
        let manager = VectorIndexManager {
            indexes,
            state: RwLock::new(VectorIndex::new(config)),
            name,
        };
        if let Some(dir) = load_dir {
            if persist::index_path(dir, &manager.name).exists() {
                manager.load_index(dir)?;
            }
        }
        info!(target: "mosaic::vector", index = %manager.name, "Vector index initialized");
        Ok(manager)
    }

    /// Index name, also the entity table
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current configuration
    pub fn config(&self) -> VectorConfig {
        self.state.read().config.clone()
    }

    fn engine(&self) -> &LsmEngine {
        self.indexes.engine()
    }

    /// Change the search beam width. Larger finds more true neighbors at
    /// the cost of latency.
    pub fn set_ef_search(&self, ef: usize) -> Result<()> {
        if ef == 0 {
            return Err(Error::InvalidArgument("ef_search must be positive".into()));
        }
        let mut state = self.state.write();
        state.config.ef_search = ef;
        state.graph.set_ef_search(ef);
        Ok(())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store `entity` and index its vector in a transaction of its own
    pub fn add_entity(&self, entity: &BaseEntity) -> Status {
        self.in_transaction(|txn, patch| self.stage_upsert(txn, entity, patch)).into()
    }

    /// Replace a stored entity and its vector. The entity must exist.
    pub fn update_entity(&self, entity: &BaseEntity) -> Status {
        self.in_transaction(|txn, patch| {
            if self.indexes.get_in(&*txn, &self.name, entity.primary_key())?.is_none() {
                return Err(Error::NotFound(format!(
                    "{} in vector index {}",
                    entity.primary_key(),
                    self.name
                )));
            }
            self.stage_upsert(txn, entity, patch)
        })
        .into()
    }

    /// Erase an entity and tombstone its vector. Removing an absent key
    /// succeeds.
    pub fn remove_by_pk(&self, pk: &str) -> Status {
        self.in_transaction(|txn, patch| self.stage_remove(txn, pk, patch)).into()
    }

    /// Store many entities in one transaction and link them under a single
    /// lock acquisition. Any invalid entity fails the whole batch.
    pub fn add_batch(&self, entities: &[BaseEntity]) -> Status {
        self.in_transaction(|txn, patch| {
            for entity in entities {
                self.stage_upsert(txn, entity, patch)?;
            }
            Ok(())
        })
        .into()
    }

    /// Stage an entity and record its vector in `patch`
    pub fn add_entity_in<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        entity: &BaseEntity,
        patch: &mut VectorPatch,
    ) -> Status {
        self.stage_upsert(stage, entity, patch).into()
    }

    /// Stage an entity of the index table whether or not it carries a
    /// vector. Without one, any previously indexed vector is tombstoned.
    pub fn put_entity_in<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        entity: &BaseEntity,
        patch: &mut VectorPatch,
    ) -> Status {
        self.stage_entity(stage, entity, patch).into()
    }

    /// Stage an entity removal and record the tombstone in `patch`
    pub fn remove_by_pk_in<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        pk: &str,
        patch: &mut VectorPatch,
    ) -> Status {
        self.stage_remove(stage, pk, patch).into()
    }

    /// Apply a patch whose transaction committed at `seq`
    pub fn apply_committed(&self, patch: &VectorPatch, seq: u64) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        for op in patch.ops() {
            if !state.apply(op, seq)? {
                debug!(target: "mosaic::vector", index = %self.name, pk = %op.pk(), seq, "Skipped superseded vector op");
            }
        }
        Ok(())
    }

    fn in_transaction<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut TransactionContext, &mut VectorPatch) -> Result<()>,
    {
        let mut txn = TransactionContext::begin(self.engine());
        let mut patch = VectorPatch::new();
        if let Err(e) = f(&mut txn, &mut patch) {
            txn.abort(e.to_string());
            return Err(e);
        }
        let seq = txn.commit()?;
        self.apply_committed(&patch, seq)
    }

    fn stage_upsert<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        entity: &BaseEntity,
        patch: &mut VectorPatch,
    ) -> Result<()> {
        let field = self.state.read().config.field.clone();
        if entity.get_field_as_vector(&field)?.is_none() {
            return Err(Error::InvalidArgument(format!(
                "entity {} has no vector field {:?}",
                entity.primary_key(),
                field
            )));
        }
        self.stage_entity(stage, entity, patch)
    }

    fn stage_entity<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        entity: &BaseEntity,
        patch: &mut VectorPatch,
    ) -> Result<()> {
        let field = self.state.read().config.field.clone();
        let pk = entity.primary_key().to_string();
        match entity.get_field_as_vector(&field)? {
            Some(vector) => {
                self.state.read().check_vector(&vector)?;
                self.indexes.put_in(stage, &self.name, entity).into_result()?;
                patch.push(VectorOp::Upsert { pk, vector });
            }
            None => {
                self.indexes.put_in(stage, &self.name, entity).into_result()?;
                patch.push(VectorOp::Remove { pk });
            }
        }
        Ok(())
    }

    fn stage_remove<S: KvStage + ?Sized>(&self, stage: &mut S, pk: &str, patch: &mut VectorPatch) -> Result<()> {
        if pk.is_empty() {
            return Err(Error::InvalidArgument("primary key must not be empty".into()));
        }
        self.indexes.erase_in(stage, &self.name, pk).into_result()?;
        patch.push(VectorOp::Remove { pk: pk.to_string() });
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Up to `k` `(primary key, distance)` pairs, ascending by distance.
    ///
    /// With `whitelist`, only the listed keys are candidates and they are
    /// scored exhaustively.
    pub fn search_knn(&self, query: &[f32], k: usize, whitelist: Option<&[String]>) -> Result<Vec<(String, f32)>> {
        self.state.read().search(query, k, whitelist)
    }

    /// True if `pk` has a searchable vector
    pub fn contains(&self, pk: &str) -> bool {
        self.state.read().contains(pk)
    }

    /// Indexed (normalized, for cosine) vector of `pk`
    pub fn vector(&self, pk: &str) -> Option<Vec<f32>> {
        self.state.read().vector_of(pk).map(<[f32]>::to_vec)
    }

    /// Current counters
    pub fn stats(&self) -> VectorStats {
        let state = self.state.read();
        VectorStats {
            name: self.name.clone(),
            dimension: state.config.dimension,
            metric: state.config.metric,
            live: state.live(),
            tombstones: state.tombstones(),
            m: state.config.m,
            ef_construction: state.config.ef_construction,
            ef_search: state.config.ef_search,
            memory_bytes: state.memory_usage(),
        }
    }

    // ========================================================================
    // Rebuild and persistence
    // ========================================================================

    /// Replace the in-memory index with one built from every stored entity
    /// of the table. Entities without a usable vector are skipped. Returns
    /// the number of vectors indexed.
    pub fn rebuild_from_storage(&self) -> Result<usize> {
        let started = Instant::now();
        let mut state = self.state.write();
        let mut fresh = VectorIndex::new(state.config.clone());
        let field = fresh.config.field.clone();

        let view = self.engine().snapshot();
        let mut keys = Vec::new();
        view.scan_prefix(&entity_prefix(&self.name), &mut |key, _| {
            keys.push(key.to_string());
            true
        })?;

        let mut skipped = 0usize;
        for key in keys {
            let pk = last_component(&key)?;
            let Some(entity) = self.indexes.get_in(&view, &self.name, &pk)? else {
                continue;
            };
            match entity.get_field_as_vector(&field)? {
                Some(vector) if fresh.check_vector(&vector).is_ok() => fresh.upsert(&pk, &vector)?,
                _ => {
                    skipped += 1;
                    warn!(target: "mosaic::vector", index = %self.name, pk = %pk, "Entity has no usable vector, skipped");
                }
            }
        }
        fresh.set_applied_floor(view.seq());
        let count = fresh.live();
        *state = fresh;
        info!(
            target: "mosaic::vector",
            index = %self.name,
            vectors = count,
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Vector index rebuilt from storage"
        );
        Ok(count)
    }

    /// Write the index to `<dir>/<name>.mvx`, replacing any previous file.
    ///
    /// The file records the engine's visible sequence; save while no writes
    /// to the table are in flight for the staleness check on load to be exact.
    pub fn save_index(&self, dir: &Path) -> Result<PathBuf> {
        let path = persist::index_path(dir, &self.name);
        let bytes = {
            let state = self.state.write();
            persist::encode(&state, self.engine().visible_seq())?
        };
        persist::write_file(&path, &bytes)?;
        info!(target: "mosaic::vector", index = %self.name, path = %path.display(), bytes = bytes.len(), "Vector index saved");
        Ok(path)
    }

    /// Replace the in-memory index with the file saved in `dir`.
    ///
    /// A checksum mismatch is `Corrupt`. A file whose dimension or metric
    /// differs from this index is `InvalidOperation`. A file saved at a
    /// different storage sequence than the current one is rebuilt from
    /// storage after loading.
    pub fn load_index(&self, dir: &Path) -> Result<()> {
        let (loaded, seq) = read_saved(dir, &self.name)?;
        {
            let state = self.state.read();
            if loaded.config.dimension != state.config.dimension || loaded.config.metric != state.config.metric {
                return Err(Error::InvalidOperation(format!(
                    "saved index {} is {}-dimensional {}, expected {}-dimensional {}",
                    self.name,
                    loaded.config.dimension,
                    loaded.config.metric,
                    state.config.dimension,
                    state.config.metric
                )));
            }
        }
        self.adopt(loaded, seq)
    }

    /// Open an index purely from its saved file, taking the configuration
    /// recorded there
    pub fn open_saved(indexes: Arc<SecondaryIndexManager>, name: impl Into<String>, dir: &Path) -> Result<Self> {
        let name = name.into();
        let (loaded, seq) = read_saved(dir, &name)?;
        let manager = Self::init(indexes, name, loaded.config.clone(), None)?;
        manager.adopt(loaded, seq)?;
        Ok(manager)
    }

    fn adopt(&self, mut loaded: VectorIndex, seq: u64) -> Result<()> {
        loaded.set_applied_floor(seq);
        let live = loaded.live();
        *self.state.write() = loaded;
        info!(target: "mosaic::vector", index = %self.name, vectors = live, seq, "Vector index loaded");
        let visible = self.engine().visible_seq();
        if seq != visible {
            warn!(target: "mosaic::vector", index = %self.name, saved_seq = seq, visible_seq = visible, "Saved vector index does not match storage, rebuilding");
            self.rebuild_from_storage()?;
        }
        Ok(())
    }
}

fn read_saved(dir: &Path, name: &str) -> Result<(VectorIndex, u64)> {
    let path = persist::index_path(dir, name);
    let bytes = std::fs::read(&path)?;
    persist::decode(&bytes).map_err(|e| {
        warn!(target: "mosaic::vector", index = %name, path = %path.display(), error = %e, "Vector index file rejected");
        e
    })
}
