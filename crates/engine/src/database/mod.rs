//! Database struct and open/close logic
//!
//! The Database owns one storage directory:
//!
//! ```text
//! <dir>/mosaic.toml      configuration
//! <dir>/data/            LSM engine (WAL, manifest, SSTables)
//! <dir>/vectors/<n>.mvx  one file per vector index
//! ```
//!
//! ## Transaction API
//!
//! 1. **Closure API**: `db.transaction(|txn| { ... })` commits when the
//!    closure returns `Ok` and rolls back otherwise.
//! 2. **Manual API**: `db.begin()` returns a [`Transaction`] to commit or
//!    roll back explicitly.
//!
//! Conflicts are returned to the caller, never retried here.

pub mod builder;
pub mod config;

pub use builder::DatabaseBuilder;
pub use config::{GraphSettings, MosaicConfig, VectorDefaults, CONFIG_FILE_NAME};

use crate::coordinator::{TransactionManager, TransactionStats};
use crate::transaction::Transaction;
use dashmap::DashMap;
use mosaic_core::{BaseEntity, EntityCodec, Error, FieldValue, Result};
use mosaic_graph::{EdgeFilter, GraphIndexManager, PathResult};
use mosaic_index::{Clock, IndexKind, IndexType, Predicate, RangeQuery, SecondaryIndexManager};
use mosaic_storage::{EngineStats, LsmEngine};
use mosaic_vector::{Metric, VectorConfig, VectorIndexManager, VectorStats};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const DATA_DIR: &str = "data";
const VECTOR_DIR: &str = "vectors";
const VECTOR_EXTENSION: &str = "mvx";

/// Multi-model database over one storage directory
pub struct Database {
    dir: PathBuf,
    config: MosaicConfig,
    indexes: Arc<SecondaryIndexManager>,
    graph: GraphIndexManager,
    vectors: DashMap<String, Arc<VectorIndexManager>>,
    txns: TransactionManager,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.dir)
            .field("edge_table", &self.graph.edge_table())
            .field("vector_indexes", &self.vectors.len())
            .finish()
    }
}

impl Database {
    /// Open (or create) the database in `path`.
    ///
    /// A missing `mosaic.toml` is written with defaults first.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let dir = path.as_ref().to_path_buf();
        let config = Self::load_config(&dir)?;
        Self::open_inner(dir, config, EntityCodec::plain(), None)
    }

    /// Open with an explicit configuration, written to `mosaic.toml` so a
    /// later [`open`](Self::open) uses the same settings
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: MosaicConfig) -> Result<Arc<Self>> {
        Self::open_inner(path.as_ref().to_path_buf(), config, EntityCodec::plain(), None)
    }

    /// Fluent configuration
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    pub(crate) fn load_config(dir: &Path) -> Result<MosaicConfig> {
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        MosaicConfig::write_default_if_missing(&config_path)?;
        MosaicConfig::from_file(&config_path)
    }

    pub(crate) fn open_inner(
        dir: PathBuf,
        config: MosaicConfig,
        codec: EntityCodec,
        clock: Option<Clock>,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&dir)?;
        let storage = config.storage_config()?;
        if config.graph.edge_table.is_empty() {
            return Err(Error::InvalidArgument("graph.edge_table must not be empty".into()));
        }
        config.write_to_file(&dir.join(CONFIG_FILE_NAME))?;

        let engine = LsmEngine::open(dir.join(DATA_DIR), storage)?;
        let mut indexes = SecondaryIndexManager::open(engine, codec)?;
        if let Some(clock) = clock {
            indexes = indexes.with_clock(clock);
        }
        let indexes = Arc::new(indexes);
        let graph = GraphIndexManager::new(indexes.clone(), config.graph.edge_table.clone())?;

        let db = Database {
            dir,
            config,
            indexes,
            graph,
            vectors: DashMap::new(),
            txns: TransactionManager::new(),
        };
        db.load_vector_indexes()?;

        info!(
            target: "mosaic::db",
            path = %db.dir.display(),
            durability = %db.config.durability,
            visible_seq = db.engine().visible_seq(),
            vector_indexes = db.vectors.len(),
            "Database opened"
        );
        Ok(Arc::new(db))
    }

    fn vector_dir(&self) -> PathBuf {
        self.dir.join(VECTOR_DIR)
    }

    /// Open every saved vector index. A file that fails to load fails the
    /// open.
    fn load_vector_indexes(&self) -> Result<()> {
        let dir = self.vector_dir();
        if !dir.exists() {
            return Ok(());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VECTOR_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        for name in names {
            let manager = VectorIndexManager::open_saved(self.indexes.clone(), name.as_str(), &dir)?;
            self.vectors.insert(name, Arc::new(manager));
        }
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Database directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Configuration in effect
    pub fn config(&self) -> &MosaicConfig {
        &self.config
    }

    /// Storage engine
    pub fn engine(&self) -> &LsmEngine {
        self.indexes.engine()
    }

    /// Secondary index manager
    pub fn indexes(&self) -> &SecondaryIndexManager {
        &self.indexes
    }

    /// Graph index manager
    pub fn graph(&self) -> &GraphIndexManager {
        &self.graph
    }

    pub(crate) fn transactions(&self) -> &TransactionManager {
        &self.txns
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Start a transaction
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Run `f` in a transaction and commit if it returns `Ok`.
    ///
    /// ```text
    /// db.transaction(|txn| {
    ///     txn.put_entity("users", &alice)?;
    ///     txn.add_edge(&follows)
    /// })?;
    /// ```
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut txn = self.begin();
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }

    /// Transaction counters
    pub fn transaction_stats(&self) -> TransactionStats {
        self.txns.stats()
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Latest committed entity, `None` if absent
    pub fn get(&self, table: &str, pk: &str) -> Result<Option<BaseEntity>> {
        self.indexes.get(table, pk)
    }

    /// Insert or replace an entity in a transaction of its own
    pub fn put(&self, table: &str, entity: &BaseEntity) -> Result<u64> {
        let mut txn = self.begin();
        txn.put_entity(table, entity)?;
        txn.commit()
    }

    /// Remove an entity in a transaction of its own
    pub fn delete(&self, table: &str, pk: &str) -> Result<u64> {
        let mut txn = self.begin();
        txn.erase_entity(table, pk)?;
        txn.commit()
    }

    // ========================================================================
    // Index admin
    // ========================================================================

    /// Define an index and fill it from existing entities
    pub fn create_index(&self, table: &str, column: &str, kind: IndexKind) -> Result<()> {
        self.indexes.create_index(table, column, kind)
    }

    /// Fulltext index with the analyzer from `[fulltext]` in `mosaic.toml`
    pub fn create_fulltext_index(&self, table: &str, column: &str) -> Result<()> {
        self.indexes
            .create_index(table, column, IndexKind::Fulltext(self.config.fulltext.clone()))
    }

    /// Remove an index and its entries; `false` if it did not exist
    pub fn drop_index(&self, table: &str, column: &str, index_type: IndexType) -> Result<bool> {
        self.indexes.drop_index(table, column, index_type)
    }

    /// Recompute an index from stored entities; returns entities visited
    pub fn rebuild_index(&self, table: &str, column: &str, index_type: IndexType) -> Result<usize> {
        self.indexes.rebuild_index(table, column, index_type, &mut |_, _| true)
    }

    /// Delete the entities of `table` whose TTL on `column` has passed.
    ///
    /// Removal goes through a [`Transaction`], so an expired edge leaves the
    /// topology and an expired vector entity leaves its vector index. An
    /// entity renewed after the expiry scan is kept; one renewed while the
    /// cleanup commits makes it fail with `Conflict`.
    pub fn cleanup_expired(&self, table: &str, column: &str) -> Result<usize> {
        let now = self.indexes.now();
        let expired = self.indexes.expired_keys_at(table, column, now)?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut txn = self.begin();
        let mut removed = 0;
        for pk in &expired {
            if !self.indexes.is_expired_in(txn.context(), table, column, pk, now)? {
                continue;
            }
            txn.erase_entity(table, pk)?;
            removed += 1;
        }
        txn.commit()?;
        info!(target: "mosaic::db", table, column, removed, "Removed expired entities");
        Ok(removed)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Primary keys whose `column` equals `value`
    pub fn scan_equal(&self, table: &str, column: &str, value: &FieldValue) -> Result<Vec<String>> {
        self.indexes.scan_equal(table, column, value)
    }

    /// Primary keys whose `column` lies in `query`
    pub fn scan_range(&self, table: &str, column: &str, query: &RangeQuery) -> Result<Vec<String>> {
        self.indexes.scan_range(table, column, query)
    }

    /// `(primary key, km)` within `radius_km` of `(lat, lon)`, nearest first
    pub fn scan_geo_radius(
        &self,
        table: &str,
        column: &str,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<Vec<(String, f64)>> {
        self.indexes.scan_geo_radius(table, column, lat, lon, radius_km)
    }

    /// BM25-ranked matches for `query`, best first
    pub fn scan_fulltext_with_scores(
        &self,
        table: &str,
        column: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        self.indexes.scan_fulltext_with_scores(table, column, query, limit)
    }

    /// Primary keys matching every predicate
    pub fn conjunctive_and(&self, table: &str, predicates: &[Predicate]) -> Result<Vec<String>> {
        self.indexes.conjunctive_and(table, predicates)
    }

    // ========================================================================
    // Graph
    // ========================================================================

    /// Add an edge entity (`_from`, `_to`, optional `_label`, `_weight`,
    /// `valid_from`, `valid_to`)
    pub fn add_edge(&self, edge: &BaseEntity) -> Result<u64> {
        let mut txn = self.begin();
        txn.add_edge(edge)?;
        txn.commit()
    }

    /// Remove an edge by id
    pub fn remove_edge(&self, edge_id: &str) -> Result<u64> {
        let mut txn = self.begin();
        txn.delete_edge(edge_id)?;
        txn.commit()
    }

    /// Vertices within `max_depth` hops of `start`, breadth-first
    pub fn bfs(&self, start: &str, max_depth: usize) -> Result<Vec<String>> {
        self.graph.bfs(start, max_depth)
    }

    /// Cheapest path by edge weight
    pub fn shortest_path(&self, start: &str, target: &str) -> Result<Option<PathResult>> {
        self.graph.shortest_path(start, target)
    }

    /// Breadth-first visit over the edges valid at `t`
    pub fn temporal_traverse(&self, start: &str, max_depth: usize, t: i64) -> Result<Vec<String>> {
        self.graph
            .bfs_filtered(start, max_depth, &EdgeFilter::at_time(t))
            .map(|found| found.into_iter().map(|(v, _)| v).collect())
    }

    // ========================================================================
    // Vectors
    // ========================================================================

    /// Create vector index `name` over the entities of table `name`, with
    /// the HNSW defaults from `mosaic.toml`
    pub fn create_vector_index(
        &self,
        name: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<Arc<VectorIndexManager>> {
        self.create_vector_index_with(name, self.config.vector.config(dimension, metric))
    }

    /// Create vector index `name` with an explicit configuration.
    ///
    /// An existing index of the same dimension and metric is returned as
    /// is. The new index is filled from stored entities and saved.
    pub fn create_vector_index_with(&self, name: &str, config: VectorConfig) -> Result<Arc<VectorIndexManager>> {
        if name == self.graph.edge_table() {
            return Err(Error::InvalidArgument(format!(
                "{} is the edge table and cannot hold a vector index",
                name
            )));
        }
        if let Some(existing) = self.vector_index(name) {
            let current = existing.config();
            if current.dimension == config.dimension && current.metric == config.metric {
                return Ok(existing);
            }
            return Err(Error::InvalidOperation(format!(
                "vector index {} exists as {}-dimensional {}",
                name, current.dimension, current.metric
            )));
        }

        let dir = self.vector_dir();
        std::fs::create_dir_all(&dir)?;
        let manager = VectorIndexManager::init(self.indexes.clone(), name, config, None)?;
        let count = manager.rebuild_from_storage()?;
        manager.save_index(&dir)?;
        let manager = Arc::new(manager);
        self.vectors.insert(name.to_string(), manager.clone());
        info!(target: "mosaic::db", index = name, vectors = count, "Vector index created");
        Ok(manager)
    }

    /// Vector index `name`, if one exists
    pub fn vector_index(&self, name: &str) -> Option<Arc<VectorIndexManager>> {
        self.vectors.get(name).map(|m| m.value().clone())
    }

    fn require_vector_index(&self, name: &str) -> Result<Arc<VectorIndexManager>> {
        self.vector_index(name)
            .ok_or_else(|| Error::IndexMisconfigured(format!("no vector index named {}", name)))
    }

    /// Names of all vector indexes, sorted
    pub fn vector_indexes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vectors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Forget vector index `name` and delete its file. Stored entities
    /// stay. Returns `false` if no such index existed.
    pub fn drop_vector_index(&self, name: &str) -> Result<bool> {
        if self.vectors.remove(name).is_none() {
            return Ok(false);
        }
        let path = mosaic_vector::index_path(&self.vector_dir(), name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(target: "mosaic::db", index = name, "Vector index dropped");
        Ok(true)
    }

    /// Rebuild vector index `name` from stored entities
    pub fn rebuild_vector_index(&self, name: &str) -> Result<usize> {
        self.require_vector_index(name)?.rebuild_from_storage()
    }

    /// `k` nearest entities of table `name` to `query`
    pub fn search_knn(&self, name: &str, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.require_vector_index(name)?.search_knn(query, k, None)
    }

    /// Statistics of every vector index, sorted by name
    pub fn vector_stats(&self) -> Vec<VectorStats> {
        let mut stats: Vec<VectorStats> = self.vectors.iter().map(|e| e.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Write every vector index to `<dir>/vectors`
    pub fn save_vector_indexes(&self) -> Result<()> {
        self.save_vector_indexes_to(&self.vector_dir())
    }

    fn save_vector_indexes_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for entry in self.vectors.iter() {
            entry.value().save_index(dir)?;
        }
        Ok(())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Flush memtables to SSTables
    pub fn flush(&self) -> Result<()> {
        self.engine().flush()
    }

    /// Merge all SSTables into one
    pub fn compact(&self) -> Result<()> {
        self.engine().compact()
    }

    /// Write a consistent copy of the database into `dest`; opening `dest`
    /// restores it.
    pub fn checkpoint<P: AsRef<Path>>(&self, dest: P) -> Result<()> {
        let dest = dest.as_ref();
        std::fs::create_dir_all(dest)?;
        self.engine().checkpoint(dest.join(DATA_DIR))?;
        self.save_vector_indexes_to(&dest.join(VECTOR_DIR))?;
        self.config.write_to_file(&dest.join(CONFIG_FILE_NAME))?;
        info!(target: "mosaic::db", dest = %dest.display(), "Database checkpoint written");
        Ok(())
    }

    /// Storage engine statistics
    pub fn storage_stats(&self) -> EngineStats {
        self.engine().stats()
    }

    /// Save vector indexes, flush and fsync. The database stays usable.
    pub fn close(&self) -> Result<()> {
        let active = self.txns.active_count();
        if active > 0 {
            warn!(target: "mosaic::db", active, "Closing with open transactions");
        }
        self.save_vector_indexes()?;
        self.engine().flush()?;
        self.engine().sync()?;
        info!(target: "mosaic::db", path = %self.dir.display(), "Database closed");
        Ok(())
    }
}
