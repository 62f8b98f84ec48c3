//! Transaction handles
//!
//! A [`Transaction`] wraps one engine transaction and routes every write
//! through the manager that owns it:
//!
//! | table | staged by |
//! |---|---|
//! | the graph edge table | `GraphIndexManager`, which also records a topology patch |
//! | a table with a vector index | `VectorIndexManager`, which also records a vector patch |
//! | anything else | `SecondaryIndexManager` |
//!
//! Nothing is visible to other readers until [`commit`](Transaction::commit).
//! The topology patch is applied in the same critical section as the engine
//! commit; vector patches are applied right after it, tagged with the commit
//! sequence. If commit fails, both patches are dropped.
//!
//! A staging step that fails aborts the whole handle. Every later call
//! returns `InvalidOperation`.

use crate::database::Database;
use mosaic_concurrency::TransactionContext;
use mosaic_core::{BaseEntity, Error, Result, Status};
use mosaic_graph::TopologyPatch;
use mosaic_vector::{VectorIndexManager, VectorPatch};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// One multi-model transaction; single-shot
pub struct Transaction<'db> {
    db: &'db Database,
    id: u64,
    txn: TransactionContext,
    topology: TopologyPatch,
    vectors: BTreeMap<String, VectorPatch>,
    failure: Option<String>,
    finished: bool,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("start_seq", &self.txn.start_seq())
            .field("writes", &self.txn.write_count())
            .field("finished", &self.finished)
            .finish()
    }
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        let id = db.transactions().record_begin();
        debug!(target: "mosaic::txn", txn_id = id, "Transaction started");
        Transaction {
            db,
            id,
            txn: TransactionContext::begin(db.engine()),
            topology: TopologyPatch::new(),
            vectors: BTreeMap::new(),
            failure: None,
            finished: false,
        }
    }

    /// Id unique within this database instance
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence of the snapshot this transaction reads
    pub fn start_seq(&self) -> u64 {
        self.txn.start_seq()
    }

    /// True until commit, rollback or a failed staging step
    pub fn is_active(&self) -> bool {
        !self.finished && self.txn.is_active()
    }

    /// Engine transaction underneath, for reads that must join the read set
    pub(crate) fn context(&self) -> &TransactionContext {
        &self.txn
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidOperation(match &self.failure {
                Some(reason) => format!("transaction {} was aborted: {}", self.id, reason),
                None => format!("transaction {} is finished", self.id),
            }));
        }
        Ok(())
    }

    /// Run a staging step; a failure aborts the handle
    fn stage<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Status,
    {
        self.ensure_open()?;
        let status = f(self);
        if let Err(e) = status.into_result() {
            let reason = e.to_string();
            warn!(target: "mosaic::txn", txn_id = self.id, error = %reason, "Staging failed, transaction aborted");
            self.txn.abort(reason.clone());
            self.failure = Some(reason);
            self.finished = true;
            self.db.transactions().record_abort(false);
            return Err(e);
        }
        Ok(())
    }

    fn vector_manager(&self, name: &str) -> Result<Arc<VectorIndexManager>> {
        self.db
            .vector_index(name)
            .ok_or_else(|| Error::IndexMisconfigured(format!("no vector index named {}", name)))
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Stage an entity write with its index maintenance
    pub fn put_entity(&mut self, table: &str, entity: &BaseEntity) -> Result<()> {
        if table == self.db.graph().edge_table() {
            return self.add_edge(entity);
        }
        match self.db.vector_index(table) {
            Some(vectors) => self.stage(|t| {
                let patch = t.vectors.entry(table.to_string()).or_default();
                vectors.put_entity_in(&mut t.txn, entity, patch)
            }),
            None => self.stage(|t| t.db.indexes().put_in(&mut t.txn, table, entity)),
        }
    }

    /// Stage an entity removal with its index maintenance. Removing an
    /// absent entity succeeds.
    pub fn erase_entity(&mut self, table: &str, pk: &str) -> Result<()> {
        if table == self.db.graph().edge_table() {
            return self.delete_edge(pk);
        }
        match self.db.vector_index(table) {
            Some(vectors) => self.stage(|t| {
                let patch = t.vectors.entry(table.to_string()).or_default();
                vectors.remove_by_pk_in(&mut t.txn, pk, patch)
            }),
            None => self.stage(|t| t.db.indexes().erase_in(&mut t.txn, table, pk)),
        }
    }

    /// Entity as this transaction sees it, staged writes included
    pub fn get_entity(&self, table: &str, pk: &str) -> Result<Option<BaseEntity>> {
        self.ensure_open()?;
        self.db.indexes().get_in(&self.txn, table, pk)
    }

    // ========================================================================
    // Graph
    // ========================================================================

    /// Stage an edge (entity with `_from` / `_to`)
    pub fn add_edge(&mut self, edge: &BaseEntity) -> Result<()> {
        self.stage(|t| t.db.graph().add_edge_in(&mut t.txn, edge, &mut t.topology))
    }

    /// Stage an edge removal
    pub fn delete_edge(&mut self, edge_id: &str) -> Result<()> {
        self.stage(|t| t.db.graph().delete_edge_in(&mut t.txn, edge_id, &mut t.topology))
    }

    // ========================================================================
    // Vectors
    // ========================================================================

    /// Stage an entity into vector index `index`; the entity must carry the
    /// index's vector field
    pub fn add_vector(&mut self, index: &str, entity: &BaseEntity) -> Result<()> {
        let vectors = self.vector_manager(index)?;
        self.stage(|t| {
            let patch = t.vectors.entry(index.to_string()).or_default();
            vectors.add_entity_in(&mut t.txn, entity, patch)
        })
    }

    /// Like [`add_vector`](Self::add_vector), but the entity must already
    /// exist
    pub fn update_vector(&mut self, index: &str, entity: &BaseEntity) -> Result<()> {
        let vectors = self.vector_manager(index)?;
        self.stage(|t| {
            match t.db.indexes().get_in(&t.txn, index, entity.primary_key()) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Error::NotFound(format!("{} in vector index {}", entity.primary_key(), index)).into()
                }
                Err(e) => return e.into(),
            }
            let patch = t.vectors.entry(index.to_string()).or_default();
            vectors.add_entity_in(&mut t.txn, entity, patch)
        })
    }

    /// Stage removal of an entity from vector index `index`
    pub fn remove_vector(&mut self, index: &str, pk: &str) -> Result<()> {
        let vectors = self.vector_manager(index)?;
        self.stage(|t| {
            let patch = t.vectors.entry(index.to_string()).or_default();
            vectors.remove_by_pk_in(&mut t.txn, pk, patch)
        })
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Commit everything staged; returns the commit sequence.
    ///
    /// On `Conflict` nothing is applied and the caller may retry with a
    /// fresh transaction.
    pub fn commit(mut self) -> Result<u64> {
        self.ensure_open()?;
        self.finished = true;
        let started = Instant::now();
        let topology = std::mem::take(&mut self.topology);
        let seq = match self.db.graph().commit_with_patch(&mut self.txn, topology) {
            Ok(seq) => seq,
            Err(e) => {
                let conflict = e.is_conflict();
                self.db.transactions().record_abort(conflict);
                if conflict {
                    debug!(target: "mosaic::txn", txn_id = self.id, error = %e, "Commit conflict");
                } else {
                    warn!(target: "mosaic::txn", txn_id = self.id, error = %e, "Commit failed");
                }
                return Err(e);
            }
        };

        // Durable from here on; a failed vector apply leaves storage intact
        // and the index can be rebuilt from it
        let mut first_error = None;
        for (name, patch) in std::mem::take(&mut self.vectors) {
            let Some(vectors) = self.db.vector_index(&name) else {
                continue;
            };
            if let Err(e) = vectors.apply_committed(&patch, seq) {
                error!(target: "mosaic::txn", txn_id = self.id, index = %name, seq, error = %e, "Vector apply failed after commit");
                first_error.get_or_insert(e);
            }
        }
        self.db.transactions().record_commit(started.elapsed());
        debug!(target: "mosaic::txn", txn_id = self.id, seq, "Transaction committed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(seq),
        }
    }

    /// Discard everything staged
    pub fn rollback(mut self) {
        self.finish_rollback();
    }

    fn finish_rollback(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.txn.rollback();
        self.db.transactions().record_abort(false);
        debug!(target: "mosaic::txn", txn_id = self.id, "Transaction rolled back");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.finish_rollback();
    }
}
