//! In-memory state of one vector index
//!
//! Maps primary keys to internal ids and keeps the embedding heap and HNSW
//! graph together. Every mutation carries the commit sequence that produced
//! it; a mutation older than the last one applied to the same key, or not
//! newer than the snapshot the index was last rebuilt from, is ignored. This
//! lets post-commit application arrive out of order.

use crate::config::{Metric, VectorConfig};
use crate::distance::{distance, normalize};
use crate::heap::{VectorHeap, VectorId};
use crate::hnsw::HnswGraph;
use mosaic_core::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// One staged vector mutation
#[derive(Debug, Clone, PartialEq)]
pub enum VectorOp {
    /// Insert or replace the vector of a key
    Upsert {
        /// Primary key
        pk: String,
        /// New vector, not yet normalized
        vector: Vec<f32>,
    },
    /// Tombstone the vector of a key
    Remove {
        /// Primary key
        pk: String,
    },
}

impl VectorOp {
    /// Primary key the op touches
    pub fn pk(&self) -> &str {
        match self {
            VectorOp::Upsert { pk, .. } | VectorOp::Remove { pk } => pk,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct VectorIndex {
    pub(crate) config: VectorConfig,
    pub(crate) heap: VectorHeap,
    pub(crate) graph: HnswGraph,
    pub(crate) pk_to_id: BTreeMap<String, VectorId>,
    pub(crate) id_to_pk: BTreeMap<VectorId, String>,
    pub(crate) next_id: u64,
    applied: BTreeMap<String, u64>,
    applied_floor: u64,
}

impl VectorIndex {
    pub(crate) fn new(config: VectorConfig) -> Self {
        VectorIndex {
            heap: VectorHeap::new(config.dimension),
            graph: HnswGraph::new(&config),
            config,
            pk_to_id: BTreeMap::new(),
            id_to_pk: BTreeMap::new(),
            next_id: 1,
            applied: BTreeMap::new(),
            applied_floor: 0,
        }
    }

    /// Check a vector against the index shape without touching state
    pub(crate) fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(Error::InvalidArgument(format!(
                "vector has {} components, index expects {}",
                vector.len(),
                self.config.dimension
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidArgument("vector components must be finite".into()));
        }
        Ok(())
    }

    fn prepare(&self, vector: &[f32]) -> Result<Vec<f32>> {
        self.check_vector(vector)?;
        let mut v = vector.to_vec();
        if self.config.metric == Metric::Cosine {
            normalize(&mut v);
        }
        Ok(v)
    }

    /// Apply `op` as of commit `seq`; returns false if a newer op for the
    /// same key was already applied
    pub(crate) fn apply(&mut self, op: &VectorOp, seq: u64) -> Result<bool> {
        if seq <= self.applied_floor {
            return Ok(false);
        }
        if let Some(&last) = self.applied.get(op.pk()) {
            if last > seq {
                return Ok(false);
            }
        }
        match op {
            VectorOp::Upsert { pk, vector } => self.upsert(pk, vector)?,
            VectorOp::Remove { pk } => {
                self.remove(pk);
            }
        }
        self.applied.insert(op.pk().to_string(), seq);
        Ok(true)
    }

    /// Index `vector` under `pk`. An update tombstones the old node and links
    /// a fresh one, so the old node stays routable until the next rebuild.
    pub(crate) fn upsert(&mut self, pk: &str, vector: &[f32]) -> Result<()> {
        let v = self.prepare(vector)?;
        let id = VectorId(self.next_id);
        self.heap.upsert(id, &v)?;
        self.next_id += 1;
        if let Some(old) = self.pk_to_id.remove(pk) {
            self.id_to_pk.remove(&old);
            self.graph.mark_deleted(old);
        }
        self.graph.insert(id, &self.heap);
        self.pk_to_id.insert(pk.to_string(), id);
        self.id_to_pk.insert(id, pk.to_string());
        Ok(())
    }

    /// Tombstone the vector of `pk`; returns whether it was indexed
    pub(crate) fn remove(&mut self, pk: &str) -> bool {
        let Some(id) = self.pk_to_id.remove(pk) else {
            return false;
        };
        self.id_to_pk.remove(&id);
        self.graph.mark_deleted(id)
    }

    pub(crate) fn contains(&self, pk: &str) -> bool {
        self.pk_to_id.contains_key(pk)
    }

    pub(crate) fn vector_of(&self, pk: &str) -> Option<&[f32]> {
        self.pk_to_id.get(pk).and_then(|id| self.heap.get(*id))
    }

    /// Nearest `k` keys to `query`, ascending by distance.
    ///
    /// With a whitelist the candidates are exactly the listed keys, scored
    /// exhaustively.
    pub(crate) fn search(&self, query: &[f32], k: usize, whitelist: Option<&[String]>) -> Result<Vec<(String, f32)>> {
        let q = self.prepare(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let hits: Vec<(VectorId, f32)> = match whitelist {
            None => self.graph.search(&q, k, &self.heap),
            Some(keys) => {
                let allowed: BTreeSet<VectorId> =
                    keys.iter().filter_map(|pk| self.pk_to_id.get(pk).copied()).collect();
                let mut scored: Vec<(VectorId, f32)> = allowed
                    .into_iter()
                    .filter_map(|id| self.heap.get(id).map(|v| (id, distance(&q, v, self.config.metric))))
                    .collect();
                scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                scored.truncate(k);
                scored
            }
        };
        Ok(hits
            .into_iter()
            .filter_map(|(id, d)| self.id_to_pk.get(&id).map(|pk| (pk.clone(), d)))
            .collect())
    }

    pub(crate) fn live(&self) -> usize {
        self.pk_to_id.len()
    }

    pub(crate) fn tombstones(&self) -> usize {
        self.graph.tombstones()
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.heap.memory_usage()
            + self.graph.memory_usage()
            + self.pk_to_id.keys().map(|pk| pk.len() * 2 + 48).sum::<usize>()
    }

    /// Ignore every op committed at or before `seq`
    pub(crate) fn set_applied_floor(&mut self, seq: u64) {
        self.applied_floor = seq;
    }

    /// Restore a loaded key table with no applied history
    pub(crate) fn restore(
        config: VectorConfig,
        heap: VectorHeap,
        graph: HnswGraph,
        keys: BTreeMap<String, VectorId>,
        next_id: u64,
    ) -> Self {
        let id_to_pk = keys.iter().map(|(pk, id)| (*id, pk.clone())).collect();
        VectorIndex {
            config,
            heap,
            graph,
            pk_to_id: keys,
            id_to_pk,
            next_id,
            applied: BTreeMap::new(),
            applied_floor: 0,
        }
    }
}
