//! Graph index manager
//!
//! Edge writes stage the edge entity (through the secondary index manager,
//! so indexes on the edge table stay current) plus both adjacency keys, and
//! record a [`TopologyPatch`]. The patch reaches the cache inside the same
//! critical section as the engine commit, and only if the commit succeeds.

use crate::edge::{all_out_prefix, in_key, in_time_range, out_key, Edge};
use crate::topology::{Adjacency, Topology, TopologyPatch};
use crate::traversal::{self, EdgeFilter, PathResult};
use mosaic_concurrency::TransactionContext;
use mosaic_core::key::{split, validate_table_name};
use mosaic_core::{BaseEntity, Error, Result, Status};
use mosaic_index::SecondaryIndexManager;
use mosaic_storage::{KvRead, KvStage, LsmEngine};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// An edge with its validity interval, as returned by time-range queries
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInfo {
    /// Edge id
    pub edge_id: String,
    /// Source vertex
    pub from: String,
    /// Target vertex
    pub to: String,
    /// Validity start (inclusive, epoch ms)
    pub valid_from: Option<i64>,
    /// Validity end (inclusive, epoch ms)
    pub valid_to: Option<i64>,
}

/// Adjacency projections and traversals over the edge table
pub struct GraphIndexManager {
    indexes: Arc<SecondaryIndexManager>,
    edge_table: String,
    topology: RwLock<Topology>,
}

impl std::fmt::Debug for GraphIndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphIndexManager")
            .field("edge_table", &self.edge_table)
            .field("loaded", &self.topology.read().loaded)
            .finish()
    }
}

impl GraphIndexManager {
    /// Manager for edges stored in `edge_table`.
    ///
    /// The topology cache is filled on first use.
    pub fn new(indexes: Arc<SecondaryIndexManager>, edge_table: impl Into<String>) -> Result<Self> {
        let edge_table = edge_table.into();
        validate_table_name(&edge_table)?;
        Ok(GraphIndexManager {
            indexes,
            edge_table,
            topology: RwLock::new(Topology::default()),
        })
    }

    /// Table holding the edge entities
    pub fn edge_table(&self) -> &str {
        &self.edge_table
    }

    fn engine(&self) -> &LsmEngine {
        self.indexes.engine()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Add (or replace) the edge described by `entity` in a transaction of
    /// its own
    pub fn add_edge(&self, entity: &BaseEntity) -> Status {
        self.in_transaction(|txn, patch| self.stage_add(txn, entity, patch)).into()
    }

    /// Remove an edge in a transaction of its own. Removing an absent edge
    /// succeeds.
    pub fn delete_edge(&self, edge_id: &str) -> Status {
        self.in_transaction(|txn, patch| self.stage_delete(txn, edge_id, patch)).into()
    }

    /// Stage an edge into `stage`, recording the cache change in `patch`
    pub fn add_edge_in<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        entity: &BaseEntity,
        patch: &mut TopologyPatch,
    ) -> Status {
        self.stage_add(stage, entity, patch).into()
    }

    /// Stage an edge removal into `stage`, recording the cache change in
    /// `patch`
    pub fn delete_edge_in<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        edge_id: &str,
        patch: &mut TopologyPatch,
    ) -> Status {
        self.stage_delete(stage, edge_id, patch).into()
    }

    /// Commit `txn` and, if it succeeds, apply `patch` to the topology cache
    /// while no reader can observe the cache between the two.
    ///
    /// On failure (including `Conflict`) the patch is discarded.
    pub fn commit_with_patch(&self, txn: &mut TransactionContext, patch: TopologyPatch) -> Result<u64> {
        if patch.is_empty() {
            return txn.commit();
        }
        let seq = {
            let mut topology = self.topology.write();
            let seq = txn.commit_deferred()?;
            if topology.loaded {
                patch.apply(&mut topology);
            }
            seq
        };
        // Maintenance runs once the cache lock is released
        self.engine().run_pending_maintenance();
        Ok(seq)
    }

    fn in_transaction<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut TransactionContext, &mut TopologyPatch) -> Result<()>,
    {
        let mut txn = TransactionContext::begin(self.engine());
        let mut patch = TopologyPatch::new();
        if let Err(e) = f(&mut txn, &mut patch) {
            txn.abort(e.to_string());
            return Err(e);
        }
        self.commit_with_patch(&mut txn, patch).map(|_| ())
    }

    fn stage_add<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        entity: &BaseEntity,
        patch: &mut TopologyPatch,
    ) -> Result<()> {
        let edge = Edge::from_entity(entity)?;
        if let Some(old) = self.stored_edge(&*stage, &edge.id)? {
            stage.delete(&out_key(&old.from, &old.id))?;
            stage.delete(&in_key(&old.to, &old.id))?;
        }
        self.indexes
            .put_in(stage, &self.edge_table, entity)
            .into_result()?;
        stage.put(&out_key(&edge.from, &edge.id), edge.to.as_bytes().to_vec())?;
        stage.put(&in_key(&edge.to, &edge.id), edge.from.as_bytes().to_vec())?;
        debug!(target: "mosaic::graph", edge = %edge.id, from = %edge.from, to = %edge.to, "Staged edge");
        patch.add(edge);
        Ok(())
    }

    fn stage_delete<S: KvStage + ?Sized>(
        &self,
        stage: &mut S,
        edge_id: &str,
        patch: &mut TopologyPatch,
    ) -> Result<()> {
        if edge_id.is_empty() {
            return Err(Error::InvalidArgument("edge id must not be empty".into()));
        }
        let Some(old) = self.stored_edge(&*stage, edge_id)? else {
            return Ok(());
        };
        stage.delete(&out_key(&old.from, &old.id))?;
        stage.delete(&in_key(&old.to, &old.id))?;
        self.indexes
            .erase_in(stage, &self.edge_table, edge_id)
            .into_result()?;
        patch.remove(edge_id);
        Ok(())
    }

    fn stored_edge<R: KvRead + ?Sized>(&self, view: &R, edge_id: &str) -> Result<Option<Edge>> {
        match self.indexes.get_in(view, &self.edge_table, edge_id)? {
            Some(entity) => Ok(Some(Edge::from_entity(&entity)?)),
            None => Ok(None),
        }
    }

    /// Latest committed edge
    pub fn get_edge(&self, edge_id: &str) -> Result<Option<Edge>> {
        self.stored_edge(self.engine(), edge_id)
    }

    // ========================================================================
    // Topology cache
    // ========================================================================

    /// Reload the topology cache from the persisted adjacency keys
    pub fn rebuild_topology(&self) -> Result<()> {
        let mut topology = self.topology.write();
        self.load_into(&mut topology)
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.topology.read().loaded {
            return Ok(());
        }
        let mut topology = self.topology.write();
        if !topology.loaded {
            self.load_into(&mut topology)?;
        }
        Ok(())
    }

    fn load_into(&self, topology: &mut Topology) -> Result<()> {
        let started = Instant::now();
        topology.clear();
        let view = self.engine().snapshot();
        let mut adjacency: Vec<(String, Vec<u8>)> = Vec::new();
        view.scan_prefix(&all_out_prefix(), &mut |key, value| {
            adjacency.push((key.to_string(), value.to_vec()));
            true
        })?;

        for (key, value) in adjacency {
            let parts = split(&key)?;
            let [_, _, from, edge_id] = parts.as_slice() else {
                return Err(Error::Corrupt(format!("malformed adjacency key {:?}", key)));
            };
            let to = String::from_utf8(value)
                .map_err(|_| Error::Corrupt(format!("adjacency {:?} is not UTF-8", key)))?;
            let mut edge = match self.stored_edge(&view, edge_id)? {
                Some(edge) => edge,
                None => Edge::new(edge_id.clone(), from.clone(), to.clone()),
            };
            edge.from = from.clone();
            edge.to = to;
            topology.insert(&edge);
        }
        topology.loaded = true;
        info!(
            target: "mosaic::graph",
            edges = topology.edge_count(),
            nodes = topology.node_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Loaded graph topology"
        );
        Ok(())
    }

    /// Outgoing edges of `vertex`, copied out of the cache
    pub fn out_adjacency(&self, vertex: &str) -> Result<Vec<Adjacency>> {
        self.ensure_loaded()?;
        Ok(self.topology.read().out_of(vertex))
    }

    /// Incoming edges of `vertex`; `neighbor` is the source vertex
    pub fn in_adjacency(&self, vertex: &str) -> Result<Vec<Adjacency>> {
        self.ensure_loaded()?;
        Ok(self.topology.read().in_of(vertex))
    }

    /// Targets of `vertex`'s outgoing edges
    pub fn out_neighbors(&self, vertex: &str) -> Result<Vec<String>> {
        Ok(self.out_adjacency(vertex)?.into_iter().map(|a| a.neighbor).collect())
    }

    /// Sources of `vertex`'s incoming edges
    pub fn in_neighbors(&self, vertex: &str) -> Result<Vec<String>> {
        Ok(self.in_adjacency(vertex)?.into_iter().map(|a| a.neighbor).collect())
    }

    /// Vertices with at least one edge
    pub fn node_count(&self) -> Result<usize> {
        self.ensure_loaded()?;
        Ok(self.topology.read().node_count())
    }

    /// Number of edges
    pub fn edge_count(&self) -> Result<usize> {
        self.ensure_loaded()?;
        Ok(self.topology.read().edge_count())
    }

    // ========================================================================
    // Traversals
    // ========================================================================

    fn filtered_out(&self, filter: &EdgeFilter) -> impl FnMut(&str) -> Result<Vec<Adjacency>> + '_ {
        let filter = filter.clone();
        move |vertex: &str| {
            let mut adj = self.out_adjacency(vertex)?;
            adj.retain(|a| filter.allows(a));
            Ok(adj)
        }
    }

    /// Vertices reachable from `start` within `max_depth` hops, in
    /// breadth-first order; `start` comes first
    pub fn bfs(&self, start: &str, max_depth: usize) -> Result<Vec<String>> {
        Ok(self
            .bfs_filtered(start, max_depth, &EdgeFilter::any())?
            .into_iter()
            .map(|(v, _)| v)
            .collect())
    }

    /// Like [`bfs`](Self::bfs) with the hop distance of each vertex
    pub fn bfs_with_depth(&self, start: &str, max_depth: usize) -> Result<Vec<(String, usize)>> {
        self.bfs_filtered(start, max_depth, &EdgeFilter::any())
    }

    /// Breadth-first visit over edges valid at `t`
    pub fn bfs_at_time(&self, start: &str, max_depth: usize, t: i64) -> Result<Vec<String>> {
        Ok(self
            .bfs_filtered(start, max_depth, &EdgeFilter::at_time(t))?
            .into_iter()
            .map(|(v, _)| v)
            .collect())
    }

    /// Breadth-first visit over the edges `filter` allows
    pub fn bfs_filtered(
        &self,
        start: &str,
        max_depth: usize,
        filter: &EdgeFilter,
    ) -> Result<Vec<(String, usize)>> {
        check_vertex(start)?;
        traversal::bfs(start, max_depth, &mut self.filtered_out(filter))
    }

    /// Cheapest path by edge weight (Dijkstra); `None` if unreachable
    pub fn shortest_path(&self, start: &str, target: &str) -> Result<Option<PathResult>> {
        self.shortest_path_filtered(start, target, &EdgeFilter::any())
    }

    /// Cheapest path over edges valid at `t`
    pub fn shortest_path_at_time(&self, start: &str, target: &str, t: i64) -> Result<Option<PathResult>> {
        self.shortest_path_filtered(start, target, &EdgeFilter::at_time(t))
    }

    /// Cheapest path over the edges `filter` allows
    pub fn shortest_path_filtered(
        &self,
        start: &str,
        target: &str,
        filter: &EdgeFilter,
    ) -> Result<Option<PathResult>> {
        check_vertex(start)?;
        check_vertex(target)?;
        traversal::cheapest_path(start, target, &mut self.filtered_out(filter), &|_| 0.0)
    }

    /// A* search guided by `heuristic`, an estimate of the remaining cost to
    /// `target`. Negative or non-finite estimates count as zero; an estimate
    /// above the true cost may yield a more expensive path.
    pub fn a_star(
        &self,
        start: &str,
        target: &str,
        heuristic: &dyn Fn(&str) -> f64,
    ) -> Result<Option<PathResult>> {
        check_vertex(start)?;
        check_vertex(target)?;
        traversal::cheapest_path(start, target, &mut self.filtered_out(&EdgeFilter::any()), heuristic)
    }

    // ========================================================================
    // Temporal queries
    // ========================================================================

    /// Edges whose validity overlaps `[start, end]`, or lies within it when
    /// `require_full_containment` is set. Ordered by edge id.
    pub fn edges_in_time_range(
        &self,
        start: i64,
        end: i64,
        require_full_containment: bool,
    ) -> Result<Vec<EdgeInfo>> {
        check_range(start, end)?;
        self.ensure_loaded()?;
        let mut found: Vec<EdgeInfo> = {
            let topology = self.topology.read();
            topology
                .edges()
                .filter(|(_, adj)| {
                    in_time_range(adj.valid_from, adj.valid_to, start, end, require_full_containment)
                })
                .map(|(from, adj)| edge_info(from, adj))
                .collect()
        };
        found.sort_by(|a, b| a.edge_id.cmp(&b.edge_id));
        Ok(found)
    }

    /// Outgoing edges of `vertex` matching the time range, ordered by
    /// neighbor then edge id
    pub fn out_edges_in_time_range(
        &self,
        vertex: &str,
        start: i64,
        end: i64,
        require_full_containment: bool,
    ) -> Result<Vec<EdgeInfo>> {
        check_range(start, end)?;
        Ok(self
            .out_adjacency(vertex)?
            .iter()
            .filter(|adj| in_time_range(adj.valid_from, adj.valid_to, start, end, require_full_containment))
            .map(|adj| edge_info(vertex, adj))
            .collect())
    }
}

fn edge_info(from: &str, adj: &Adjacency) -> EdgeInfo {
    EdgeInfo {
        edge_id: adj.edge_id.clone(),
        from: from.to_string(),
        to: adj.neighbor.clone(),
        valid_from: adj.valid_from,
        valid_to: adj.valid_to,
    }
}

fn check_vertex(vertex: &str) -> Result<()> {
    if vertex.is_empty() {
        return Err(Error::InvalidArgument("vertex id must not be empty".into()));
    }
    Ok(())
}

fn check_range(start: i64, end: i64) -> Result<()> {
    if start > end {
        return Err(Error::InvalidArgument(format!(
            "time range start {} is after end {}",
            start, end
        )));
    }
    Ok(())
}
