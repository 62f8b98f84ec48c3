//! In-memory adjacency cache
//!
//! Vertices are plain ids mapped to their edge lists in both directions;
//! neighbors are looked up by id, so the cache holds no references between
//! entries. A `TopologyPatch` records the changes a transaction stages and
//! is applied only once that transaction has committed.

use crate::edge::{valid_at, Edge};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// One edge as seen from one of its endpoints
#[derive(Debug, Clone, PartialEq)]
pub struct Adjacency {
    /// Edge id
    pub edge_id: String,
    /// Vertex at the other end
    pub neighbor: String,
    /// Traversal cost
    pub weight: f64,
    /// Edge label
    pub label: Option<String>,
    /// Validity start (inclusive, epoch ms)
    pub valid_from: Option<i64>,
    /// Validity end (inclusive, epoch ms)
    pub valid_to: Option<i64>,
}

impl Adjacency {
    fn toward(edge: &Edge, neighbor: &str) -> Self {
        Adjacency {
            edge_id: edge.id.clone(),
            neighbor: neighbor.to_string(),
            weight: edge.weight,
            label: edge.label.clone(),
            valid_from: edge.valid_from,
            valid_to: edge.valid_to,
        }
    }

    /// Whether the edge exists at `t`
    pub fn valid_at(&self, t: i64) -> bool {
        valid_at(self.valid_from, self.valid_to, t)
    }
}

type AdjList = SmallVec<[Adjacency; 4]>;

/// Adjacency maps for both directions plus an edge id index
#[derive(Debug, Default)]
pub(crate) struct Topology {
    out: FxHashMap<String, AdjList>,
    inc: FxHashMap<String, AdjList>,
    endpoints: FxHashMap<String, (String, String)>,
    pub(crate) loaded: bool,
}

impl Topology {
    pub(crate) fn clear(&mut self) {
        self.out.clear();
        self.inc.clear();
        self.endpoints.clear();
        self.loaded = false;
    }

    /// Add `edge`, replacing an edge with the same id
    pub(crate) fn insert(&mut self, edge: &Edge) {
        self.remove(&edge.id);
        self.out
            .entry(edge.from.clone())
            .or_default()
            .push(Adjacency::toward(edge, &edge.to));
        self.inc
            .entry(edge.to.clone())
            .or_default()
            .push(Adjacency::toward(edge, &edge.from));
        self.endpoints
            .insert(edge.id.clone(), (edge.from.clone(), edge.to.clone()));
    }

    pub(crate) fn remove(&mut self, edge_id: &str) {
        let Some((from, to)) = self.endpoints.remove(edge_id) else {
            return;
        };
        detach(&mut self.out, &from, edge_id);
        detach(&mut self.inc, &to, edge_id);
    }

    /// Outgoing edges of `vertex`, ordered by neighbor then edge id
    pub(crate) fn out_of(&self, vertex: &str) -> Vec<Adjacency> {
        sorted(self.out.get(vertex))
    }

    /// Incoming edges of `vertex`, ordered by neighbor then edge id
    pub(crate) fn in_of(&self, vertex: &str) -> Vec<Adjacency> {
        sorted(self.inc.get(vertex))
    }

    /// Vertices with at least one edge
    pub(crate) fn node_count(&self) -> usize {
        let vertices: FxHashSet<&str> = self
            .out
            .keys()
            .chain(self.inc.keys())
            .map(String::as_str)
            .collect();
        vertices.len()
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Every edge as `(from, adjacency toward to)`
    pub(crate) fn edges(&self) -> impl Iterator<Item = (&str, &Adjacency)> {
        self.out
            .iter()
            .flat_map(|(from, list)| list.iter().map(move |adj| (from.as_str(), adj)))
    }
}

fn detach(map: &mut FxHashMap<String, AdjList>, vertex: &str, edge_id: &str) {
    if let Some(list) = map.get_mut(vertex) {
        list.retain(|adj| adj.edge_id != edge_id);
        if list.is_empty() {
            map.remove(vertex);
        }
    }
}

fn sorted(list: Option<&AdjList>) -> Vec<Adjacency> {
    let mut out: Vec<Adjacency> = list.map(|l| l.to_vec()).unwrap_or_default();
    out.sort_by(|a, b| a.neighbor.cmp(&b.neighbor).then_with(|| a.edge_id.cmp(&b.edge_id)));
    out
}

#[derive(Debug, Clone, PartialEq)]
enum PatchOp {
    Add(Edge),
    Remove(String),
}

/// Topology changes staged by one transaction, in staging order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyPatch {
    ops: Vec<PatchOp>,
}

impl TopologyPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an added (or replaced) edge
    pub fn add(&mut self, edge: Edge) {
        self.ops.push(PatchOp::Add(edge));
    }

    /// Record a removed edge
    pub fn remove(&mut self, edge_id: impl Into<String>) {
        self.ops.push(PatchOp::Remove(edge_id.into()));
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of recorded changes
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Append another patch's changes after this one's
    pub fn extend(&mut self, other: TopologyPatch) {
        self.ops.extend(other.ops);
    }

    pub(crate) fn apply(self, topology: &mut Topology) {
        for op in self.ops {
            match op {
                PatchOp::Add(edge) => topology.insert(&edge),
                PatchOp::Remove(edge_id) => topology.remove(&edge_id),
            }
        }
    }
}
