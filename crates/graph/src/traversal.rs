//! Traversal algorithms over an adjacency lookup
//!
//! The algorithms only see a `next(vertex)` callback returning the
//! vertex's outgoing edges, which keeps them independent of where the
//! adjacency comes from and lets the manager copy one vertex's list at a
//! time instead of holding the topology lock for a whole traversal.

use crate::topology::Adjacency;
use mosaic_core::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

/// Adjacency lookup used by the traversals
pub type NextFn<'a> = dyn FnMut(&str) -> Result<Vec<Adjacency>> + 'a;

/// Which edges a traversal may follow
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeFilter {
    /// Only edges with this label
    pub label: Option<String>,
    /// Only edges valid at this instant (epoch ms)
    pub at_time: Option<i64>,
}

impl EdgeFilter {
    /// Follow every edge
    pub fn any() -> Self {
        Self::default()
    }

    /// Follow edges labelled `label`
    pub fn label(label: impl Into<String>) -> Self {
        EdgeFilter {
            label: Some(label.into()),
            at_time: None,
        }
    }

    /// Follow edges valid at `t`
    pub fn at_time(t: i64) -> Self {
        EdgeFilter {
            label: None,
            at_time: Some(t),
        }
    }

    /// Whether the traversal may follow `adj`
    pub fn allows(&self, adj: &Adjacency) -> bool {
        if let Some(label) = &self.label {
            if adj.label.as_deref() != Some(label.as_str()) {
                return false;
            }
        }
        self.at_time.map_or(true, |t| adj.valid_at(t))
    }
}

/// A weighted path between two vertices
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    /// Vertices from start to target
    pub path: Vec<String>,
    /// Edge ids between consecutive vertices
    pub edges: Vec<String>,
    /// Sum of the edge weights
    pub total_cost: f64,
}

/// Breadth-first visit from `start` up to `max_depth` hops.
///
/// Returns each reached vertex once with its hop distance, in visitation
/// order. Neighbors of a vertex are visited in id order.
pub fn bfs(start: &str, max_depth: usize, next: &mut NextFn<'_>) -> Result<Vec<(String, usize)>> {
    let mut order = Vec::new();
    let mut visited: FxHashSet<String> = FxHashSet::default();
    let mut queue = VecDeque::new();
    visited.insert(start.to_string());
    queue.push_back((start.to_string(), 0usize));

    while let Some((vertex, depth)) = queue.pop_front() {
        if depth < max_depth {
            for adj in next(&vertex)? {
                if visited.insert(adj.neighbor.clone()) {
                    queue.push_back((adj.neighbor, depth + 1));
                }
            }
        }
        order.push((vertex, depth));
    }
    Ok(order)
}

#[derive(Debug)]
struct SearchEntry {
    priority: f64,
    cost: f64,
    vertex: String,
}

impl PartialEq for SearchEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchEntry {}

impl PartialOrd for SearchEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: lower priority, then lower id, pops first
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

/// Cheapest path from `start` to `target`.
///
/// `heuristic` estimates the remaining cost to `target`; a zero heuristic
/// gives Dijkstra, an admissible one gives A*. Among equally cheap routes
/// to a vertex the one through the lower predecessor id wins, so results
/// are reproducible. Returns `None` when `target` is unreachable.
pub fn cheapest_path(
    start: &str,
    target: &str,
    next: &mut NextFn<'_>,
    heuristic: &dyn Fn(&str) -> f64,
) -> Result<Option<PathResult>> {
    let estimate = |v: &str| {
        let h = heuristic(v);
        if h.is_finite() && h > 0.0 {
            h
        } else {
            0.0
        }
    };

    let mut cost: FxHashMap<String, f64> = FxHashMap::default();
    let mut came_from: FxHashMap<String, (String, String)> = FxHashMap::default();
    let mut settled: FxHashSet<String> = FxHashSet::default();
    let mut heap = BinaryHeap::new();

    cost.insert(start.to_string(), 0.0);
    heap.push(SearchEntry {
        priority: estimate(start),
        cost: 0.0,
        vertex: start.to_string(),
    });

    while let Some(SearchEntry { cost: g, vertex, .. }) = heap.pop() {
        if !settled.insert(vertex.clone()) {
            continue;
        }
        if vertex == target {
            return Ok(Some(reconstruct(start, target, g, &came_from)));
        }
        for adj in next(&vertex)? {
            if adj.weight.is_nan() || adj.weight < 0.0 {
                return Err(Error::Corrupt(format!(
                    "edge {:?} has invalid weight {}",
                    adj.edge_id, adj.weight
                )));
            }
            if settled.contains(&adj.neighbor) {
                continue;
            }
            let candidate = g + adj.weight;
            let improves = match cost.get(&adj.neighbor) {
                None => true,
                Some(&known) if candidate < known => true,
                Some(&known) => {
                    // Same cost through a lower predecessor id
                    if candidate == known {
                        if let Some((pred, _)) = came_from.get(&adj.neighbor) {
                            if vertex < *pred {
                                came_from.insert(adj.neighbor.clone(), (vertex.clone(), adj.edge_id.clone()));
                            }
                        }
                    }
                    false
                }
            };
            if improves {
                cost.insert(adj.neighbor.clone(), candidate);
                came_from.insert(adj.neighbor.clone(), (vertex.clone(), adj.edge_id.clone()));
                heap.push(SearchEntry {
                    priority: candidate + estimate(&adj.neighbor),
                    cost: candidate,
                    vertex: adj.neighbor,
                });
            }
        }
    }
    Ok(None)
}

fn reconstruct(
    start: &str,
    target: &str,
    total_cost: f64,
    came_from: &FxHashMap<String, (String, String)>,
) -> PathResult {
    let mut path = vec![target.to_string()];
    let mut edges = Vec::new();
    let mut current = target;
    while current != start {
        match came_from.get(current) {
            Some((pred, edge)) => {
                edges.push(edge.clone());
                path.push(pred.clone());
                current = pred.as_str();
            }
            None => break,
        }
    }
    path.reverse();
    edges.reverse();
    PathResult {
        path,
        edges,
        total_cost,
    }
}
