//! HNSW (Hierarchical Navigable Small World) graph
//!
//! Layer 0 holds every node with up to `2 * m` links; higher layers hold a
//! geometrically shrinking subset with up to `m` links. A search descends
//! greedily from the top layer and runs a beam search of width `ef` on
//! layer 0.
//!
//! Results are deterministic for a given insert sequence: levels come from
//! a seeded counter-based generator, nodes and neighbor lists are ordered
//! maps, and ties break on the lower `VectorId`.
//!
//! Removal is a tombstone. Tombstoned nodes keep their links and vectors so
//! searches can route through them, but never appear in results.

use crate::config::{Metric, VectorConfig};
use crate::distance::distance;
use crate::heap::{VectorHeap, VectorId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use mosaic_core::{Error, Result};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::io::{Read, Write};

const RNG_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq)]
struct HnswNode {
    /// `neighbors[layer]`, sorted for deterministic iteration
    neighbors: Vec<BTreeSet<VectorId>>,
    deleted: bool,
}

impl HnswNode {
    fn new(max_layer: usize) -> Self {
        HnswNode {
            neighbors: (0..=max_layer).map(|_| BTreeSet::new()).collect(),
            deleted: false,
        }
    }

    fn max_layer(&self) -> usize {
        self.neighbors.len().saturating_sub(1)
    }
}

/// Candidate during search; nearer (then lower id) compares greater
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    id: VectorId,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap<Candidate> pops the nearest first,
        // BinaryHeap<Reverse<Candidate>> pops the farthest first
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.id.cmp(&self.id))
    }
}

fn by_distance(a: &Candidate, b: &Candidate) -> Ordering {
    a.dist.total_cmp(&b.dist).then_with(|| a.id.cmp(&b.id))
}

/// Link structure of one index; vectors live in a [`VectorHeap`]
#[derive(Debug, Clone)]
pub(crate) struct HnswGraph {
    metric: Metric,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    ml: f64,
    nodes: BTreeMap<VectorId, HnswNode>,
    entry_point: Option<VectorId>,
    max_level: usize,
    rng_counter: u64,
}

impl HnswGraph {
    pub(crate) fn new(config: &VectorConfig) -> Self {
        HnswGraph {
            metric: config.metric,
            m: config.m,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
            ml: config.ml(),
            nodes: BTreeMap::new(),
            entry_point: None,
            max_level: 0,
            rng_counter: 0,
        }
    }

    pub(crate) fn set_ef_search(&mut self, ef: usize) {
        self.ef_search = ef;
    }

    // ========================================================================
    // Level assignment
    // ========================================================================

    fn assign_level(&mut self) -> usize {
        self.rng_counter += 1;
        let hash = splitmix64(RNG_SEED.wrapping_add(self.rng_counter));
        let uniform = ((hash as f64) / (u64::MAX as f64)).max(1e-15);
        (-uniform.ln() * self.ml) as usize
    }

    fn is_deleted(&self, id: VectorId) -> bool {
        self.nodes.get(&id).map_or(false, |n| n.deleted)
    }

    fn dist(&self, query: &[f32], id: VectorId, heap: &VectorHeap) -> Option<f32> {
        heap.get(id).map(|v| distance(query, v, self.metric))
    }

    // ========================================================================
    // Search primitives
    // ========================================================================

    /// Beam search on one layer; up to `ef` live nodes, nearest first
    fn search_layer(
        &self,
        query: &[f32],
        entry_id: VectorId,
        ef: usize,
        layer: usize,
        heap: &VectorHeap,
    ) -> Vec<Candidate> {
        let Some(entry_dist) = self.dist(query, entry_id, heap) else {
            return Vec::new();
        };
        let entry = Candidate {
            dist: entry_dist,
            id: entry_id,
        };

        let mut visited = BTreeSet::new();
        visited.insert(entry_id);
        let mut candidates = BinaryHeap::new();
        candidates.push(entry);
        let mut results: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        if !self.is_deleted(entry_id) {
            results.push(Reverse(entry));
        }

        while let Some(nearest) = candidates.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |r| r.0.dist);
            if nearest.dist > worst && results.len() >= ef {
                break;
            }
            let Some(node) = self.nodes.get(&nearest.id) else {
                continue;
            };
            let Some(links) = node.neighbors.get(layer) else {
                continue;
            };
            for &neighbor_id in links {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let Some(d) = self.dist(query, neighbor_id, heap) else {
                    continue;
                };
                let worst = results.peek().map_or(f32::INFINITY, |r| r.0.dist);
                if results.len() < ef || d < worst {
                    let candidate = Candidate { dist: d, id: neighbor_id };
                    // Tombstones still route the search
                    candidates.push(candidate);
                    if !self.is_deleted(neighbor_id) {
                        results.push(Reverse(candidate));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut found: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
        found.sort_by(by_distance);
        found
    }

    /// Greedy descent from `from_layer` down to `to_layer`, moving to the
    /// nearest neighbor until no neighbor is nearer
    fn greedy_search_to_layer(
        &self,
        query: &[f32],
        entry_id: VectorId,
        from_layer: usize,
        to_layer: usize,
        heap: &VectorHeap,
    ) -> VectorId {
        let mut current = entry_id;
        for layer in (to_layer..=from_layer).rev() {
            loop {
                let Some(mut best_dist) = self.dist(query, current, heap) else {
                    break;
                };
                let mut best_id = current;
                if let Some(links) = self.nodes.get(&current).and_then(|n| n.neighbors.get(layer)) {
                    for &neighbor_id in links {
                        if let Some(d) = self.dist(query, neighbor_id, heap) {
                            if d < best_dist || (d == best_dist && neighbor_id < best_id) {
                                best_dist = d;
                                best_id = neighbor_id;
                            }
                        }
                    }
                }
                if best_id == current {
                    break;
                }
                current = best_id;
            }
        }
        current
    }

    fn prune_neighbors_for(&mut self, id: VectorId, layer: usize, max_links: usize, heap: &VectorHeap) {
        let Some(embedding) = heap.get(id) else {
            return;
        };
        let Some(links) = self.nodes.get(&id).and_then(|n| n.neighbors.get(layer)) else {
            return;
        };
        let mut scored: Vec<Candidate> = links
            .iter()
            .filter_map(|&nid| {
                heap.get(nid).map(|v| Candidate {
                    dist: distance(embedding, v, self.metric),
                    id: nid,
                })
            })
            .collect();
        scored.sort_by(by_distance);
        let keep: BTreeSet<VectorId> = scored.iter().take(max_links).map(|c| c.id).collect();
        if let Some(slot) = self.nodes.get_mut(&id).and_then(|n| n.neighbors.get_mut(layer)) {
            *slot = keep;
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Link a node whose vector is already in `heap`
    pub(crate) fn insert(&mut self, id: VectorId, heap: &VectorHeap) {
        let Some(embedding) = heap.get(id).map(<[f32]>::to_vec) else {
            return;
        };
        let level = self.assign_level();
        self.nodes.insert(id, HnswNode::new(level));

        let Some(entry_id) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return;
        };

        let mut current_entry = entry_id;
        if self.max_level > level {
            current_entry = self.greedy_search_to_layer(&embedding, entry_id, self.max_level, level + 1, heap);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(&embedding, current_entry, self.ef_construction, layer, heap);
            let selected: Vec<VectorId> = candidates
                .iter()
                .filter(|c| c.id != id)
                .take(self.m)
                .map(|c| c.id)
                .collect();

            if let Some(links) = self.nodes.get_mut(&id).and_then(|n| n.neighbors.get_mut(layer)) {
                links.extend(selected.iter().copied());
            }

            let max_links = if layer == 0 { self.m * 2 } else { self.m };
            for &neighbor_id in &selected {
                let overfull = match self.nodes.get_mut(&neighbor_id).and_then(|n| n.neighbors.get_mut(layer)) {
                    Some(links) => {
                        links.insert(id);
                        links.len() > max_links
                    }
                    None => false,
                };
                if overfull {
                    self.prune_neighbors_for(neighbor_id, layer, max_links, heap);
                }
            }

            if let Some(closest) = candidates.first() {
                current_entry = closest.id;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(id);
            self.max_level = level;
        }
    }

    /// Tombstone a node; returns whether it was live
    pub(crate) fn mark_deleted(&mut self, id: VectorId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if !node.deleted => {
                node.deleted = true;
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Up to `k` live nodes nearest to `query`, nearest first
    pub(crate) fn search(&self, query: &[f32], k: usize, heap: &VectorHeap) -> Vec<(VectorId, f32)> {
        if k == 0 || query.len() != heap.dimension() {
            return Vec::new();
        }
        let Some(entry_id) = self.entry_point else {
            return Vec::new();
        };
        let mut current = entry_id;
        if self.max_level > 0 {
            current = self.greedy_search_to_layer(query, entry_id, self.max_level, 1, heap);
        }
        let ef = self.ef_search.max(k);
        self.search_layer(query, current, ef, 0, heap)
            .into_iter()
            .take(k)
            .map(|c| (c.id, c.dist))
            .collect()
    }

    /// Nodes not tombstoned
    pub(crate) fn len(&self) -> usize {
        self.nodes.values().filter(|n| !n.deleted).count()
    }

    pub(crate) fn tombstones(&self) -> usize {
        self.nodes.values().filter(|n| n.deleted).count()
    }

    pub(crate) fn contains(&self, id: VectorId) -> bool {
        self.nodes.get(&id).is_some_and(|n| !n.deleted)
    }

    /// Every node, tombstoned or not
    pub(crate) fn node_ids(&self) -> impl Iterator<Item = VectorId> + '_ {
        self.nodes.keys().copied()
    }

    /// Approximate bytes held by link lists
    pub(crate) fn memory_usage(&self) -> usize {
        self.nodes
            .values()
            .map(|n| n.neighbors.iter().map(|l| l.len() * 16 + 64).sum::<usize>() + 64)
            .sum()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Append the link structure to `w`
    pub(crate) fn write_state<W: Write>(&self, w: &mut W) -> Result<()> {
        match self.entry_point {
            Some(id) => {
                w.write_u8(1)?;
                w.write_u64::<LittleEndian>(id.0)?;
            }
            None => w.write_u8(0)?,
        }
        w.write_u64::<LittleEndian>(self.max_level as u64)?;
        w.write_u64::<LittleEndian>(self.rng_counter)?;
        w.write_u64::<LittleEndian>(self.nodes.len() as u64)?;
        for (id, node) in &self.nodes {
            w.write_u64::<LittleEndian>(id.0)?;
            w.write_u8(node.deleted as u8)?;
            w.write_u32::<LittleEndian>(node.neighbors.len() as u32)?;
            for links in &node.neighbors {
                w.write_u32::<LittleEndian>(links.len() as u32)?;
                for nid in links {
                    w.write_u64::<LittleEndian>(nid.0)?;
                }
            }
        }
        Ok(())
    }

    /// Replace the link structure with one read by [`write_state`](Self::write_state)
    pub(crate) fn read_state<R: Read>(&mut self, r: &mut R) -> Result<()> {
        let corrupt = |what: &str| Error::Corrupt(format!("vector index graph: {}", what));
        self.entry_point = match r.read_u8()? {
            0 => None,
            1 => Some(VectorId(r.read_u64::<LittleEndian>()?)),
            _ => return Err(corrupt("bad entry point flag")),
        };
        self.max_level = r.read_u64::<LittleEndian>()? as usize;
        self.rng_counter = r.read_u64::<LittleEndian>()?;
        let count = r.read_u64::<LittleEndian>()?;
        self.nodes.clear();
        for _ in 0..count {
            let id = VectorId(r.read_u64::<LittleEndian>()?);
            let deleted = r.read_u8()? != 0;
            let layers = r.read_u32::<LittleEndian>()? as usize;
            if layers == 0 {
                return Err(corrupt("node without layers"));
            }
            let mut neighbors = Vec::with_capacity(layers);
            for _ in 0..layers {
                let n = r.read_u32::<LittleEndian>()?;
                let mut links = BTreeSet::new();
                for _ in 0..n {
                    links.insert(VectorId(r.read_u64::<LittleEndian>()?));
                }
                neighbors.push(links);
            }
            self.nodes.insert(id, HnswNode { neighbors, deleted });
        }
        if let Some(ep) = self.entry_point {
            if !self.nodes.contains_key(&ep) {
                return Err(corrupt("entry point is not a node"));
            }
        }
        Ok(())
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
