// Copyright 2025 RecallDB (https://github.com/recalldb)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Hierarchical navigable small-world graph.
//!
//! Nodes live in an arena; the graph refers to storage records only
//! through their string ids via a parallel id↔index table, so a record
//! delete is a mark operation that never invalidates arena indices.
//!
//! Invariants maintained after every mutation:
//! - edges are symmetric within each layer,
//! - degrees never exceed M (M0 on layer 0),
//! - a tombstoned node is never returned from search and never selected
//!   as a neighbor, though traversal may still pass through its edges
//!   until a rebuild compacts them.
//!
//! Level assignment draws from a seeded RNG, so two indexes built with
//! the same seed and insert order are identical, and search on a fixed
//! graph snapshot is deterministic (ties break by id ascending).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recalldb_core::{HnswConfig, Metric, RecallError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::warn;

/// Hard cap on assigned levels; the geometric draw virtually never
/// reaches it but a pathological RNG value must not allocate unbounded
/// layer vectors.
const MAX_LEVEL_CAP: usize = 32;

/// Index statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct HnswStats {
    /// Whether an index is configured for the database.
    pub enabled: bool,
    /// Whether the graph is built and serving searches.
    pub ready: bool,
    /// Live (non-tombstoned) node count.
    pub node_count: usize,
    /// Undirected edge count among live nodes, across all layers.
    pub edge_count: usize,
    /// Highest layer currently in use.
    pub max_level: usize,
    /// Mean live-node degree on layer 0.
    pub avg_degree: f64,
}

#[derive(Debug)]
struct Node {
    id: String,
    vector: Vec<f32>,
    /// Adjacency per layer; `neighbors.len() - 1` is the node's level.
    neighbors: Vec<Vec<usize>>,
    deleted: bool,
}

impl Node {
    fn level(&self) -> usize {
        self.neighbors.len() - 1
    }
}

/// A traversal candidate ordered by distance, then arena index.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    node: usize,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.node.cmp(&other.node))
    }
}

/// Distance with smaller-is-closer semantics; lengths are validated at
/// the index boundary, so the kernel runs unchecked here.
fn graph_distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => {
            let mut dot = 0.0f32;
            let mut na = 0.0f32;
            let mut nb = 0.0f32;
            for (x, y) in a.iter().zip(b.iter()) {
                dot += x * y;
                na += x * x;
                nb += y * y;
            }
            if na == 0.0 && nb == 0.0 {
                return 0.0;
            }
            if na == 0.0 || nb == 0.0 {
                return 1.0;
            }
            1.0 - (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
        }
        Metric::Euclidean => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum::<f32>()
            .sqrt(),
        Metric::Dot => -a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f32>(),
    }
}

/// Layered small-world graph over vector ids.
#[derive(Debug)]
pub struct HnswIndex {
    dimension: usize,
    metric: Metric,
    config: HnswConfig,
    nodes: Vec<Node>,
    id_to_node: HashMap<String, usize>,
    entry_point: Option<usize>,
    max_level: usize,
    tombstones: usize,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(dimension: usize, metric: Metric, config: HnswConfig) -> Result<Self> {
        if dimension == 0 {
            return Err(RecallError::invalid("hnsw dimension must be positive"));
        }
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            dimension,
            metric,
            config,
            nodes: Vec::new(),
            id_to_node: HashMap::new(),
            entry_point: None,
            max_level: 0,
            tombstones: 0,
            rng,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Live node count.
    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.tombstones
    }

    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_to_node
            .get(id)
            .is_some_and(|&n| !self.nodes[n].deleted)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn dist_to(&self, query: &[f32], node: usize) -> f32 {
        graph_distance(self.metric, query, &self.nodes[node].vector)
    }

    fn dist_nodes(&self, a: usize, b: usize) -> f32 {
        graph_distance(self.metric, &self.nodes[a].vector, &self.nodes[b].vector)
    }

    /// Geometric level draw: `⌊−ln(U) · level_mult⌋`.
    fn random_level(&mut self) -> usize {
        let u: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        ((-u.ln() * self.config.level_mult()).floor() as usize).min(MAX_LEVEL_CAP)
    }

    /// Insert or replace a vector.
    ///
    /// An existing id is tombstoned and re-inserted as a fresh node, which
    /// is how update-in-place reaches the graph.
    pub fn insert(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        if let Some(&old) = self.id_to_node.get(id) {
            if !self.nodes[old].deleted {
                self.nodes[old].deleted = true;
                self.tombstones += 1;
            }
        }

        let level = self.random_level();
        let new_idx = self.nodes.len();
        self.nodes.push(Node {
            id: id.to_string(),
            vector: vector.to_vec(),
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.id_to_node.insert(id.to_string(), new_idx);

        let Some(mut cur) = self.entry_point else {
            self.entry_point = Some(new_idx);
            self.max_level = level;
            return Ok(());
        };

        // Greedy descent through the layers above the new node's level.
        for layer in ((level + 1)..=self.max_level).rev() {
            cur = self.greedy_descend(vector, cur, layer);
        }

        // Beam search and heuristic wiring from min(level, top) down to 0.
        let mut entries = vec![cur];
        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(vector, &entries, self.config.ef_construction, layer);
            let m_max = if layer == 0 {
                self.config.m0()
            } else {
                self.config.m
            };
            let selected = self.select_neighbors(&found, m_max);
            for &s in &selected {
                self.nodes[new_idx].neighbors[layer].push(s);
                self.nodes[s].neighbors[layer].push(new_idx);
            }
            for &s in &selected {
                if self.nodes[s].neighbors[layer].len() > m_max {
                    self.prune_neighbors(s, layer, m_max);
                }
            }
            if !found.is_empty() {
                entries = found.iter().map(|c| c.node).collect();
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(new_idx);
        }
        Ok(())
    }

    /// Walk to the locally closest node within one layer.
    fn greedy_descend(&self, query: &[f32], start: usize, layer: usize) -> usize {
        let mut cur = start;
        let mut cur_dist = self.dist_to(query, cur);
        loop {
            let mut improved = false;
            for &n in self.nodes[cur].neighbors.get(layer).into_iter().flatten() {
                let d = self.dist_to(query, n);
                if d < cur_dist {
                    cur = n;
                    cur_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return cur;
            }
        }
    }

    /// Bounded best-first search within one layer.
    ///
    /// Traversal may pass through tombstoned nodes, but they never enter
    /// the result set. Results come back sorted ascending by distance.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[usize],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &ep in entries {
            if !visited.insert(ep) {
                continue;
            }
            let c = Candidate {
                dist: self.dist_to(query, ep),
                node: ep,
            };
            candidates.push(Reverse(c));
            if !self.nodes[ep].deleted {
                results.push(c);
            }
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current.dist > worst.dist {
                        break;
                    }
                }
            }
            for &n in self.nodes[current.node]
                .neighbors
                .get(layer)
                .into_iter()
                .flatten()
            {
                if !visited.insert(n) {
                    continue;
                }
                let d = self.dist_to(query, n);
                let admit = results.len() < ef
                    || results.peek().is_some_and(|worst| d < worst.dist);
                if admit {
                    candidates.push(Reverse(Candidate { dist: d, node: n }));
                    if !self.nodes[n].deleted {
                        results.push(Candidate { dist: d, node: n });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }
        results.into_sorted_vec()
    }

    /// Diversity-heuristic neighbor selection.
    ///
    /// Candidates arrive sorted ascending by distance to the base vector.
    /// One is accepted only while it is closer to the base than to every
    /// neighbor already selected; stops at `m_max`.
    fn select_neighbors(&self, candidates: &[Candidate], m_max: usize) -> Vec<usize> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(m_max);
        for &c in candidates {
            if self.nodes[c.node].deleted {
                continue;
            }
            let diverse = selected
                .iter()
                .all(|s| c.dist < self.dist_nodes(c.node, s.node));
            if diverse {
                selected.push(c);
                if selected.len() == m_max {
                    break;
                }
            }
        }
        selected.into_iter().map(|c| c.node).collect()
    }

    /// Re-apply heuristic selection to an over-full neighborhood and drop
    /// the back-edges of pruned neighbors to keep edges symmetric.
    fn prune_neighbors(&mut self, node: usize, layer: usize, m_max: usize) {
        let current = self.nodes[node].neighbors[layer].clone();
        let mut candidates: Vec<Candidate> = current
            .iter()
            .map(|&n| Candidate {
                dist: self.dist_nodes(node, n),
                node: n,
            })
            .collect();
        candidates.sort();
        let keep = self.select_neighbors(&candidates, m_max);
        let keep_set: HashSet<usize> = keep.iter().copied().collect();

        for &dropped in current.iter().filter(|n| !keep_set.contains(n)) {
            self.nodes[dropped].neighbors[layer].retain(|&n| n != node);
        }
        self.nodes[node].neighbors[layer] = keep;
    }

    /// Top-k nearest live nodes; `(id, distance)` pairs ascending by
    /// distance with ties broken by id.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<(String, f32)>> {
        self.check_dimension(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let Some(mut cur) = self.entry_point else {
            return Ok(Vec::new());
        };
        for layer in (1..=self.max_level).rev() {
            cur = self.greedy_descend(query, cur, layer);
        }
        let ef = ef.max(k);
        let mut found = self.search_layer(query, &[cur], ef, 0);
        if found.is_empty() {
            // A populated graph that yields nothing means the entry chain
            // is disconnected from every live node.
            warn!(
                live = self.live_count(),
                "hnsw level-0 search found no live node; using brute-force fallback"
            );
            found = self.brute_force(query, ef);
        }
        let mut pairs: Vec<(String, f32)> = found
            .into_iter()
            .map(|c| (self.nodes[c.node].id.clone(), c.dist))
            .collect();
        pairs.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        pairs.truncate(k);
        Ok(pairs)
    }

    fn brute_force(&self, query: &[f32], k: usize) -> Vec<Candidate> {
        let mut all: Vec<Candidate> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.deleted)
            .map(|(i, n)| Candidate {
                dist: graph_distance(self.metric, query, &n.vector),
                node: i,
            })
            .collect();
        all.sort();
        all.truncate(k);
        all
    }

    /// Tombstone a node. Edges remain until a rebuild compacts them.
    pub fn delete(&mut self, id: &str) -> bool {
        match self.id_to_node.get(id) {
            Some(&n) if !self.nodes[n].deleted => {
                self.nodes[n].deleted = true;
                self.tombstones += 1;
                true
            }
            _ => false,
        }
    }

    /// Drop every node and reset the level RNG to the configured seed.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.id_to_node.clear();
        self.entry_point = None;
        self.max_level = 0;
        self.tombstones = 0;
        self.rng = StdRng::seed_from_u64(self.config.seed);
    }

    /// Build a compacted replacement graph from the live nodes.
    ///
    /// Fails with `Corruption` if the rebuilt graph violates the edge
    /// symmetry or degree-bound invariants.
    pub fn rebuild(&self) -> Result<HnswIndex> {
        let mut fresh = HnswIndex::new(self.dimension, self.metric, self.config.clone())?;
        for node in self.nodes.iter().filter(|n| !n.deleted) {
            fresh.insert(&node.id, &node.vector)?;
        }
        fresh.verify_invariants()?;
        Ok(fresh)
    }

    /// Check edge symmetry and degree bounds over the whole graph.
    pub fn verify_invariants(&self) -> Result<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            for (layer, neighbors) in node.neighbors.iter().enumerate() {
                let m_max = if layer == 0 {
                    self.config.m0()
                } else {
                    self.config.m
                };
                if neighbors.len() > m_max {
                    return Err(RecallError::corruption(format!(
                        "node {} exceeds degree bound at layer {layer}: {} > {m_max}",
                        node.id,
                        neighbors.len()
                    )));
                }
                for &n in neighbors {
                    let back = self.nodes[n].neighbors.get(layer);
                    if !back.is_some_and(|list| list.contains(&i)) {
                        return Err(RecallError::corruption(format!(
                            "asymmetric edge {} -> {} at layer {layer}",
                            node.id, self.nodes[n].id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> HnswStats {
        let live = self.live_count();
        let mut directed_total = 0usize;
        let mut directed_level0 = 0usize;
        for node in self.nodes.iter().filter(|n| !n.deleted) {
            for (layer, neighbors) in node.neighbors.iter().enumerate() {
                let live_links = neighbors.iter().filter(|&&n| !self.nodes[n].deleted).count();
                directed_total += live_links;
                if layer == 0 {
                    directed_level0 += live_links;
                }
            }
        }
        HnswStats {
            enabled: true,
            ready: true,
            node_count: live,
            edge_count: directed_total / 2,
            max_level: self.max_level,
            avg_degree: if live == 0 {
                0.0
            } else {
                directed_level0 as f64 / live as f64
            },
        }
    }

    /// Serialize the live subgraph for the container's HNSW region.
    ///
    /// Tombstoned nodes and their edges are compacted away; vectors are
    /// not stored (they belong to the backend and are re-attached on
    /// load).
    pub fn to_region_bytes(&self) -> Vec<u8> {
        let mut remap: HashMap<usize, u64> = HashMap::new();
        let mut live: Vec<usize> = Vec::with_capacity(self.live_count());
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.deleted {
                remap.insert(i, live.len() as u64);
                live.push(i);
            }
        }

        let mut buf = Vec::new();
        write_varint(&mut buf, live.len() as u64);
        let entry = self
            .entry_point
            .filter(|e| !self.nodes[*e].deleted)
            .or_else(|| {
                live.iter()
                    .copied()
                    .max_by_key(|&i| self.nodes[i].level())
            });
        match entry.and_then(|e| remap.get(&e)) {
            Some(&e) => write_varint(&mut buf, e + 1),
            None => write_varint(&mut buf, 0),
        }
        for &i in &live {
            let node = &self.nodes[i];
            write_varint(&mut buf, node.id.len() as u64);
            buf.extend_from_slice(node.id.as_bytes());
            write_varint(&mut buf, node.level() as u64);
            for neighbors in &node.neighbors {
                let kept: Vec<u64> = neighbors
                    .iter()
                    .filter_map(|n| remap.get(n).copied())
                    .collect();
                write_varint(&mut buf, kept.len() as u64);
                for n in kept {
                    write_varint(&mut buf, n);
                }
            }
        }
        buf
    }

    /// Rebuild an index from a persisted region, re-attaching vectors by
    /// id from the backend's records.
    pub fn from_region_bytes(
        bytes: &[u8],
        dimension: usize,
        metric: Metric,
        config: HnswConfig,
        vectors: &HashMap<String, Vec<f32>>,
    ) -> Result<Self> {
        let mut index = HnswIndex::new(dimension, metric, config)?;
        let mut cursor = bytes;
        let count = read_varint(&mut cursor)? as usize;
        let entry = read_varint(&mut cursor)?;

        for i in 0..count {
            let id_len = read_varint(&mut cursor)? as usize;
            if id_len > cursor.len() {
                return Err(RecallError::corruption("hnsw region truncated id"));
            }
            let id = String::from_utf8(cursor[..id_len].to_vec())
                .map_err(|_| RecallError::corruption("hnsw region non-utf8 id"))?;
            cursor = &cursor[id_len..];
            let level = read_varint(&mut cursor)? as usize;
            if level > MAX_LEVEL_CAP {
                return Err(RecallError::corruption("hnsw region level out of range"));
            }
            let mut neighbors = Vec::with_capacity(level + 1);
            for _ in 0..=level {
                let n = read_varint(&mut cursor)? as usize;
                let mut layer = Vec::with_capacity(n);
                for _ in 0..n {
                    let target = read_varint(&mut cursor)? as usize;
                    if target >= count {
                        return Err(RecallError::corruption("hnsw region edge out of range"));
                    }
                    layer.push(target);
                }
                neighbors.push(layer);
            }
            let vector = vectors.get(&id).cloned().ok_or_else(|| {
                RecallError::corruption(format!("hnsw region references unknown id {id}"))
            })?;
            if vector.len() != dimension {
                return Err(RecallError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            index.max_level = index.max_level.max(level);
            index.id_to_node.insert(id.clone(), i);
            index.nodes.push(Node {
                id,
                vector,
                neighbors,
                deleted: false,
            });
        }
        index.entry_point = match entry {
            0 => None,
            e => {
                let e = (e - 1) as usize;
                if e >= count {
                    return Err(RecallError::corruption("hnsw region entry out of range"));
                }
                Some(e)
            }
        };
        index.verify_invariants()?;
        Ok(index)
    }
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn read_varint(cursor: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let Some((&byte, rest)) = cursor.split_first() else {
            return Err(RecallError::corruption("hnsw region truncated varint"));
        };
        *cursor = rest;
        if shift >= 64 {
            return Err(RecallError::corruption("hnsw region varint overflow"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HnswConfig {
        HnswConfig {
            m: 8,
            ef_construction: 64,
            ef_search: 32,
            min_vectors_for_index: 4,
            seed: 42,
        }
    }

    /// Deterministic embedding; close seeds give similar vectors.
    fn make_vector(seed: u64, dim: usize) -> Vec<f32> {
        (0..dim)
            .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
            .collect()
    }

    fn build_index(n: u64, dim: usize) -> HnswIndex {
        let mut index = HnswIndex::new(dim, Metric::Euclidean, test_config()).unwrap();
        for i in 0..n {
            index.insert(&format!("v{i}"), &make_vector(i, dim)).unwrap();
        }
        index
    }

    #[test]
    fn test_empty_search() {
        let index = HnswIndex::new(4, Metric::Cosine, test_config()).unwrap();
        assert!(index.search(&[0.0; 4], 5, 10).unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_search_returns_self_first() {
        let index = build_index(50, 8);
        let results = index.search(&make_vector(17, 8), 3, 32).unwrap();
        assert_eq!(results[0].0, "v17");
        assert!(results[0].1 < 1e-5);
        for w in results.windows(2) {
            assert!(w[0].1 <= w[1].1, "results not sorted by distance");
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = HnswIndex::new(4, Metric::Cosine, test_config()).unwrap();
        assert!(matches!(
            index.insert("a", &[1.0; 3]),
            Err(RecallError::DimensionMismatch { .. })
        ));
        assert!(index.search(&[1.0; 5], 1, 8).is_err());
    }

    #[test]
    fn test_invariants_hold_after_inserts() {
        let index = build_index(200, 6);
        index.verify_invariants().unwrap();
    }

    #[test]
    fn test_invariants_hold_after_rebuild() {
        let mut index = build_index(120, 6);
        for i in (0..120).step_by(3) {
            index.delete(&format!("v{i}"));
        }
        let rebuilt = index.rebuild().unwrap();
        rebuilt.verify_invariants().unwrap();
        assert_eq!(rebuilt.live_count(), 80);
        assert_eq!(rebuilt.stats().node_count, 80);
    }

    #[test]
    fn test_delete_excludes_from_search() {
        let mut index = build_index(30, 8);
        assert!(index.delete("v5"));
        assert!(!index.delete("v5"));
        let results = index.search(&make_vector(5, 8), 10, 32).unwrap();
        assert!(results.iter().all(|(id, _)| id != "v5"));
        assert_eq!(index.live_count(), 29);
    }

    #[test]
    fn test_update_replaces_vector() {
        let mut index = build_index(20, 4);
        index.insert("v3", &make_vector(900, 4)).unwrap();
        assert_eq!(index.live_count(), 20);
        let results = index.search(&make_vector(900, 4), 1, 16).unwrap();
        assert_eq!(results[0].0, "v3");
    }

    #[test]
    fn test_same_seed_same_results() {
        let a = build_index(100, 8);
        let b = build_index(100, 8);
        let q = make_vector(33, 8);
        assert_eq!(
            a.search(&q, 10, 32).unwrap(),
            b.search(&q, 10, 32).unwrap()
        );
    }

    #[test]
    fn test_k_larger_than_index() {
        let index = build_index(5, 4);
        let results = index.search(&make_vector(2, 4), 50, 64).unwrap();
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn test_recall_against_brute_force() {
        let dim = 16;
        let index = build_index(400, dim);
        let mut hits = 0usize;
        let trials = 20u64;
        let k = 10usize;
        for t in 0..trials {
            let q = make_vector(1000 + t * 7, dim);
            let approx = index.search(&q, k, 64).unwrap();
            let exact = index.brute_force(&q, k);
            let exact_ids: HashSet<String> = exact
                .iter()
                .map(|c| index.nodes[c.node].id.clone())
                .collect();
            hits += approx.iter().filter(|(id, _)| exact_ids.contains(id)).count();
        }
        let recall = hits as f64 / (trials as usize * k) as f64;
        assert!(recall >= 0.9, "recall {recall} below 0.9");
    }

    #[test]
    fn test_region_round_trip() {
        let mut index = build_index(60, 6);
        index.delete("v7");
        index.delete("v8");
        let bytes = index.to_region_bytes();

        let vectors: HashMap<String, Vec<f32>> = (0..60)
            .filter(|i| *i != 7 && *i != 8)
            .map(|i| (format!("v{i}"), make_vector(i, 6)))
            .collect();
        let loaded = HnswIndex::from_region_bytes(
            &bytes,
            6,
            Metric::Euclidean,
            test_config(),
            &vectors,
        )
        .unwrap();
        assert_eq!(loaded.live_count(), 58);

        let q = make_vector(20, 6);
        assert_eq!(
            loaded.search(&q, 5, 32).unwrap(),
            index.search(&q, 5, 32).unwrap()
        );
    }

    #[test]
    fn test_region_unknown_id_is_corruption() {
        let index = build_index(10, 4);
        let bytes = index.to_region_bytes();
        let empty = HashMap::new();
        let err = HnswIndex::from_region_bytes(
            &bytes,
            4,
            Metric::Euclidean,
            test_config(),
            &empty,
        )
        .unwrap_err();
        assert!(matches!(err, RecallError::Corruption(_)));
    }

    #[test]
    fn test_varint_round_trip() {
        for value in [0u64, 1, 127, 128, 16384, u64::from(u32::MAX), u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut cursor = buf.as_slice();
            assert_eq!(read_varint(&mut cursor).unwrap(), value);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_clear_resets() {
        let mut index = build_index(20, 4);
        index.clear();
        assert!(index.is_empty());
        assert!(index.search(&make_vector(1, 4), 5, 16).unwrap().is_empty());
        index.insert("fresh", &make_vector(1, 4)).unwrap();
        assert_eq!(index.live_count(), 1);
    }
}
