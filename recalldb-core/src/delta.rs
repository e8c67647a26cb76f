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

//! Delta-sync change codec.
//!
//! A [`ShardDelta`] carries the ordered change list one node ships to
//! another. Transport is out of scope; this module only defines the
//! payload shape, last-write-wins conflict resolution, and per-id
//! coalescing.
//!
//! Conflict rule: higher logical clock wins; equal clocks break ties by
//! lexicographic source node id, so every replica picks the same winner.

use crate::record::VectorRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Change operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One change to a single vector id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorChange {
    pub op: ChangeOp,
    pub vector_id: String,
    /// Present for insert/update, absent for delete.
    pub embedding: Option<Vec<f32>>,
    /// Present for insert/update, absent for delete.
    pub metadata: Option<Value>,
    /// Node that produced the change.
    pub source_node: String,
    /// Lamport-style logical clock at the source.
    pub logical_clock: u64,
    /// Per-node observed clocks at the source when the change was made.
    #[serde(default)]
    pub version_vector: BTreeMap<String, u64>,
}

impl VectorChange {
    /// Build an insert/update change from a record.
    pub fn upsert(
        op: ChangeOp,
        record: &VectorRecord,
        source_node: impl Into<String>,
        logical_clock: u64,
    ) -> Self {
        Self {
            op,
            vector_id: record.id.clone(),
            embedding: Some(record.embedding.clone()),
            metadata: Some(record.metadata.clone()),
            source_node: source_node.into(),
            logical_clock,
            version_vector: BTreeMap::new(),
        }
    }

    /// Build a delete change.
    pub fn delete(
        vector_id: impl Into<String>,
        source_node: impl Into<String>,
        logical_clock: u64,
    ) -> Self {
        Self {
            op: ChangeOp::Delete,
            vector_id: vector_id.into(),
            embedding: None,
            metadata: None,
            source_node: source_node.into(),
            logical_clock,
            version_vector: BTreeMap::new(),
        }
    }

    /// Total order used for conflict resolution.
    pub fn precedence(&self, other: &Self) -> Ordering {
        self.logical_clock
            .cmp(&other.logical_clock)
            .then_with(|| self.source_node.cmp(&other.source_node))
    }
}

/// Resolve two conflicting changes to the same vector id.
///
/// Last write wins on logical clock; ties break by lexicographically
/// greater source node. Deterministic on every replica.
pub fn resolve<'a>(a: &'a VectorChange, b: &'a VectorChange) -> &'a VectorChange {
    match a.precedence(b) {
        Ordering::Less => b,
        _ => a,
    }
}

/// A batch of changes for one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardDelta {
    pub shard_id: u32,
    pub changes: Vec<VectorChange>,
}

impl ShardDelta {
    pub fn new(shard_id: u32) -> Self {
        Self {
            shard_id,
            changes: Vec::new(),
        }
    }

    /// Collapse multiple ops on the same vector id into the winning
    /// terminal op, preserving first-seen order of surviving ids.
    pub fn coalesce(mut self) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut latest: BTreeMap<String, VectorChange> = BTreeMap::new();
        for change in self.changes.drain(..) {
            match latest.get(&change.vector_id) {
                Some(existing) => {
                    if change.precedence(existing) == Ordering::Greater {
                        latest.insert(change.vector_id.clone(), change);
                    }
                }
                None => {
                    order.push(change.vector_id.clone());
                    latest.insert(change.vector_id.clone(), change);
                }
            }
        }
        self.changes = order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: &str, op: ChangeOp, node: &str, clock: u64) -> VectorChange {
        VectorChange {
            op,
            vector_id: id.to_string(),
            embedding: if matches!(op, ChangeOp::Delete) {
                None
            } else {
                Some(vec![1.0])
            },
            metadata: None,
            source_node: node.to_string(),
            logical_clock: clock,
            version_vector: BTreeMap::new(),
        }
    }

    #[test]
    fn test_resolve_higher_clock_wins() {
        let a = change("v", ChangeOp::Update, "node-a", 5);
        let b = change("v", ChangeOp::Update, "node-b", 9);
        assert_eq!(resolve(&a, &b).logical_clock, 9);
        assert_eq!(resolve(&b, &a).logical_clock, 9);
    }

    #[test]
    fn test_resolve_tie_breaks_on_source_node() {
        let a = change("v", ChangeOp::Update, "node-a", 7);
        let b = change("v", ChangeOp::Update, "node-b", 7);
        // Both replicas must agree regardless of argument order.
        assert_eq!(resolve(&a, &b).source_node, "node-b");
        assert_eq!(resolve(&b, &a).source_node, "node-b");
    }

    #[test]
    fn test_coalesce_keeps_terminal_op() {
        let mut delta = ShardDelta::new(0);
        delta.changes.push(change("v1", ChangeOp::Insert, "n", 1));
        delta.changes.push(change("v1", ChangeOp::Update, "n", 2));
        delta.changes.push(change("v1", ChangeOp::Delete, "n", 3));
        delta.changes.push(change("v2", ChangeOp::Insert, "n", 4));

        let coalesced = delta.coalesce();
        assert_eq!(coalesced.changes.len(), 2);
        assert_eq!(coalesced.changes[0].vector_id, "v1");
        assert_eq!(coalesced.changes[0].op, ChangeOp::Delete);
        assert_eq!(coalesced.changes[1].vector_id, "v2");
    }

    #[test]
    fn test_coalesce_ignores_stale_out_of_order_change() {
        let mut delta = ShardDelta::new(0);
        delta.changes.push(change("v1", ChangeOp::Update, "n", 8));
        delta.changes.push(change("v1", ChangeOp::Update, "n", 3));

        let coalesced = delta.coalesce();
        assert_eq!(coalesced.changes.len(), 1);
        assert_eq!(coalesced.changes[0].logical_clock, 8);
    }

    #[test]
    fn test_json_round_trip() {
        let mut delta = ShardDelta::new(3);
        delta.changes.push(change("v1", ChangeOp::Insert, "n", 1));
        let text = serde_json::to_string(&delta).unwrap();
        let back: ShardDelta = serde_json::from_str(&text).unwrap();
        assert_eq!(back, delta);
    }
}
