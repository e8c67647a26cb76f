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

//! Named reasoning patterns.
//!
//! A pattern is a reusable approach to a class of tasks, scored by an
//! incremental success-rate and duration average weighted by how often it
//! has been applied. Applying the same updates in any order yields the
//! same averages as a batch computation.

use parking_lot::RwLock;
use recalldb::{InsertRequest, Metric, VectorDb};
use recalldb_core::{RecallError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A stored reasoning pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub embedding: Vec<f32>,
    pub task_type: String,
    pub approach: String,
    /// Incremental success average in [0, 1].
    pub success_rate: f64,
    /// Incremental duration average in milliseconds.
    pub avg_duration_ms: f64,
    /// Number of applications folded into the averages; at least 1.
    pub iterations: u64,
    pub tags: Vec<String>,
    pub domain: String,
    pub complexity: String,
    pub learning_source: String,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
}

/// Input for [`PatternStore::put`]; id and timestamp are assigned, and
/// the averages start from the first observation.
#[derive(Debug, Clone, Default)]
pub struct NewPattern {
    pub embedding: Vec<f32>,
    pub task_type: String,
    pub approach: String,
    pub success: bool,
    pub duration_ms: u64,
    pub tags: Vec<String>,
    pub domain: String,
    pub complexity: String,
    pub learning_source: String,
}

/// Retrieval predicates for [`PatternStore::find_similar`].
#[derive(Debug, Clone, Default)]
pub struct PatternFilters {
    pub domain: Option<String>,
    pub task_type: Option<String>,
    pub min_success_rate: Option<f64>,
}

/// One retrieval hit.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub pattern: Pattern,
    pub similarity: f32,
}

/// Store counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub total: usize,
    pub avg_success_rate: f64,
    pub domain_histogram: BTreeMap<String, usize>,
    /// Ids of the best patterns by success rate, capped at ten.
    pub top_patterns_by_success_rate: Vec<String>,
}

/// Reasoning patterns over a shared vector database.
pub struct PatternStore {
    db: Arc<VectorDb>,
    rows: RwLock<HashMap<String, Pattern>>,
}

impl PatternStore {
    /// Build over a shared database; embeddings are inserted with
    /// `kind = "pattern"` metadata.
    pub fn new(db: Arc<VectorDb>) -> Self {
        Self {
            db,
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Convenience constructor owning a private in-memory database.
    pub fn in_memory(dimension: usize) -> Result<Self> {
        let db = VectorDb::in_memory(recalldb::DbConfig::in_memory(dimension))?;
        Ok(Self::new(Arc::new(db)))
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Pattern> {
        self.rows.read().get(id).cloned()
    }

    /// Insert a pattern seeded from its first observation.
    pub fn put(&self, new: NewPattern) -> Result<String> {
        let id = self.db.insert(
            InsertRequest::new(new.embedding.clone()).with_metadata(json!({
                "kind": "pattern",
                "domain": new.domain,
                "task_type": new.task_type,
            })),
        )?;
        let pattern = Pattern {
            id: id.clone(),
            embedding: new.embedding,
            task_type: new.task_type,
            approach: new.approach,
            success_rate: if new.success { 1.0 } else { 0.0 },
            avg_duration_ms: new.duration_ms as f64,
            iterations: 1,
            tags: new.tags,
            domain: new.domain,
            complexity: new.complexity,
            learning_source: new.learning_source,
            ts: recalldb_core::now_ms(),
        };
        self.rows.write().insert(id.clone(), pattern);
        Ok(id)
    }

    /// Find the `k` most similar patterns above `min_similarity`.
    ///
    /// Over-fetches 2k from the vector search before applying the
    /// in-memory predicates.
    pub fn find_similar(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
        filters: &PatternFilters,
    ) -> Result<Vec<PatternMatch>> {
        let over_fetch = k.saturating_mul(2).max(k);
        let response = self.db.search(query, over_fetch, Metric::Cosine)?;
        let rows = self.rows.read();

        let mut matches: Vec<PatternMatch> = response
            .results
            .into_iter()
            .filter(|hit| hit.score >= min_similarity)
            .filter_map(|hit| {
                let pattern = rows.get(&hit.id)?.clone();
                Some(PatternMatch {
                    similarity: hit.score,
                    pattern,
                })
            })
            .filter(|m| self.matches(&m.pattern, filters))
            .collect();
        matches.sort_by(|a, b| a.similarity.total_cmp(&b.similarity).reverse());
        matches.truncate(k);
        Ok(matches)
    }

    fn matches(&self, pattern: &Pattern, filters: &PatternFilters) -> bool {
        if let Some(domain) = &filters.domain {
            if &pattern.domain != domain {
                return false;
            }
        }
        if let Some(task_type) = &filters.task_type {
            if &pattern.task_type != task_type {
                return false;
            }
        }
        if let Some(min) = filters.min_success_rate {
            if pattern.success_rate < min {
                return false;
            }
        }
        true
    }

    /// Fold one more application into the pattern's averages.
    pub fn update(&self, id: &str, success: bool, duration_ms: u64) -> Result<()> {
        let mut rows = self.rows.write();
        let pattern = rows
            .get_mut(id)
            .ok_or_else(|| RecallError::NotFound(id.to_string()))?;
        let n = pattern.iterations + 1;
        let observed = if success { 1.0 } else { 0.0 };
        pattern.success_rate =
            (pattern.success_rate * pattern.iterations as f64 + observed) / n as f64;
        pattern.avg_duration_ms =
            (pattern.avg_duration_ms * pattern.iterations as f64 + duration_ms as f64) / n as f64;
        pattern.iterations = n;
        Ok(())
    }

    pub fn stats(&self) -> PatternStats {
        let rows = self.rows.read();
        let total = rows.len();
        let mut domain_histogram = BTreeMap::new();
        let mut success_sum = 0.0;
        for pattern in rows.values() {
            *domain_histogram.entry(pattern.domain.clone()).or_insert(0) += 1;
            success_sum += pattern.success_rate;
        }
        let mut ranked: Vec<&Pattern> = rows.values().collect();
        ranked.sort_by(|a, b| {
            b.success_rate
                .total_cmp(&a.success_rate)
                .then_with(|| a.id.cmp(&b.id))
        });
        PatternStats {
            total,
            avg_success_rate: if total == 0 {
                0.0
            } else {
                success_sum / total as f64
            },
            domain_histogram,
            top_patterns_by_success_rate: ranked
                .into_iter()
                .take(10)
                .map(|p| p.id.clone())
                .collect(),
        }
    }
}
