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

//! Experience records with quality scoring.
//!
//! An experience is one observed task outcome: what was tried, whether it
//! worked, and how expensive it was. Embeddings live in the shared vector
//! database (tagged `kind = "experience"`); the tabular fields live here.
//! When the caller supplies no quality value, the deterministic formula
//! in [`quality_score`] fills it in.

use parking_lot::RwLock;
use recalldb::{InsertRequest, Metric, VectorDb};
use recalldb_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Quality-formula weights: success, duration, tokens, iterations.
const W_SUCCESS: f64 = 0.6;
const W_DURATION: f64 = 0.2;
const W_TOKENS: f64 = 0.1;
const W_ITERATIONS: f64 = 0.1;

/// Partial credit a failed run keeps on the success term.
const FAILURE_CREDIT: f64 = 0.1;

/// Deterministic quality score in [0, 1].
///
/// Weighted mean of the present components; absent optional components
/// drop out and the remaining weights renormalize.
pub fn quality_score(
    success: bool,
    duration_ms: u64,
    tokens_used: Option<u64>,
    iteration_count: Option<u32>,
) -> f64 {
    let mut weight_sum = W_SUCCESS + W_DURATION;
    let success_score = if success { 1.0 } else { FAILURE_CREDIT };
    let duration_score = (1.0 - duration_ms as f64 / 60_000.0).max(0.0);
    let mut score = W_SUCCESS * success_score + W_DURATION * duration_score;

    if let Some(tokens) = tokens_used {
        score += W_TOKENS * (1.0 - tokens as f64 / 10_000.0).max(0.0);
        weight_sum += W_TOKENS;
    }
    if let Some(iterations) = iteration_count {
        score += W_ITERATIONS * (1.0 - iterations as f64 / 5.0).max(0.0);
        weight_sum += W_ITERATIONS;
    }
    (score / weight_sum).clamp(0.0, 1.0)
}

/// A stored experience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub id: String,
    pub task_embedding: Vec<f32>,
    pub description: String,
    pub success: bool,
    pub duration_ms: u64,
    pub approach: String,
    pub outcome: String,
    /// Quality in [0, 1]; computed when the caller omitted it.
    pub quality: f64,
    /// Shaped reward observed for this experience.
    pub reward: f64,
    pub domain: String,
    pub tokens_used: Option<u64>,
    pub iteration_count: Option<u32>,
    pub agent_type: Option<String>,
    pub error_type: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
}

/// Input for [`ExperienceStore::store`]; id and timestamp are assigned.
#[derive(Debug, Clone, Default)]
pub struct NewExperience {
    pub task_embedding: Vec<f32>,
    pub description: String,
    pub success: bool,
    pub duration_ms: u64,
    pub approach: String,
    pub outcome: String,
    pub quality: Option<f64>,
    pub reward: Option<f64>,
    pub domain: String,
    pub tokens_used: Option<u64>,
    pub iteration_count: Option<u32>,
    pub agent_type: Option<String>,
    pub error_type: Option<String>,
}

/// Retrieval predicates; all optional, all conjunctive.
#[derive(Debug, Clone, Default)]
pub struct ExperienceFilters {
    pub success_only: bool,
    pub domain: Option<String>,
    pub min_quality: Option<f64>,
    pub max_age_ms: Option<i64>,
}

/// One retrieval hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperienceMatch {
    pub experience: Experience,
    /// Cosine similarity of the query to the task embedding.
    pub similarity: f32,
}

/// Store counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceStats {
    pub total: usize,
    pub success_rate: f64,
    pub avg_quality: f64,
    pub avg_duration_ms: f64,
    pub by_domain: BTreeMap<String, usize>,
}

/// Pruning thresholds; an experience is deleted only when it fails both
/// the quality and the age test, and the most valuable `keep_minimum`
/// records always survive.
#[derive(Debug, Clone)]
pub struct PruneOptions {
    pub min_quality: f64,
    pub max_age_ms: i64,
    pub keep_minimum: usize,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            min_quality: 0.3,
            max_age_ms: 30 * 24 * 60 * 60 * 1000,
            keep_minimum: 100,
        }
    }
}

/// Experience records over a shared vector database.
pub struct ExperienceStore {
    db: Arc<VectorDb>,
    rows: RwLock<HashMap<String, Experience>>,
}

impl ExperienceStore {
    /// Build over a shared database; embeddings are inserted with
    /// `kind = "experience"` metadata.
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

    pub fn get(&self, id: &str) -> Option<Experience> {
        self.rows.read().get(id).cloned()
    }

    /// Insert an experience; returns its assigned id.
    pub fn store(&self, new: NewExperience) -> Result<String> {
        let quality = new.quality.map(|q| q.clamp(0.0, 1.0)).unwrap_or_else(|| {
            quality_score(
                new.success,
                new.duration_ms,
                new.tokens_used,
                new.iteration_count,
            )
        });
        let experience = Experience {
            id: String::new(),
            task_embedding: new.task_embedding,
            description: new.description,
            success: new.success,
            duration_ms: new.duration_ms,
            approach: new.approach,
            outcome: new.outcome,
            quality,
            reward: new.reward.unwrap_or(quality),
            domain: new.domain,
            tokens_used: new.tokens_used,
            iteration_count: new.iteration_count,
            agent_type: new.agent_type,
            error_type: new.error_type,
            ts: recalldb_core::now_ms(),
        };

        let id = self.db.insert(
            InsertRequest::new(experience.task_embedding.clone()).with_metadata(json!({
                "kind": "experience",
                "domain": experience.domain,
            })),
        )?;
        let mut experience = experience;
        experience.id = id.clone();
        self.rows.write().insert(id.clone(), experience);
        Ok(id)
    }

    /// Retrieve the `k` most relevant experiences for an embedding.
    ///
    /// Ordering: similarity, then quality, then recency.
    pub fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filters: &ExperienceFilters,
    ) -> Result<Vec<ExperienceMatch>> {
        let over_fetch = k.saturating_mul(2).max(k);
        let response = self.db.search(embedding, over_fetch, Metric::Cosine)?;
        let now = recalldb_core::now_ms();
        let rows = self.rows.read();

        let mut matches: Vec<ExperienceMatch> = response
            .results
            .into_iter()
            .filter_map(|hit| {
                let experience = rows.get(&hit.id)?.clone();
                Some(ExperienceMatch {
                    similarity: hit.score,
                    experience,
                })
            })
            .filter(|m| self.matches(&m.experience, filters, now))
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.experience.quality.total_cmp(&a.experience.quality))
                .then_with(|| b.experience.ts.cmp(&a.experience.ts))
        });
        matches.truncate(k);
        Ok(matches)
    }

    fn matches(&self, experience: &Experience, filters: &ExperienceFilters, now: i64) -> bool {
        if filters.success_only && !experience.success {
            return false;
        }
        if let Some(domain) = &filters.domain {
            if &experience.domain != domain {
                return false;
            }
        }
        if let Some(min_quality) = filters.min_quality {
            if experience.quality < min_quality {
                return false;
            }
        }
        if let Some(max_age) = filters.max_age_ms {
            if now - experience.ts > max_age {
                return false;
            }
        }
        true
    }

    /// Best experiences in a domain, by quality then recency.
    pub fn best_by_domain(&self, domain: &str, limit: usize) -> Vec<Experience> {
        let rows = self.rows.read();
        let mut best: Vec<Experience> = rows
            .values()
            .filter(|e| e.domain == domain)
            .cloned()
            .collect();
        best.sort_by(|a, b| {
            b.quality
                .total_cmp(&a.quality)
                .then_with(|| b.ts.cmp(&a.ts))
        });
        best.truncate(limit);
        best
    }

    pub fn stats(&self) -> ExperienceStats {
        let rows = self.rows.read();
        let total = rows.len();
        let mut by_domain = BTreeMap::new();
        let mut successes = 0usize;
        let mut quality_sum = 0.0;
        let mut duration_sum = 0.0;
        for experience in rows.values() {
            *by_domain.entry(experience.domain.clone()).or_insert(0) += 1;
            if experience.success {
                successes += 1;
            }
            quality_sum += experience.quality;
            duration_sum += experience.duration_ms as f64;
        }
        ExperienceStats {
            total,
            success_rate: if total == 0 {
                0.0
            } else {
                successes as f64 / total as f64
            },
            avg_quality: if total == 0 { 0.0 } else { quality_sum / total as f64 },
            avg_duration_ms: if total == 0 {
                0.0
            } else {
                duration_sum / total as f64
            },
            by_domain,
        }
    }

    /// Delete low-quality, old experiences.
    ///
    /// A record is a candidate only when its quality is below
    /// `min_quality` AND it is older than `max_age_ms`; the
    /// `keep_minimum` most valuable records (quality, then recency) are
    /// always preserved. Returns the number deleted.
    pub fn prune(&self, options: &PruneOptions) -> Result<usize> {
        let now = recalldb_core::now_ms();
        let protected: Vec<String> = {
            let rows = self.rows.read();
            let mut ranked: Vec<&Experience> = rows.values().collect();
            ranked.sort_by(|a, b| {
                b.quality
                    .total_cmp(&a.quality)
                    .then_with(|| b.ts.cmp(&a.ts))
            });
            ranked
                .into_iter()
                .take(options.keep_minimum)
                .map(|e| e.id.clone())
                .collect()
        };

        let victims: Vec<String> = {
            let rows = self.rows.read();
            rows.values()
                .filter(|e| {
                    e.quality < options.min_quality
                        && now - e.ts > options.max_age_ms
                        && !protected.contains(&e.id)
                })
                .map(|e| e.id.clone())
                .collect()
        };

        for id in &victims {
            self.db.delete(id)?;
            self.rows.write().remove(id);
        }
        if !victims.is_empty() {
            debug!(deleted = victims.len(), "pruned experiences");
        }
        Ok(victims.len())
    }
}
