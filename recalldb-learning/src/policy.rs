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

//! Tabular Q-learning.
//!
//! States are discretized fingerprints of the state vector (a rounded
//! prefix), actions are tool-name strings, and the table maps
//! `(state, action)` to a Q-value updated by the standard TD rule
//! `Q ← Q + α (r + γ maxₐ′ Q(s′, a′) − Q)`. Selection is ε-greedy over a
//! caller-supplied candidate set; ties break by action name so two
//! policies with the same table pick the same action.

use crate::replay::Transition;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recalldb_core::{RecallError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Q-learning hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Learning rate α.
    pub alpha: f64,
    /// Discount factor γ.
    pub gamma: f64,
    /// Exploration probability ε.
    pub epsilon: f64,
    /// State-vector prefix length folded into the state key.
    pub state_prefix_dims: usize,
    pub seed: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.9,
            epsilon: 0.1,
            state_prefix_dims: 8,
            seed: 0x0217,
        }
    }
}

/// Result of one training pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TrainReport {
    pub experiences_processed: usize,
    pub mean_td_error: f64,
}

/// Serializable Q-table snapshot with its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub alpha: f64,
    pub gamma: f64,
    pub epsilon: f64,
    pub entries: Vec<(String, Vec<(String, f64)>)>,
}

impl PolicySnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| RecallError::invalid(format!("policy encode: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| RecallError::corruption(format!("policy snapshot: {e}")))
    }
}

/// ε-greedy tabular Q policy.
#[derive(Debug, Clone)]
pub struct PolicyOptimizer {
    config: PolicyConfig,
    /// state key -> action -> Q-value.
    q: HashMap<String, HashMap<String, f64>>,
    rng: StdRng,
}

impl PolicyOptimizer {
    pub fn new(config: PolicyConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            q: HashMap::new(),
            rng,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Number of distinct states in the table.
    pub fn state_count(&self) -> usize {
        self.q.len()
    }

    /// Discretized fingerprint of a state vector.
    pub fn state_key(&self, state: &[f32]) -> String {
        state
            .iter()
            .take(self.config.state_prefix_dims)
            .map(|x| format!("{:.3}", x))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Current Q-value; unseen pairs read as zero.
    pub fn q_value(&self, state: &[f32], action: &str) -> f64 {
        let key = self.state_key(state);
        self.q
            .get(&key)
            .and_then(|actions| actions.get(action))
            .copied()
            .unwrap_or(0.0)
    }

    fn max_q(&self, state_key: &str) -> f64 {
        self.q
            .get(state_key)
            .and_then(|actions| {
                actions
                    .values()
                    .copied()
                    .max_by(|a, b| a.total_cmp(b))
            })
            .unwrap_or(0.0)
    }

    /// Roll the exploration dice: `Some(random candidate)` with
    /// probability ε, `None` when the caller should exploit.
    pub fn explore(&mut self, candidates: &[String]) -> Option<String> {
        if candidates.is_empty() || self.rng.gen::<f64>() >= self.config.epsilon {
            return None;
        }
        Some(candidates[self.rng.gen_range(0..candidates.len())].clone())
    }

    /// ε-greedy selection over the candidate set.
    pub fn select_action(&mut self, state: &[f32], candidates: &[String]) -> Result<String> {
        if candidates.is_empty() {
            return Err(RecallError::invalid("candidate set is empty"));
        }
        if self.rng.gen::<f64>() < self.config.epsilon {
            let pick = self.rng.gen_range(0..candidates.len());
            return Ok(candidates[pick].clone());
        }
        let key = self.state_key(state);
        let empty = HashMap::new();
        let actions = self.q.get(&key).unwrap_or(&empty);
        let best = candidates
            .iter()
            .map(|c| (actions.get(c).copied().unwrap_or(0.0), c))
            .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.cmp(a.1)))
            .map(|(_, c)| c.clone());
        best.ok_or_else(|| RecallError::invalid("candidate set is empty"))
    }

    /// Apply the TD update for every transition in the batch.
    pub fn train(&mut self, batch: &[Transition]) -> TrainReport {
        let mut td_sum = 0.0;
        for transition in batch {
            let state_key = self.state_key(&transition.state);
            let next_key = self.state_key(&transition.next_state);
            let max_next = self.max_q(&next_key);
            let entry = self
                .q
                .entry(state_key)
                .or_default()
                .entry(transition.action.clone())
                .or_insert(0.0);
            let td = transition.reward + self.config.gamma * max_next - *entry;
            *entry += self.config.alpha * td;
            td_sum += td.abs();
        }
        TrainReport {
            experiences_processed: batch.len(),
            mean_td_error: if batch.is_empty() {
                0.0
            } else {
                td_sum / batch.len() as f64
            },
        }
    }

    /// Snapshot the table and hyperparameters.
    pub fn snapshot(&self) -> PolicySnapshot {
        let mut entries: Vec<(String, Vec<(String, f64)>)> = self
            .q
            .iter()
            .map(|(state, actions)| {
                let mut actions: Vec<(String, f64)> =
                    actions.iter().map(|(a, &v)| (a.clone(), v)).collect();
                actions.sort_by(|a, b| a.0.cmp(&b.0));
                (state.clone(), actions)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        PolicySnapshot {
            alpha: self.config.alpha,
            gamma: self.config.gamma,
            epsilon: self.config.epsilon,
            entries,
        }
    }

    /// Rebuild a policy from a snapshot.
    pub fn from_snapshot(snapshot: &PolicySnapshot, seed: u64) -> Self {
        let config = PolicyConfig {
            alpha: snapshot.alpha,
            gamma: snapshot.gamma,
            epsilon: snapshot.epsilon,
            seed,
            ..PolicyConfig::default()
        };
        let mut policy = Self::new(config);
        for (state, actions) in &snapshot.entries {
            policy
                .q
                .insert(state.clone(), actions.iter().cloned().collect());
        }
        policy
    }

    /// Merge another policy's table, scaled by `weight`.
    ///
    /// States present only in the source contribute `weight * Q_src`;
    /// states present in both average with the local value keeping unit
    /// weight.
    pub fn merge_from(&mut self, other: &PolicyOptimizer, weight: f64) {
        for (state, actions) in &other.q {
            let local = self.q.entry(state.clone()).or_default();
            for (action, &q_src) in actions {
                match local.get_mut(action) {
                    Some(q_dst) => *q_dst = (*q_dst + weight * q_src) / (1.0 + weight),
                    None => {
                        local.insert(action.clone(), weight * q_src);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(state: Vec<f32>, action: &str, reward: f64, next: Vec<f32>) -> Transition {
        Transition {
            state,
            action: action.into(),
            reward,
            next_state: next,
            ts: recalldb_core::now_ms(),
        }
    }

    fn greedy_config() -> PolicyConfig {
        PolicyConfig {
            epsilon: 0.0,
            ..PolicyConfig::default()
        }
    }

    #[test]
    fn test_state_key_rounds_prefix() {
        let policy = PolicyOptimizer::new(PolicyConfig::default());
        let a = policy.state_key(&[0.12345, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 99.0]);
        let b = policy.state_key(&[0.12349, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, -7.0]);
        // Sub-precision jitter and dims past the prefix do not matter.
        assert_eq!(a, b);
        let c = policy.state_key(&[0.2, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 0.0]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_td_update_moves_toward_reward() {
        let mut policy = PolicyOptimizer::new(greedy_config());
        let s = vec![0.0, 0.0];
        let t = transition(s.clone(), "lint", 1.0, s.clone());
        let report = policy.train(&[t.clone()]);
        assert_eq!(report.experiences_processed, 1);
        assert!((report.mean_td_error - 1.0).abs() < 1e-9);
        // One step of α = 0.1 toward reward 1.0.
        assert!((policy.q_value(&s, "lint") - 0.1).abs() < 1e-9);

        for _ in 0..1000 {
            policy.train(&[t.clone()]);
        }
        // Fixed point of Q = r + γ Q is r / (1 − γ) = 10.
        assert!((policy.q_value(&s, "lint") - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_greedy_selection_picks_argmax() {
        let mut policy = PolicyOptimizer::new(greedy_config());
        let s = vec![0.5, 0.5];
        policy.train(&[
            transition(s.clone(), "good", 1.0, s.clone()),
            transition(s.clone(), "bad", 0.0, s.clone()),
        ]);
        let candidates = vec!["bad".to_string(), "good".to_string()];
        assert_eq!(policy.select_action(&s, &candidates).unwrap(), "good");
    }

    #[test]
    fn test_tie_breaks_by_action_name() {
        let mut policy = PolicyOptimizer::new(greedy_config());
        let s = vec![0.0];
        let candidates = vec!["zeta".to_string(), "alpha".to_string()];
        // No data: all Q are zero, lexicographically first action wins.
        assert_eq!(policy.select_action(&s, &candidates).unwrap(), "alpha");
    }

    #[test]
    fn test_epsilon_one_explores() {
        let mut policy = PolicyOptimizer::new(PolicyConfig {
            epsilon: 1.0,
            ..PolicyConfig::default()
        });
        let s = vec![0.0];
        let candidates: Vec<String> = (0..4).map(|i| format!("t{i}")).collect();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(policy.select_action(&s, &candidates).unwrap());
        }
        assert!(seen.len() > 1, "ε = 1 never explored");
    }

    #[test]
    fn test_empty_candidates_rejected() {
        let mut policy = PolicyOptimizer::new(PolicyConfig::default());
        assert!(policy.select_action(&[0.0], &[]).is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut policy = PolicyOptimizer::new(greedy_config());
        let s = vec![0.1, 0.2];
        policy.train(&[transition(s.clone(), "lint", 0.8, s.clone())]);

        let bytes = policy.snapshot().to_bytes().unwrap();
        let restored =
            PolicyOptimizer::from_snapshot(&PolicySnapshot::from_bytes(&bytes).unwrap(), 1);
        assert_eq!(restored.q_value(&s, "lint"), policy.q_value(&s, "lint"));
        assert_eq!(restored.config().gamma, policy.config().gamma);
    }

    #[test]
    fn test_merge_weighted() {
        let mut dst = PolicyOptimizer::new(greedy_config());
        let mut src = PolicyOptimizer::new(greedy_config());
        let s = vec![0.0];
        dst.train(&[transition(s.clone(), "shared", 1.0, s.clone())]); // 0.1
        src.train(&[
            transition(s.clone(), "shared", 1.0, s.clone()),
            transition(s.clone(), "only_src", 1.0, s.clone()),
        ]);
        let src_shared = src.q_value(&s, "shared");
        let src_only = src.q_value(&s, "only_src");

        dst.merge_from(&src, 0.5);
        assert!((dst.q_value(&s, "only_src") - 0.5 * src_only).abs() < 1e-9);
        let expected = (0.1 + 0.5 * src_shared) / 1.5;
        assert!((dst.q_value(&s, "shared") - expected).abs() < 1e-9);
    }
}
