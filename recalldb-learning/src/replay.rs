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

//! Prioritized episodic replay buffer.
//!
//! Priority is `max(|reward|, floor) * exp(-age / half_life)`: strongly
//! rewarding (or punishing) transitions dominate, and everything fades
//! exponentially with age. When full, the lowest-priority entry is
//! evicted; sampling is priority-weighted without replacement.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recalldb_core::{cosine, RecallError, Result};
use serde::{Deserialize, Serialize};

/// One observed state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Vec<f32>,
    /// Tool name that was taken in `state`.
    pub action: String,
    pub reward: f64,
    pub next_state: Vec<f32>,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
}

/// Buffer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayBufferConfig {
    pub capacity: usize,
    /// Fail with `Exhausted` instead of evicting when full.
    pub strict: bool,
    /// Priority floor for near-zero rewards.
    pub priority_floor: f64,
    /// Age at which priority halves, in milliseconds.
    pub half_life_ms: f64,
    pub seed: u64,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            strict: false,
            priority_floor: 1e-3,
            half_life_ms: 60.0 * 60.0 * 1000.0,
            seed: 0x7e57,
        }
    }
}

/// Fixed-capacity prioritized buffer.
pub struct ReplayBuffer {
    config: ReplayBufferConfig,
    entries: Vec<Transition>,
    rng: StdRng,
}

impl ReplayBuffer {
    pub fn new(config: ReplayBufferConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            entries: Vec::new(),
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn priority(&self, transition: &Transition, now: i64) -> f64 {
        let magnitude = transition.reward.abs().max(self.config.priority_floor);
        let age_ms = (now - transition.ts).max(0) as f64;
        magnitude * (-age_ms * std::f64::consts::LN_2 / self.config.half_life_ms).exp()
    }

    /// Append a transition, evicting the lowest-priority entry at
    /// capacity (or failing with `Exhausted` in strict mode).
    pub fn push(&mut self, transition: Transition) -> Result<()> {
        if self.entries.len() >= self.config.capacity {
            if self.config.strict {
                return Err(RecallError::Exhausted(format!(
                    "replay buffer at capacity {}",
                    self.config.capacity
                )));
            }
            let now = recalldb_core::now_ms();
            if let Some(victim) = (0..self.entries.len()).min_by(|&a, &b| {
                self.priority(&self.entries[a], now)
                    .total_cmp(&self.priority(&self.entries[b], now))
            }) {
                self.entries.swap_remove(victim);
            }
        }
        self.entries.push(transition);
        Ok(())
    }

    /// Priority-weighted sample without replacement.
    pub fn sample(&mut self, batch_size: usize) -> Vec<Transition> {
        let now = recalldb_core::now_ms();
        let mut pool: Vec<(f64, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, t)| (self.priority(t, now), i))
            .collect();

        let mut out = Vec::with_capacity(batch_size.min(pool.len()));
        while out.len() < batch_size && !pool.is_empty() {
            let total: f64 = pool.iter().map(|(p, _)| p).sum();
            let picked = if total <= 0.0 {
                self.rng.gen_range(0..pool.len())
            } else {
                let mut draw = self.rng.gen_range(0.0..total);
                let mut picked = pool.len() - 1;
                for (i, (p, _)) in pool.iter().enumerate() {
                    if draw < *p {
                        picked = i;
                        break;
                    }
                    draw -= p;
                }
                picked
            };
            let (_, entry_idx) = pool.swap_remove(picked);
            out.push(self.entries[entry_idx].clone());
        }
        out
    }

    /// The `k` transitions whose states are most similar to `state`.
    pub fn sample_similar(&self, state: &[f32], k: usize) -> Vec<&Transition> {
        let mut scored: Vec<(f32, &Transition)> = self
            .entries
            .iter()
            .filter_map(|t| cosine(state, &t.state).ok().map(|s| (s, t)))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(k).map(|(_, t)| t).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(reward: f64, ts_offset_ms: i64) -> Transition {
        Transition {
            state: vec![reward as f32, 1.0],
            action: "tool".into(),
            reward,
            next_state: vec![0.0, 1.0],
            ts: recalldb_core::now_ms() - ts_offset_ms,
        }
    }

    fn small_buffer(capacity: usize) -> ReplayBuffer {
        ReplayBuffer::new(ReplayBufferConfig {
            capacity,
            ..ReplayBufferConfig::default()
        })
    }

    #[test]
    fn test_eviction_removes_lowest_priority() {
        let mut buffer = small_buffer(3);
        buffer.push(transition(0.9, 0)).unwrap();
        buffer.push(transition(0.01, 0)).unwrap();
        buffer.push(transition(0.8, 0)).unwrap();
        buffer.push(transition(0.7, 0)).unwrap();

        assert_eq!(buffer.len(), 3);
        assert!(buffer.entries.iter().all(|t| t.reward != 0.01));
    }

    #[test]
    fn test_strict_mode_exhausts() {
        let mut buffer = ReplayBuffer::new(ReplayBufferConfig {
            capacity: 1,
            strict: true,
            ..ReplayBufferConfig::default()
        });
        buffer.push(transition(0.5, 0)).unwrap();
        assert!(matches!(
            buffer.push(transition(0.6, 0)),
            Err(RecallError::Exhausted(_))
        ));
    }

    #[test]
    fn test_old_entries_decay() {
        let buffer = small_buffer(10);
        let now = recalldb_core::now_ms();
        let fresh = transition(0.5, 0);
        let stale = transition(0.5, 60 * 60 * 1000); // one half-life old
        let p_fresh = buffer.priority(&fresh, now);
        let p_stale = buffer.priority(&stale, now);
        assert!(p_stale < p_fresh);
        assert!((p_stale / p_fresh - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_sample_without_replacement() {
        let mut buffer = small_buffer(16);
        for i in 0..10 {
            buffer.push(transition(0.1 * i as f64, 0)).unwrap();
        }
        let batch = buffer.sample(10);
        assert_eq!(batch.len(), 10);
        let mut rewards: Vec<u64> = batch.iter().map(|t| (t.reward * 10.0) as u64).collect();
        rewards.sort_unstable();
        rewards.dedup();
        assert_eq!(rewards.len(), 10, "sampling repeated an entry");
    }

    #[test]
    fn test_sample_prefers_high_priority() {
        let mut buffer = small_buffer(64);
        buffer.push(transition(1.0, 0)).unwrap();
        for _ in 0..20 {
            buffer.push(transition(0.001, 0)).unwrap();
        }
        // Across repeated single-draws the high-reward entry dominates.
        let mut high = 0;
        for _ in 0..50 {
            let batch = buffer.sample(1);
            if batch[0].reward == 1.0 {
                high += 1;
            }
        }
        assert!(high > 25, "high-priority entry drawn only {high}/50 times");
    }

    #[test]
    fn test_sample_similar_orders_by_state() {
        let mut buffer = small_buffer(8);
        let mut near = transition(0.5, 0);
        near.state = vec![1.0, 0.0];
        let mut far = transition(0.5, 0);
        far.state = vec![0.0, 1.0];
        buffer.push(near).unwrap();
        buffer.push(far).unwrap();

        let similar = buffer.sample_similar(&[1.0, 0.1], 1);
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].state, vec![1.0, 0.0]);
    }
}
