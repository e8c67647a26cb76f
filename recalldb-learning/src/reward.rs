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

//! Multi-dimensional reward shaping.
//!
//! Reward composition is the fixed weighted formula below; arbitrary
//! caller-supplied reward functions are deliberately unsupported. The
//! arithmetic is total: divisions are guarded and every component clamps
//! into [0, 1], so the total is in [0, 1] for all finite inputs.

use serde::{Deserialize, Serialize};

/// Component weights; the defaults sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub success: f64,
    pub efficiency: f64,
    pub quality: f64,
    pub cost: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            success: 0.4,
            efficiency: 0.3,
            quality: 0.2,
            cost: 0.1,
        }
    }
}

/// Reward estimator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub weights: RewardWeights,
    /// Execution time at which the efficiency component reaches zero.
    pub target_ms: u64,
    /// Token spend at which the cost component reaches zero.
    pub token_budget: u64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            weights: RewardWeights::default(),
            target_ms: 1000,
            token_budget: 1000,
        }
    }
}

/// What happened when a tool ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub execution_ms: u64,
    pub tokens_used: Option<u64>,
    /// Caller-supplied quality in [0, 1]; defaults to 0.5.
    pub quality: Option<f64>,
}

impl Outcome {
    pub fn success(execution_ms: u64) -> Self {
        Self {
            success: true,
            execution_ms,
            tokens_used: None,
            quality: None,
        }
    }

    pub fn failure(execution_ms: u64) -> Self {
        Self {
            success: false,
            execution_ms,
            tokens_used: None,
            quality: None,
        }
    }

    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = Some(tokens_used);
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// Per-component scores plus the weighted total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub success: f64,
    pub efficiency: f64,
    pub quality: f64,
    pub cost: f64,
    pub total: f64,
}

/// Computes rewards from outcomes.
#[derive(Debug, Clone, Default)]
pub struct RewardEstimator {
    config: RewardConfig,
}

impl RewardEstimator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn estimate(&self, outcome: &Outcome) -> RewardBreakdown {
        let success = if outcome.success { 1.0 } else { 0.0 };

        let efficiency = if self.config.target_ms == 0 {
            0.0
        } else {
            (1.0 - outcome.execution_ms as f64 / self.config.target_ms as f64).max(0.0)
        };

        let quality = outcome
            .quality
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let quality = if quality.is_nan() { 0.0 } else { quality };

        // Spending no tokens is a perfect cost score.
        let cost = match (outcome.tokens_used, self.config.token_budget) {
            (None, _) => 1.0,
            (_, 0) => 0.0,
            (Some(tokens), budget) => (1.0 - tokens as f64 / budget as f64).max(0.0),
        };

        let w = self.config.weights;
        let total = (w.success * success
            + w.efficiency * efficiency
            + w.quality * quality
            + w.cost * cost)
            .clamp(0.0, 1.0);
        RewardBreakdown {
            success,
            efficiency,
            quality,
            cost,
            total,
        }
    }
}
