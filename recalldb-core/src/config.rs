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

//! Database configuration.
//!
//! Everything is passed explicitly through constructors; there are no
//! module-level singletons. [`EnvConfig`] is the one place that reads
//! process environment variables, and only the CLI applies it.

use crate::distance::Metric;
use crate::error::{RecallError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of cached query results.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Default vector count at which the HNSW graph is built.
pub const DEFAULT_MIN_VECTORS_FOR_INDEX: usize = 1000;

/// Default minimum sample count for quantizer training.
pub const DEFAULT_TRAINING_SAMPLE_SIZE: usize = 1000;

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Volatile in-process store.
    #[default]
    InMemory,
    /// Durable single-file container store.
    OnDisk,
}

/// HNSW graph parameters, fixed at index creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Target neighbor count per layer above 0.
    pub m: usize,
    /// Candidate-queue width during insert.
    pub ef_construction: usize,
    /// Candidate-queue width during query; raised to k when k is larger.
    pub ef_search: usize,
    /// Vector count at which the graph is built.
    pub min_vectors_for_index: usize,
    /// Seed for the level-assignment RNG.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            min_vectors_for_index: DEFAULT_MIN_VECTORS_FOR_INDEX,
            seed: 0x5eed_cafe,
        }
    }
}

impl HnswConfig {
    /// Neighbor cap on layer 0.
    pub fn m0(&self) -> usize {
        self.m * 2
    }

    /// Level-assignment multiplier, 1/ln(M).
    pub fn level_mult(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(RecallError::invalid("hnsw m must be at least 2"));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(RecallError::invalid(
                "hnsw ef_construction and ef_search must be positive",
            ));
        }
        Ok(())
    }
}

/// Query-result cache parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached entries; 0 disables the cache.
    pub max_size: usize,
    /// Entry time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Whether hit/miss/timing counters are maintained.
    pub stats_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_CACHE_SIZE,
            ttl_ms: 5 * 60 * 1000,
            stats_enabled: true,
        }
    }
}

/// Quantizer variant selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizerKind {
    /// Per-dimension affine mapping to `bits`-wide integers.
    Scalar { bits: u8 },
    /// Product quantization: `m` sub-spaces, `2^nbits` centroids each.
    Product { m: usize, nbits: u8 },
    /// Stacked product quantizers over successive residuals.
    Residual { layers: usize, m: usize, nbits: u8 },
    /// One threshold bit per dimension.
    Binary,
}

/// Quantizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizerConfig {
    pub kind: QuantizerKind,
    /// Minimum training sample count; training fails below this.
    pub training_sample_size: usize,
    /// Seed for k-means initialization.
    pub seed: u64,
    /// Stage-1 over-fetch multiplier for two-stage search.
    pub rerank_factor: usize,
}

impl QuantizerConfig {
    pub fn new(kind: QuantizerKind) -> Self {
        Self {
            kind,
            training_sample_size: DEFAULT_TRAINING_SAMPLE_SIZE,
            seed: 0x9e37_79b9,
            rerank_factor: 4,
        }
    }

    pub fn validate(&self, dimension: usize) -> Result<()> {
        match self.kind {
            QuantizerKind::Scalar { bits } => {
                if !matches!(bits, 4 | 8 | 16) {
                    return Err(RecallError::invalid("scalar bits must be 4, 8, or 16"));
                }
            }
            QuantizerKind::Product { m, nbits }
            | QuantizerKind::Residual { m, nbits, .. } => {
                if m == 0 || dimension % m != 0 {
                    return Err(RecallError::invalid(format!(
                        "product m={m} must divide dimension {dimension}"
                    )));
                }
                if nbits == 0 || nbits > 8 {
                    return Err(RecallError::invalid("product nbits must be in 1..=8"));
                }
            }
            QuantizerKind::Binary => {}
        }
        if let QuantizerKind::Residual { layers, .. } = self.kind {
            if layers == 0 {
                return Err(RecallError::invalid("residual layers must be positive"));
            }
        }
        if self.rerank_factor == 0 {
            return Err(RecallError::invalid("rerank_factor must be positive"));
        }
        Ok(())
    }
}

/// Top-level database configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Embedding dimension, fixed at construction.
    pub dimension: usize,
    /// Metric the graph index orders by. Searches in another metric take
    /// the exact scan path.
    pub metric: Metric,
    /// Backend selector.
    pub backend: BackendKind,
    /// Container path; required for the on-disk backend.
    pub path: Option<PathBuf>,
    /// Graph index parameters.
    pub hnsw: HnswConfig,
    /// Query cache parameters.
    pub cache: CacheConfig,
    /// Optional quantizer; `None` keeps full-precision search.
    pub quantizer: Option<QuantizerConfig>,
    /// Fail inserts whose id already exists instead of overwriting.
    pub strict_insert: bool,
}

impl DbConfig {
    /// In-memory configuration with defaults for everything else.
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            dimension,
            metric: Metric::Cosine,
            backend: BackendKind::InMemory,
            path: None,
            hnsw: HnswConfig::default(),
            cache: CacheConfig::default(),
            quantizer: None,
            strict_insert: false,
        }
    }

    /// On-disk configuration rooted at `path`.
    pub fn on_disk(dimension: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            backend: BackendKind::OnDisk,
            path: Some(path.into()),
            ..Self::in_memory(dimension)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RecallError::invalid("dimension must be positive"));
        }
        if self.backend == BackendKind::OnDisk && self.path.is_none() {
            return Err(RecallError::invalid("on-disk backend requires a path"));
        }
        self.hnsw.validate()?;
        if let Some(q) = &self.quantizer {
            q.validate(self.dimension)?;
        }
        Ok(())
    }
}

/// Environment variables recognized by the tooling around the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    /// `DB_PATH`: default container location.
    pub db_path: Option<PathBuf>,
    /// `LOG_LEVEL`: tracing filter directive, defaults to `info`.
    pub log_level: String,
    /// `CACHE_SIZE`: query-cache capacity override.
    pub cache_size: Option<usize>,
    /// `WORKERS`: worker thread count, defaults to the logical CPU count.
    pub workers: Option<usize>,
}

impl EnvConfig {
    /// Read the recognized variables from the process environment.
    ///
    /// Malformed numeric values are ignored rather than fatal.
    pub fn from_env() -> Self {
        let parse_usize = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
        };
        Self {
            db_path: std::env::var("DB_PATH").ok().map(PathBuf::from),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            cache_size: parse_usize("CACHE_SIZE"),
            workers: parse_usize("WORKERS"),
        }
    }

    /// Fold the overrides into a database configuration.
    pub fn apply(&self, mut config: DbConfig) -> DbConfig {
        if let Some(size) = self.cache_size {
            config.cache.max_size = size;
        }
        if config.path.is_none() {
            config.path = self.db_path.clone();
        }
        config
    }
}
