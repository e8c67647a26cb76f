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

//! RecallDB Core
//!
//! Fundamental types shared by every RecallDB crate: vector records,
//! distance kernels, configuration, errors, and the delta-sync change
//! codec. No I/O happens here.

pub mod config;
pub mod delta;
pub mod distance;
pub mod error;
pub mod record;

pub use config::{
    BackendKind, CacheConfig, DbConfig, EnvConfig, HnswConfig, QuantizerConfig, QuantizerKind,
    DEFAULT_CACHE_SIZE, DEFAULT_MIN_VECTORS_FOR_INDEX, DEFAULT_TRAINING_SAMPLE_SIZE,
};
pub use delta::{resolve, ChangeOp, ShardDelta, VectorChange};
pub use distance::{
    cosine, dot, euclidean, graph_distance, hamming, score_for_metric, similarity, Metric,
};
pub use error::{RecallError, Result};
pub use record::{now_ms, SearchResult, VectorRecord};
