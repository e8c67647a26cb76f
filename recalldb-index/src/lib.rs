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

//! RecallDB Index Layer
//!
//! Approximate-nearest-neighbor structures over the storage layer:
//!
//! - **HNSW** (`hnsw`): a from-scratch layered small-world graph with
//!   deterministic seeded level assignment, diversity-heuristic neighbor
//!   selection, tombstone deletes, and a brute-force fallback.
//! - **Quantizers** (`quant`): scalar, product, residual, and binary
//!   codecs behind one tagged enum, each with train / encode / decode /
//!   asymmetric-distance.
//! - **Query cache** (`cache`): exact-fingerprint result cache with TTL
//!   expiry and least-recently-used eviction.

pub mod cache;
pub mod hnsw;
pub mod quant;

pub use cache::{CacheStats, QueryCache};
pub use hnsw::{HnswIndex, HnswStats};
pub use quant::{Code, PreparedQuery, Quantizer, QuantizerStats};
