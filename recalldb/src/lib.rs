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

//! RecallDB
//!
//! Embeddable vector database for agentic runtimes: durable or in-memory
//! storage of dense embeddings with metadata, HNSW-accelerated similarity
//! search with a brute-force fallback, optional quantized two-stage
//! search, and a TTL+LRU query cache.
//!
//! ```no_run
//! use recalldb::{DbConfig, InsertRequest, Metric, VectorDb};
//! use serde_json::json;
//!
//! let db = VectorDb::in_memory(DbConfig::in_memory(3)).unwrap();
//! let id = db
//!     .insert(InsertRequest::new(vec![1.0, 0.0, 0.0]).with_metadata(json!({"doc": "a"})))
//!     .unwrap();
//! let results = db.search(&[1.0, 0.0, 0.0], 1, Metric::Cosine).unwrap();
//! assert_eq!(results.results[0].id, id);
//! ```

pub mod db;

pub use db::{
    DbStats, DeadlinePolicy, InsertRequest, SearchOptions, SearchResponse, VectorDb,
};

// Re-export the pieces callers need to configure and drive a database.
pub use recalldb_core::{
    BackendKind, CacheConfig, DbConfig, HnswConfig, Metric, QuantizerConfig, QuantizerKind,
    RecallError, Result, SearchResult, VectorRecord,
};
