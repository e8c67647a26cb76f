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

//! Vector records and search results.
//!
//! A [`VectorRecord`] is the unit of storage: a stable string id, a dense
//! f32 embedding whose length equals the database dimension, a metadata
//! tree, and a creation timestamp. Metadata is a `serde_json::Value`
//! object; the `preserve_order` feature keeps key insertion order stable
//! across export/import.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch, from the system clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A stored vector with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Stable identifier; immutable for the record's lifetime.
    pub id: String,
    /// Dense embedding, length fixed by the database dimension.
    pub embedding: Vec<f32>,
    /// Arbitrary JSON-shaped metadata (object at the top level).
    #[serde(default)]
    pub metadata: Value,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl VectorRecord {
    /// Create a record with a caller-chosen id and the current timestamp.
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, metadata: Value) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata,
            created_at: now_ms(),
        }
    }

    /// Create a record with a freshly generated v4 UUID id.
    pub fn with_generated_id(embedding: Vec<f32>, metadata: Value) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), embedding, metadata)
    }

    /// Approximate in-memory footprint in bytes.
    pub fn approx_bytes(&self) -> usize {
        self.id.len()
            + self.embedding.len() * std::mem::size_of::<f32>()
            + self.metadata.to_string().len()
            + std::mem::size_of::<i64>()
    }

    /// Top-level metadata string field, if present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Id of the matching record.
    pub id: String,
    /// Similarity score; higher is better for every metric.
    pub score: f32,
    /// Metadata of the matching record.
    pub metadata: Value,
}

impl SearchResult {
    pub fn new(id: impl Into<String>, score: f32, metadata: Value) -> Self {
        Self {
            id: id.into(),
            score,
            metadata,
        }
    }
}
