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

//! The storage backend contract.
//!
//! Callers (the `VectorDb` facade) serialize access externally with a
//! readers-writer lock, so write methods take `&mut self` and reads take
//! `&self`. A `scan` borrows the backend for its whole iteration and sees
//! a consistent snapshot by construction.

use recalldb_core::{RecallError, Result, VectorRecord};
use serde::{Deserialize, Serialize};

/// Counters reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Live record count.
    pub count: usize,
    /// Bytes occupied on disk; 0 for the in-memory backend.
    pub bytes_on_disk: u64,
}

/// Contract shared by the on-disk and in-memory backends.
pub trait VectorStore: Send + Sync {
    /// Write or overwrite one full record.
    fn put(&mut self, record: VectorRecord) -> Result<()>;

    /// Write many records; on any failure no record becomes visible.
    fn put_batch(&mut self, records: Vec<VectorRecord>) -> Result<()>;

    /// Point lookup by id.
    fn get(&self, id: &str) -> Option<&VectorRecord>;

    /// Remove a record; returns whether it existed.
    fn delete(&mut self, id: &str) -> bool;

    /// Enumerate all live records. Order is unspecified.
    fn scan(&self) -> Box<dyn Iterator<Item = &VectorRecord> + '_>;

    /// Live record count.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backend counters.
    fn stats(&self) -> StorageStats;

    /// Attach the opaque index/quantizer regions persisted alongside the
    /// records. The index layer owns their encoding.
    fn set_aux_regions(&mut self, hnsw: Option<Vec<u8>>, quantizer: Option<Vec<u8>>);

    /// The opaque regions currently attached.
    fn aux_regions(&self) -> (Option<&[u8]>, Option<&[u8]>);

    /// Persist pending state. A no-op for the in-memory backend.
    fn flush(&mut self) -> Result<()>;

    /// Drop every record and aux region.
    fn clear(&mut self) -> Result<()>;
}

/// Validate that every record in a batch matches `dimension`.
///
/// Run before any record is applied so `put_batch` stays all-or-nothing.
pub(crate) fn validate_batch(dimension: usize, records: &[VectorRecord]) -> Result<()> {
    for record in records {
        if record.embedding.len() != dimension {
            return Err(RecallError::DimensionMismatch {
                expected: dimension,
                actual: record.embedding.len(),
            });
        }
    }
    Ok(())
}
