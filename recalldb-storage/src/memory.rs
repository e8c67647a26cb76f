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

//! In-process storage backend.

use crate::backend::{validate_batch, StorageStats, VectorStore};
use recalldb_core::{RecallError, Result, VectorRecord};
use std::collections::BTreeMap;

/// Volatile backend holding everything in a BTreeMap.
pub struct MemoryBackend {
    dimension: usize,
    records: BTreeMap<String, VectorRecord>,
    hnsw_region: Option<Vec<u8>>,
    quantizer_region: Option<Vec<u8>>,
}

impl MemoryBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: BTreeMap::new(),
            hnsw_region: None,
            quantizer_region: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl VectorStore for MemoryBackend {
    fn put(&mut self, record: VectorRecord) -> Result<()> {
        if record.embedding.len() != self.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.dimension,
                actual: record.embedding.len(),
            });
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn put_batch(&mut self, records: Vec<VectorRecord>) -> Result<()> {
        validate_batch(self.dimension, &records)?;
        for record in records {
            self.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.records.get(id)
    }

    fn delete(&mut self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    fn scan(&self) -> Box<dyn Iterator<Item = &VectorRecord> + '_> {
        Box::new(self.records.values())
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn stats(&self) -> StorageStats {
        StorageStats {
            count: self.records.len(),
            bytes_on_disk: 0,
        }
    }

    fn set_aux_regions(&mut self, hnsw: Option<Vec<u8>>, quantizer: Option<Vec<u8>>) {
        self.hnsw_region = hnsw;
        self.quantizer_region = quantizer;
    }

    fn aux_regions(&self) -> (Option<&[u8]>, Option<&[u8]>) {
        (self.hnsw_region.as_deref(), self.quantizer_region.as_deref())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.hnsw_region = None;
        self.quantizer_region = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> VectorRecord {
        VectorRecord::new(id, vec![1.0, 2.0], json!({}))
    }

    #[test]
    fn test_put_get_delete() {
        let mut store = MemoryBackend::new(2);
        store.put(record("a")).unwrap();
        assert!(store.get("a").is_some());
        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_dimension_enforced() {
        let mut store = MemoryBackend::new(3);
        let err = store.put(record("a")).unwrap_err();
        assert!(matches!(
            err,
            RecallError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_put_batch_all_or_nothing() {
        let mut store = MemoryBackend::new(2);
        let bad = VectorRecord::new("bad", vec![1.0], json!({}));
        let result = store.put_batch(vec![record("a"), bad, record("b")]);
        assert!(result.is_err());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_overwrite_same_id() {
        let mut store = MemoryBackend::new(2);
        store.put(record("a")).unwrap();
        let mut updated = record("a");
        updated.embedding = vec![9.0, 9.0];
        store.put(updated).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().embedding, vec![9.0, 9.0]);
    }
}
