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

//! On-disk storage backend.
//!
//! Keeps the working set in memory and persists through the RCDB
//! container. Every flush writes a sibling temp file and renames it over
//! the container, so readers never observe a torn file. Deletes free
//! space at the next flush (the container is rewritten whole, which is
//! the compaction).

use crate::backend::{validate_batch, StorageStats, VectorStore};
use crate::container::Container;
use recalldb_core::{RecallError, Result, VectorRecord};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable backend persisting to a single RCDB container file.
#[derive(Debug)]
pub struct DiskBackend {
    path: PathBuf,
    dimension: usize,
    records: BTreeMap<String, VectorRecord>,
    hnsw_region: Option<Vec<u8>>,
    quantizer_region: Option<Vec<u8>>,
    dirty: bool,
}

impl DiskBackend {
    /// Open an existing container or create an empty one.
    ///
    /// An existing container must carry the expected dimension.
    pub fn open(path: impl Into<PathBuf>, dimension: usize) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            let file = File::open(&path)?;
            let container = Container::read_from(&mut BufReader::new(file))?;
            if container.dimension as usize != dimension {
                return Err(RecallError::DimensionMismatch {
                    expected: dimension,
                    actual: container.dimension as usize,
                });
            }
            let records = container
                .records
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect();
            debug!(path = %path.display(), "opened existing container");
            return Ok(Self {
                path,
                dimension,
                records,
                hnsw_region: container.hnsw_region,
                quantizer_region: container.quantizer_region,
                dirty: false,
            });
        }
        let backend = Self {
            path,
            dimension,
            records: BTreeMap::new(),
            hnsw_region: None,
            quantizer_region: None,
            dirty: true,
        };
        Ok(backend)
    }

    /// Dimension recorded in an existing container's header.
    pub fn peek_dimension(path: &Path) -> Result<usize> {
        let file = File::open(path)?;
        let header = Container::peek_header(&mut BufReader::new(file))?;
        Ok(header.dimension as usize)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_container(&self) -> Result<()> {
        let mut container = Container::new(
            self.dimension as u32,
            self.records.values().cloned().collect(),
        );
        container.hnsw_region = self.hnsw_region.clone();
        container.quantizer_region = self.quantizer_region.clone();

        let tmp = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            container.write_to(&mut writer)?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl VectorStore for DiskBackend {
    fn put(&mut self, record: VectorRecord) -> Result<()> {
        if record.embedding.len() != self.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.dimension,
                actual: record.embedding.len(),
            });
        }
        self.records.insert(record.id.clone(), record);
        self.dirty = true;
        self.flush()
    }

    fn put_batch(&mut self, records: Vec<VectorRecord>) -> Result<()> {
        validate_batch(self.dimension, &records)?;
        for record in records {
            self.records.insert(record.id.clone(), record);
        }
        self.dirty = true;
        self.flush()
    }

    fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.records.get(id)
    }

    fn delete(&mut self, id: &str) -> bool {
        let existed = self.records.remove(id).is_some();
        if existed {
            self.dirty = true;
            // Compaction happens at flush; a failed flush keeps dirty set.
            let _ = self.flush();
        }
        existed
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
            bytes_on_disk: fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
        }
    }

    fn set_aux_regions(&mut self, hnsw: Option<Vec<u8>>, quantizer: Option<Vec<u8>>) {
        self.hnsw_region = hnsw;
        self.quantizer_region = quantizer;
        self.dirty = true;
    }

    fn aux_regions(&self) -> (Option<&[u8]>, Option<&[u8]>) {
        (self.hnsw_region.as_deref(), self.quantizer_region.as_deref())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.write_container()?;
        self.dirty = false;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.hnsw_region = None;
        self.quantizer_region = None;
        self.dirty = true;
        self.flush()
    }
}
