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

//! RCDB container format.
//!
//! Single-file layout: a fixed header, a record region, optional opaque
//! HNSW and quantizer regions, and JSON index tables over the `domain`
//! and `task_type` metadata fields. All integers are little-endian.
//! Embeddings are stored as raw little-endian f32 sequences; metadata is
//! JSON text (portable, key order preserved).
//!
//! The header carries an XXH64 checksum over its fixed fields. A magic or
//! checksum mismatch reads as `Corruption`; a version mismatch reads as
//! `UnsupportedVersion`. Bit-exact compatibility across versions is not
//! promised.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use recalldb_core::{RecallError, Result, VectorRecord};
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::io::{Read, Write};
use twox_hash::XxHash64;

/// Container magic: `RCDBV1\0\0`.
pub const CONTAINER_MAGIC: &[u8; 8] = b"RCDBV1\0\0";

/// Current container format version.
pub const CONTAINER_VERSION: u32 = 1;

/// Flag bit: an HNSW region follows the records.
pub const FLAG_HAS_HNSW: u32 = 1;

/// Flag bit: a quantizer region is present.
pub const FLAG_HAS_QUANTIZER: u32 = 1 << 1;

/// Single record too large to be plausible; guards corrupt length prefixes.
const MAX_FIELD_LEN: u32 = 256 * 1024 * 1024;

/// Metadata index tables: field name -> field value -> record ids.
pub type IndexTables = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Fields the container indexes at write time.
const INDEXED_FIELDS: [&str; 2] = ["domain", "task_type"];

/// Fixed container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u32,
    pub dimension: u32,
    pub flags: u32,
    pub record_count: u64,
}

impl ContainerHeader {
    fn checksum(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(CONTAINER_MAGIC);
        hasher.write(&self.version.to_le_bytes());
        hasher.write(&self.dimension.to_le_bytes());
        hasher.write(&self.flags.to_le_bytes());
        hasher.write(&self.record_count.to_le_bytes());
        hasher.finish()
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(CONTAINER_MAGIC)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.dimension)?;
        w.write_u32::<LittleEndian>(self.flags)?;
        w.write_u64::<LittleEndian>(self.record_count)?;
        w.write_u64::<LittleEndian>(self.checksum())?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != CONTAINER_MAGIC {
            return Err(RecallError::corruption("bad container magic"));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != CONTAINER_VERSION {
            return Err(RecallError::UnsupportedVersion(version));
        }
        let header = Self {
            version,
            dimension: r.read_u32::<LittleEndian>()?,
            flags: r.read_u32::<LittleEndian>()?,
            record_count: r.read_u64::<LittleEndian>()?,
        };
        let stored = r.read_u64::<LittleEndian>()?;
        if stored != header.checksum() {
            return Err(RecallError::corruption("header checksum mismatch"));
        }
        Ok(header)
    }
}

/// A fully decoded container.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub dimension: u32,
    pub records: Vec<VectorRecord>,
    pub hnsw_region: Option<Vec<u8>>,
    pub quantizer_region: Option<Vec<u8>>,
    pub index_tables: IndexTables,
}

impl Container {
    pub fn new(dimension: u32, records: Vec<VectorRecord>) -> Self {
        let index_tables = build_index_tables(&records);
        Self {
            dimension,
            records,
            hnsw_region: None,
            quantizer_region: None,
            index_tables,
        }
    }

    /// Encode the whole container.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Decode a container from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        Self::read_from(&mut cursor)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut flags = 0;
        if self.hnsw_region.is_some() {
            flags |= FLAG_HAS_HNSW;
        }
        if self.quantizer_region.is_some() {
            flags |= FLAG_HAS_QUANTIZER;
        }
        let header = ContainerHeader {
            version: CONTAINER_VERSION,
            dimension: self.dimension,
            flags,
            record_count: self.records.len() as u64,
        };
        header.write_to(w)?;

        for record in &self.records {
            write_record(w, record)?;
        }
        if let Some(region) = &self.hnsw_region {
            write_region(w, region)?;
        }
        if let Some(region) = &self.quantizer_region {
            write_region(w, region)?;
        }
        let tables = serde_json::to_vec(&self.index_tables)
            .map_err(|e| RecallError::invalid(format!("index table encode: {e}")))?;
        write_region(w, &tables)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let header = ContainerHeader::read_from(r)?;
        let mut records = Vec::with_capacity(header.record_count.min(1 << 20) as usize);
        for _ in 0..header.record_count {
            records.push(read_record(r, header.dimension)?);
        }
        let hnsw_region = if header.flags & FLAG_HAS_HNSW != 0 {
            Some(read_region(r)?)
        } else {
            None
        };
        let quantizer_region = if header.flags & FLAG_HAS_QUANTIZER != 0 {
            Some(read_region(r)?)
        } else {
            None
        };
        let tables = read_region(r)?;
        let index_tables: IndexTables = serde_json::from_slice(&tables)?;
        Ok(Self {
            dimension: header.dimension,
            records,
            hnsw_region,
            quantizer_region,
            index_tables,
        })
    }

    /// Read only the header, e.g. to learn the dimension of an existing
    /// container before opening it.
    pub fn peek_header<R: Read>(r: &mut R) -> Result<ContainerHeader> {
        ContainerHeader::read_from(r)
    }
}

/// Build index tables over the indexed metadata fields.
pub fn build_index_tables(records: &[VectorRecord]) -> IndexTables {
    let mut tables: IndexTables = BTreeMap::new();
    for record in records {
        for field in INDEXED_FIELDS {
            if let Some(value) = record.meta_str(field) {
                tables
                    .entry(field.to_string())
                    .or_default()
                    .entry(value.to_string())
                    .or_default()
                    .push(record.id.clone());
            }
        }
    }
    tables
}

fn write_record<W: Write>(w: &mut W, record: &VectorRecord) -> Result<()> {
    let meta = serde_json::to_vec(&record.metadata)
        .map_err(|e| RecallError::invalid(format!("metadata encode: {e}")))?;
    w.write_u32::<LittleEndian>(record.id.len() as u32)?;
    w.write_all(record.id.as_bytes())?;
    w.write_u32::<LittleEndian>(meta.len() as u32)?;
    w.write_all(&meta)?;
    w.write_i64::<LittleEndian>(record.created_at)?;
    w.write_u32::<LittleEndian>(record.embedding.len() as u32)?;
    for &x in &record.embedding {
        w.write_f32::<LittleEndian>(x)?;
    }
    Ok(())
}

fn read_record<R: Read>(r: &mut R, dimension: u32) -> Result<VectorRecord> {
    let id = read_string(r)?;
    let meta_len = r.read_u32::<LittleEndian>()?;
    if meta_len > MAX_FIELD_LEN {
        return Err(RecallError::corruption("metadata length out of range"));
    }
    let mut meta = vec![0u8; meta_len as usize];
    r.read_exact(&mut meta)?;
    let metadata = serde_json::from_slice(&meta)?;
    let created_at = r.read_i64::<LittleEndian>()?;
    let dim = r.read_u32::<LittleEndian>()?;
    if dim != dimension {
        return Err(RecallError::corruption(format!(
            "record {id} has dimension {dim}, container says {dimension}"
        )));
    }
    let mut embedding = Vec::with_capacity(dim as usize);
    for _ in 0..dim {
        embedding.push(r.read_f32::<LittleEndian>()?);
    }
    Ok(VectorRecord {
        id,
        embedding,
        metadata,
        created_at,
    })
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u32::<LittleEndian>()?;
    if len > MAX_FIELD_LEN {
        return Err(RecallError::corruption("string length out of range"));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| RecallError::corruption("non-utf8 id"))
}

fn write_region<W: Write>(w: &mut W, region: &[u8]) -> Result<()> {
    w.write_u64::<LittleEndian>(region.len() as u64)?;
    w.write_all(region)?;
    Ok(())
}

fn read_region<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u64::<LittleEndian>()?;
    if len > MAX_FIELD_LEN as u64 {
        return Err(RecallError::corruption("region length out of range"));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(id: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            embedding,
            metadata: json!({"domain": "coding", "note": "x"}),
            created_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_round_trip_empty() {
        let c = Container::new(4, vec![]);
        let bytes = c.to_bytes().unwrap();
        let back = Container::from_bytes(&bytes).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_round_trip_with_regions() {
        let mut c = Container::new(
            3,
            vec![record("a", vec![1.0, 2.0, 3.0]), record("b", vec![0.5, -0.5, 0.0])],
        );
        c.hnsw_region = Some(vec![9, 8, 7]);
        c.quantizer_region = Some(vec![1, 2, 3, 4]);
        let bytes = c.to_bytes().unwrap();
        let back = Container::from_bytes(&bytes).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let c = Container::new(2, vec![]);
        let mut bytes = c.to_bytes().unwrap();
        bytes[0] = b'X';
        let err = Container::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, RecallError::Corruption(_)));
    }

    #[test]
    fn test_future_version_is_unsupported() {
        let c = Container::new(2, vec![]);
        let mut bytes = c.to_bytes().unwrap();
        // Version lives right after the 8-byte magic.
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        let err = Container::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, RecallError::UnsupportedVersion(99)));
    }

    #[test]
    fn test_header_checksum_detects_flag_tamper() {
        let c = Container::new(2, vec![]);
        let mut bytes = c.to_bytes().unwrap();
        // Flip a flag bit without fixing the checksum.
        bytes[16] ^= 1;
        let err = Container::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, RecallError::Corruption(_)));
    }

    #[test]
    fn test_wrong_record_dimension_is_corruption() {
        let c = Container::new(3, vec![record("a", vec![1.0, 2.0])]);
        // Dimension check happens on read, not write.
        let bytes = c.to_bytes().unwrap();
        let err = Container::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, RecallError::Corruption(_)));
    }

    #[test]
    fn test_index_tables_cover_domain_and_task_type() {
        let mut a = record("a", vec![0.0]);
        a.metadata = json!({"domain": "coding", "task_type": "refactor"});
        let mut b = record("b", vec![0.0]);
        b.metadata = json!({"domain": "coding"});
        let tables = build_index_tables(&[a, b]);
        assert_eq!(tables["domain"]["coding"], vec!["a", "b"]);
        assert_eq!(tables["task_type"]["refactor"], vec!["a"]);
    }

    proptest! {
        #[test]
        fn prop_record_round_trip(
            id in "[a-z0-9-]{1,24}",
            embedding in proptest::collection::vec(-1000.0f32..1000.0, 1..32),
            ts in 0i64..4_102_444_800_000,
        ) {
            let rec = VectorRecord {
                id,
                embedding: embedding.clone(),
                metadata: json!({"k": "v"}),
                created_at: ts,
            };
            let c = Container::new(embedding.len() as u32, vec![rec.clone()]);
            let bytes = c.to_bytes().unwrap();
            let back = Container::from_bytes(&bytes).unwrap();
            prop_assert_eq!(&back.records[0], &rec);
        }
    }
}
