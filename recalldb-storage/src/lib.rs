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

//! RecallDB Storage Layer
//!
//! Persistence for vector records. Two interchangeable backends share one
//! contract ([`VectorStore`]): a volatile in-process map and a durable
//! single-file store using the RCDB container format.
//!
//! ## Container layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  Header (magic, version, dimension)  │
//! ├──────────────────────────────────────┤
//! │  Record region (length-prefixed)     │
//! ├──────────────────────────────────────┤
//! │  HNSW region (optional, opaque)      │
//! ├──────────────────────────────────────┤
//! │  Quantizer region (optional, opaque) │
//! ├──────────────────────────────────────┤
//! │  Metadata index tables (JSON)        │
//! └──────────────────────────────────────┘
//! ```
//!
//! The index and quantizer regions are produced and consumed by the index
//! layer; storage treats them as opaque bytes so the two crates stay
//! decoupled.

pub mod backend;
pub mod container;
pub mod disk;
pub mod memory;

pub use backend::{StorageStats, VectorStore};
pub use container::{Container, ContainerHeader, CONTAINER_MAGIC, CONTAINER_VERSION};
pub use disk::DiskBackend;
pub use memory::MemoryBackend;
