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

//! Vector quantization codecs.
//!
//! Four codecs share one lifecycle: `train` once on enough samples,
//! then `encode` / `decode` / `asymmetric_distance` forever after; the
//! trained model is immutable and serializes into the container.
//!
//! For search over many candidates, [`Quantizer::prepare`] does the
//! per-query work once (the PQ distance lookup table, the binary query
//! code) and [`PreparedQuery::distance`] evaluates each candidate code
//! without decoding it.

mod binary;
mod product;
mod residual;
mod scalar;

pub use binary::BinaryQuantizer;
pub use product::{DistanceTable, ProductQuantizer};
pub use residual::ResidualQuantizer;
pub use scalar::ScalarQuantizer;

use recalldb_core::{QuantizerConfig, QuantizerKind, RecallError, Result};
use serde::{Deserialize, Serialize};

/// Quantized form of one vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    Scalar(Vec<u8>),
    Product(Vec<u8>),
    Residual(Vec<Vec<u8>>),
    Binary(Vec<u8>),
}

impl Code {
    pub fn byte_len(&self) -> usize {
        match self {
            Code::Scalar(b) | Code::Product(b) | Code::Binary(b) => b.len(),
            Code::Residual(layers) => layers.iter().map(Vec::len).sum(),
        }
    }
}

/// Codec statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizerStats {
    pub dimensions: usize,
    /// Encoded size of one vector in bytes.
    pub compressed_bytes: usize,
    /// Full-precision bytes divided by compressed bytes.
    pub compression_ratio: f64,
}

/// Per-query precomputation for batch asymmetric distances.
pub enum PreparedQuery {
    Scalar(Vec<f32>),
    Product(DistanceTable),
    Residual(Vec<f32>),
    Binary(Vec<u8>),
}

impl PreparedQuery {
    /// Asymmetric distance from the prepared query to one candidate code.
    pub fn distance(&self, quantizer: &Quantizer, code: &Code) -> Result<f32> {
        match (self, quantizer, code) {
            (PreparedQuery::Scalar(q), Quantizer::Scalar(s), Code::Scalar(c)) => {
                s.distance_to_code(q, c)
            }
            (PreparedQuery::Product(table), Quantizer::Product(_), Code::Product(c)) => {
                table.lookup(c)
            }
            (PreparedQuery::Residual(q), Quantizer::Residual(r), Code::Residual(c)) => {
                r.distance_to_code(q, c)
            }
            (PreparedQuery::Binary(q), Quantizer::Binary(_), Code::Binary(c)) => {
                recalldb_core::hamming(q, c).map(|h| h as f32)
            }
            _ => Err(RecallError::invalid(
                "prepared query, quantizer, and code variants do not match",
            )),
        }
    }
}

/// Tagged set of trained codecs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Quantizer {
    Scalar(ScalarQuantizer),
    Product(ProductQuantizer),
    Residual(ResidualQuantizer),
    Binary(BinaryQuantizer),
}

impl Quantizer {
    /// Construct an untrained codec for `dimension` from configuration.
    pub fn from_config(config: &QuantizerConfig, dimension: usize) -> Result<Self> {
        config.validate(dimension)?;
        Ok(match config.kind {
            QuantizerKind::Scalar { bits } => Quantizer::Scalar(ScalarQuantizer::new(
                dimension,
                bits,
                config.training_sample_size,
            )),
            QuantizerKind::Product { m, nbits } => Quantizer::Product(ProductQuantizer::new(
                dimension,
                m,
                nbits,
                config.training_sample_size,
                config.seed,
            )),
            QuantizerKind::Residual { layers, m, nbits } => {
                Quantizer::Residual(ResidualQuantizer::new(
                    dimension,
                    layers,
                    m,
                    nbits,
                    config.training_sample_size,
                    config.seed,
                ))
            }
            QuantizerKind::Binary => Quantizer::Binary(BinaryQuantizer::new(
                dimension,
                config.training_sample_size,
            )),
        })
    }

    pub fn dimension(&self) -> usize {
        match self {
            Quantizer::Scalar(q) => q.dimension(),
            Quantizer::Product(q) => q.dimension(),
            Quantizer::Residual(q) => q.dimension(),
            Quantizer::Binary(q) => q.dimension(),
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            Quantizer::Scalar(q) => q.is_trained(),
            Quantizer::Product(q) => q.is_trained(),
            Quantizer::Residual(q) => q.is_trained(),
            Quantizer::Binary(q) => q.is_trained(),
        }
    }

    /// Train the codec parameters; fails with `InsufficientTrainingData`
    /// below the configured sample count.
    pub fn train(&mut self, samples: &[&[f32]]) -> Result<()> {
        match self {
            Quantizer::Scalar(q) => q.train(samples),
            Quantizer::Product(q) => q.train(samples),
            Quantizer::Residual(q) => q.train(samples),
            Quantizer::Binary(q) => q.train(samples),
        }
    }

    /// Deterministic encoding of one vector; fails if untrained.
    pub fn encode(&self, vector: &[f32]) -> Result<Code> {
        match self {
            Quantizer::Scalar(q) => q.encode(vector).map(Code::Scalar),
            Quantizer::Product(q) => q.encode(vector).map(Code::Product),
            Quantizer::Residual(q) => q.encode(vector).map(Code::Residual),
            Quantizer::Binary(q) => q.encode(vector).map(Code::Binary),
        }
    }

    /// Best-effort reconstruction; lossy for every codec.
    pub fn decode(&self, code: &Code) -> Result<Vec<f32>> {
        match (self, code) {
            (Quantizer::Scalar(q), Code::Scalar(c)) => q.decode(c),
            (Quantizer::Product(q), Code::Product(c)) => q.decode(c),
            (Quantizer::Residual(q), Code::Residual(c)) => q.decode(c),
            (Quantizer::Binary(q), Code::Binary(c)) => q.decode(c),
            _ => Err(RecallError::invalid("code variant does not match quantizer")),
        }
    }

    /// One-off asymmetric distance; prefer [`Quantizer::prepare`] when
    /// evaluating many candidates for a single query.
    pub fn asymmetric_distance(&self, query: &[f32], code: &Code) -> Result<f32> {
        let prepared = self.prepare(query)?;
        prepared.distance(self, code)
    }

    /// Precompute the per-query state for batch distance evaluation.
    pub fn prepare(&self, query: &[f32]) -> Result<PreparedQuery> {
        match self {
            Quantizer::Scalar(q) => {
                q.check_ready(query)?;
                Ok(PreparedQuery::Scalar(query.to_vec()))
            }
            Quantizer::Product(q) => Ok(PreparedQuery::Product(q.distance_table(query)?)),
            Quantizer::Residual(q) => {
                q.check_ready(query)?;
                Ok(PreparedQuery::Residual(query.to_vec()))
            }
            Quantizer::Binary(q) => q.encode(query).map(PreparedQuery::Binary),
        }
    }

    pub fn stats(&self) -> QuantizerStats {
        let (dimensions, compressed_bytes) = match self {
            Quantizer::Scalar(q) => (q.dimension(), q.compressed_bytes()),
            Quantizer::Product(q) => (q.dimension(), q.compressed_bytes()),
            Quantizer::Residual(q) => (q.dimension(), q.compressed_bytes()),
            Quantizer::Binary(q) => (q.dimension(), q.compressed_bytes()),
        };
        let full = dimensions * std::mem::size_of::<f32>();
        QuantizerStats {
            dimensions,
            compressed_bytes,
            compression_ratio: if compressed_bytes == 0 {
                0.0
            } else {
                full as f64 / compressed_bytes as f64
            },
        }
    }

    /// Serialize the trained model for the container's quantizer region.
    pub fn to_region_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| RecallError::invalid(format!("quantizer encode: {e}")))
    }

    /// Decode a trained model from a container region.
    pub fn from_region_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| RecallError::corruption(format!("quantizer region: {e}")))
    }
}

/// Shared training preamble: sample count and dimension validation.
pub(crate) fn check_training_input(
    samples: &[&[f32]],
    dimension: usize,
    training_sample_size: usize,
) -> Result<()> {
    if samples.len() < training_sample_size {
        return Err(RecallError::InsufficientTrainingData {
            needed: training_sample_size,
            got: samples.len(),
        });
    }
    for sample in samples {
        if sample.len() != dimension {
            return Err(RecallError::DimensionMismatch {
                expected: dimension,
                actual: sample.len(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Two well-separated clusters around ±`offset`.
    pub fn clustered_samples(n: usize, dim: usize, offset: f32) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                (0..dim)
                    .map(|d| sign * offset + ((i * 31 + d * 7) % 13) as f32 * 0.01)
                    .collect()
            })
            .collect()
    }

    pub fn as_refs(samples: &[Vec<f32>]) -> Vec<&[f32]> {
        samples.iter().map(|s| s.as_slice()).collect()
    }
}
