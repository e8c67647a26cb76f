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

//! Binary quantization.
//!
//! One bit per dimension against a trained per-dimension mean threshold,
//! packed eight dimensions per byte (low bit first). Asymmetric distance
//! is Hamming between the encoded query and the candidate code; callers
//! rerank survivors with full-precision distances.

use super::check_training_input;
use recalldb_core::{RecallError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryQuantizer {
    dimension: usize,
    training_sample_size: usize,
    thresholds: Vec<f32>,
    /// Mean absolute deviation per dimension; sets the decode amplitude.
    spreads: Vec<f32>,
    trained: bool,
}

impl BinaryQuantizer {
    pub fn new(dimension: usize, training_sample_size: usize) -> Self {
        Self {
            dimension,
            training_sample_size,
            thresholds: Vec::new(),
            spreads: Vec::new(),
            trained: false,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn compressed_bytes(&self) -> usize {
        self.dimension.div_ceil(8)
    }

    pub fn train(&mut self, samples: &[&[f32]]) -> Result<()> {
        check_training_input(samples, self.dimension, self.training_sample_size)?;
        let n = samples.len() as f32;
        let mut means = vec![0.0f32; self.dimension];
        for sample in samples {
            for (d, &x) in sample.iter().enumerate() {
                means[d] += x;
            }
        }
        for mean in &mut means {
            *mean /= n;
        }
        let mut spreads = vec![0.0f32; self.dimension];
        for sample in samples {
            for (d, &x) in sample.iter().enumerate() {
                spreads[d] += (x - means[d]).abs();
            }
        }
        for spread in &mut spreads {
            *spread /= n;
        }
        self.thresholds = means;
        self.spreads = spreads;
        self.trained = true;
        Ok(())
    }

    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if !self.trained {
            return Err(RecallError::NotTrained);
        }
        if vector.len() != self.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let mut out = vec![0u8; self.compressed_bytes()];
        for (d, &x) in vector.iter().enumerate() {
            if x >= self.thresholds[d] {
                out[d / 8] |= 1 << (d % 8);
            }
        }
        Ok(out)
    }

    /// Reconstruct to threshold ± spread per dimension.
    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>> {
        if !self.trained {
            return Err(RecallError::NotTrained);
        }
        if code.len() != self.compressed_bytes() {
            return Err(RecallError::invalid(format!(
                "binary code length {} does not match dimension {}",
                code.len(),
                self.dimension
            )));
        }
        let mut out = Vec::with_capacity(self.dimension);
        for d in 0..self.dimension {
            let bit = code[d / 8] >> (d % 8) & 1;
            let delta = if bit == 1 {
                self.spreads[d]
            } else {
                -self.spreads[d]
            };
            out.push(self.thresholds[d] + delta);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use recalldb_core::hamming;

    fn trained(dim: usize) -> (BinaryQuantizer, Vec<Vec<f32>>) {
        let samples = clustered_samples(64, dim, 2.0);
        let mut q = BinaryQuantizer::new(dim, 32);
        q.train(&as_refs(&samples)).unwrap();
        (q, samples)
    }

    #[test]
    fn test_code_width() {
        let (q, samples) = trained(10);
        let code = q.encode(&samples[0]).unwrap();
        assert_eq!(code.len(), 2);
    }

    #[test]
    fn test_same_cluster_smaller_hamming() {
        let (q, samples) = trained(16);
        let a0 = q.encode(&samples[0]).unwrap();
        let a2 = q.encode(&samples[2]).unwrap(); // same cluster
        let b1 = q.encode(&samples[1]).unwrap(); // opposite cluster
        let near = hamming(&a0, &a2).unwrap();
        let far = hamming(&a0, &b1).unwrap();
        assert!(near < far, "near {near} !< far {far}");
    }

    #[test]
    fn test_decode_sides_of_threshold() {
        let (q, samples) = trained(8);
        let code = q.encode(&samples[0]).unwrap();
        let decoded = q.decode(&code).unwrap();
        for (d, &x) in decoded.iter().enumerate() {
            let bit = code[d / 8] >> (d % 8) & 1;
            if bit == 1 {
                assert!(x >= q.thresholds[d]);
            } else {
                assert!(x <= q.thresholds[d]);
            }
        }
    }

    #[test]
    fn test_wrong_length_rejected() {
        let (q, _) = trained(8);
        assert!(q.encode(&[0.0; 4]).is_err());
        assert!(q.decode(&[0u8; 3]).is_err());
    }
}
