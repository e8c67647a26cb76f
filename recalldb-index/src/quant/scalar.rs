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

//! Scalar quantization.
//!
//! Per-dimension affine mapping onto unsigned integers of 4, 8, or 16
//! bits. Training records per-dimension min/max over the samples; a flat
//! dimension (min == max) always encodes to 0 and decodes back to min.
//! 4-bit codes pack two dimensions per byte, low nibble first; 16-bit
//! codes are little-endian pairs.

use super::check_training_input;
use recalldb_core::{RecallError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    dimension: usize,
    bits: u8,
    training_sample_size: usize,
    mins: Vec<f32>,
    maxs: Vec<f32>,
    trained: bool,
}

impl ScalarQuantizer {
    pub fn new(dimension: usize, bits: u8, training_sample_size: usize) -> Self {
        Self {
            dimension,
            bits,
            training_sample_size,
            mins: Vec::new(),
            maxs: Vec::new(),
            trained: false,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Encoded size of one vector.
    pub fn compressed_bytes(&self) -> usize {
        (self.dimension * self.bits as usize).div_ceil(8)
    }

    fn levels(&self) -> f32 {
        ((1u32 << self.bits) - 1) as f32
    }

    /// Largest reconstruction error per dimension: half a quantization step.
    pub fn step(&self, dim: usize) -> f32 {
        (self.maxs[dim] - self.mins[dim]) / self.levels()
    }

    pub(crate) fn check_ready(&self, vector: &[f32]) -> Result<()> {
        if !self.trained {
            return Err(RecallError::NotTrained);
        }
        if vector.len() != self.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    pub fn train(&mut self, samples: &[&[f32]]) -> Result<()> {
        check_training_input(samples, self.dimension, self.training_sample_size)?;
        let mut mins = vec![f32::INFINITY; self.dimension];
        let mut maxs = vec![f32::NEG_INFINITY; self.dimension];
        for sample in samples {
            for (d, &x) in sample.iter().enumerate() {
                mins[d] = mins[d].min(x);
                maxs[d] = maxs[d].max(x);
            }
        }
        self.mins = mins;
        self.maxs = maxs;
        self.trained = true;
        Ok(())
    }

    fn quantize_dim(&self, dim: usize, x: f32) -> u32 {
        let range = self.maxs[dim] - self.mins[dim];
        if range <= 0.0 {
            return 0;
        }
        let scaled = (x - self.mins[dim]) / range * self.levels();
        scaled.round().clamp(0.0, self.levels()) as u32
    }

    fn dequantize_dim(&self, dim: usize, q: u32) -> f32 {
        let range = self.maxs[dim] - self.mins[dim];
        if range <= 0.0 {
            return self.mins[dim];
        }
        self.mins[dim] + q as f32 / self.levels() * range
    }

    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.check_ready(vector)?;
        let mut out = Vec::with_capacity(self.compressed_bytes());
        match self.bits {
            4 => {
                let mut d = 0;
                while d < self.dimension {
                    let lo = self.quantize_dim(d, vector[d]) as u8;
                    let hi = if d + 1 < self.dimension {
                        self.quantize_dim(d + 1, vector[d + 1]) as u8
                    } else {
                        0
                    };
                    out.push(lo | (hi << 4));
                    d += 2;
                }
            }
            8 => {
                for (d, &x) in vector.iter().enumerate() {
                    out.push(self.quantize_dim(d, x) as u8);
                }
            }
            16 => {
                for (d, &x) in vector.iter().enumerate() {
                    out.extend_from_slice(&(self.quantize_dim(d, x) as u16).to_le_bytes());
                }
            }
            _ => return Err(RecallError::invalid("scalar bits must be 4, 8, or 16")),
        }
        Ok(out)
    }

    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>> {
        if !self.trained {
            return Err(RecallError::NotTrained);
        }
        if code.len() != self.compressed_bytes() {
            return Err(RecallError::invalid(format!(
                "scalar code length {} does not match dimension {}",
                code.len(),
                self.dimension
            )));
        }
        let mut out = Vec::with_capacity(self.dimension);
        match self.bits {
            4 => {
                for d in 0..self.dimension {
                    let byte = code[d / 2];
                    let q = if d % 2 == 0 { byte & 0x0f } else { byte >> 4 };
                    out.push(self.dequantize_dim(d, q as u32));
                }
            }
            8 => {
                for (d, &q) in code.iter().enumerate() {
                    out.push(self.dequantize_dim(d, q as u32));
                }
            }
            16 => {
                for d in 0..self.dimension {
                    let q = u16::from_le_bytes([code[d * 2], code[d * 2 + 1]]);
                    out.push(self.dequantize_dim(d, q as u32));
                }
            }
            _ => return Err(RecallError::invalid("scalar bits must be 4, 8, or 16")),
        }
        Ok(out)
    }

    /// Euclidean distance between a full-precision query and a code.
    pub fn distance_to_code(&self, query: &[f32], code: &[u8]) -> Result<f32> {
        self.check_ready(query)?;
        let decoded = self.decode(code)?;
        let sum: f32 = query
            .iter()
            .zip(decoded.iter())
            .map(|(q, d)| {
                let diff = q - d;
                diff * diff
            })
            .sum();
        Ok(sum.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn trained(bits: u8, dim: usize) -> (ScalarQuantizer, Vec<Vec<f32>>) {
        let samples = clustered_samples(64, dim, 3.0);
        let mut q = ScalarQuantizer::new(dim, bits, 32);
        q.train(&as_refs(&samples)).unwrap();
        (q, samples)
    }

    #[test]
    fn test_round_trip_within_step() {
        for bits in [4u8, 8, 16] {
            let (q, samples) = trained(bits, 8);
            for sample in samples.iter().take(8) {
                let decoded = q.decode(&q.encode(sample).unwrap()).unwrap();
                for (d, (&orig, &rec)) in sample.iter().zip(decoded.iter()).enumerate() {
                    let step = q.step(d);
                    assert!(
                        (orig - rec).abs() <= step,
                        "bits={bits} dim={d}: |{orig} - {rec}| > step {step}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_higher_bits_reconstruct_tighter() {
        let (q4, samples) = trained(4, 8);
        let (q16, _) = trained(16, 8);
        let sample = &samples[0];
        let err = |q: &ScalarQuantizer| -> f32 {
            let rec = q.decode(&q.encode(sample).unwrap()).unwrap();
            sample
                .iter()
                .zip(rec.iter())
                .map(|(a, b)| (a - b).abs())
                .sum()
        };
        assert!(err(&q16) <= err(&q4));
    }

    #[test]
    fn test_code_sizes() {
        assert_eq!(ScalarQuantizer::new(8, 4, 1).compressed_bytes(), 4);
        assert_eq!(ScalarQuantizer::new(9, 4, 1).compressed_bytes(), 5);
        assert_eq!(ScalarQuantizer::new(8, 8, 1).compressed_bytes(), 8);
        assert_eq!(ScalarQuantizer::new(8, 16, 1).compressed_bytes(), 16);
    }

    #[test]
    fn test_flat_dimension_is_stable() {
        let dim = 4;
        let samples: Vec<Vec<f32>> = (0..40).map(|i| vec![5.0, i as f32, 0.0, 1.0]).collect();
        let mut q = ScalarQuantizer::new(dim, 8, 32);
        q.train(&as_refs(&samples)).unwrap();
        let decoded = q.decode(&q.encode(&samples[3]).unwrap()).unwrap();
        assert_eq!(decoded[0], 5.0);
    }

    #[test]
    fn test_out_of_range_values_clamp() {
        let (q, _) = trained(8, 8);
        let wild = vec![1000.0; 8];
        let decoded = q.decode(&q.encode(&wild).unwrap()).unwrap();
        for (d, &x) in decoded.iter().enumerate() {
            assert!(x <= q.maxs[d] + 1e-5);
        }
    }

    #[test]
    fn test_distance_to_code_matches_decode_distance() {
        let (q, samples) = trained(8, 8);
        let query = &samples[1];
        let code = q.encode(&samples[2]).unwrap();
        let via_code = q.distance_to_code(query, &code).unwrap();
        let via_decode =
            recalldb_core::euclidean(query, &q.decode(&code).unwrap()).unwrap();
        assert!((via_code - via_decode).abs() < 1e-5);
    }
}
