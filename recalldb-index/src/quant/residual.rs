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

//! Residual quantization.
//!
//! Stacks product quantizers: layer 0 encodes the vector, each later
//! layer encodes what the previous layers failed to reconstruct, and
//! decoding sums the per-layer reconstructions. The squared-distance
//! table decomposition of a single PQ does not hold across layers, so
//! asymmetric distance here reconstructs the candidate (a sum of `L`
//! centroid lookups) before the distance.

use super::product::ProductQuantizer;
use recalldb_core::{RecallError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualQuantizer {
    dimension: usize,
    training_sample_size: usize,
    layers: Vec<ProductQuantizer>,
    trained: bool,
}

impl ResidualQuantizer {
    pub fn new(
        dimension: usize,
        layers: usize,
        m: usize,
        nbits: u8,
        training_sample_size: usize,
        seed: u64,
    ) -> Self {
        let layers = (0..layers)
            .map(|i| {
                ProductQuantizer::new(
                    dimension,
                    m,
                    nbits,
                    training_sample_size,
                    seed.wrapping_add(i as u64),
                )
            })
            .collect();
        Self {
            dimension,
            training_sample_size,
            layers,
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
        self.layers.iter().map(ProductQuantizer::compressed_bytes).sum()
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
        super::check_training_input(samples, self.dimension, self.training_sample_size)?;
        let mut residuals: Vec<Vec<f32>> = samples.iter().map(|s| s.to_vec()).collect();
        for layer in &mut self.layers {
            let refs: Vec<&[f32]> = residuals.iter().map(|r| r.as_slice()).collect();
            layer.train(&refs)?;
            for residual in &mut residuals {
                let code = layer.encode(residual)?;
                let recon = layer.decode(&code)?;
                for (r, c) in residual.iter_mut().zip(recon.iter()) {
                    *r -= c;
                }
            }
        }
        self.trained = true;
        Ok(())
    }

    pub fn encode(&self, vector: &[f32]) -> Result<Vec<Vec<u8>>> {
        self.check_ready(vector)?;
        let mut residual = vector.to_vec();
        let mut codes = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let code = layer.encode(&residual)?;
            let recon = layer.decode(&code)?;
            for (r, c) in residual.iter_mut().zip(recon.iter()) {
                *r -= c;
            }
            codes.push(code);
        }
        Ok(codes)
    }

    pub fn decode(&self, codes: &[Vec<u8>]) -> Result<Vec<f32>> {
        if !self.trained {
            return Err(RecallError::NotTrained);
        }
        if codes.len() != self.layers.len() {
            return Err(RecallError::invalid(format!(
                "residual code has {} layers, expected {}",
                codes.len(),
                self.layers.len()
            )));
        }
        let mut out = vec![0.0f32; self.dimension];
        for (layer, code) in self.layers.iter().zip(codes.iter()) {
            let recon = layer.decode(code)?;
            for (o, c) in out.iter_mut().zip(recon.iter()) {
                *o += c;
            }
        }
        Ok(out)
    }

    /// Distance between a full-precision query and the summed
    /// reconstruction of a layered code.
    pub fn distance_to_code(&self, query: &[f32], codes: &[Vec<u8>]) -> Result<f32> {
        self.check_ready(query)?;
        let decoded = self.decode(codes)?;
        recalldb_core::euclidean(query, &decoded)
    }
}
