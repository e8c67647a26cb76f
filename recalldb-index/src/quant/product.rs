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

//! Product quantization.
//!
//! Splits each vector into `m` equal-length subvectors and trains one
//! k-means codebook of `2^nbits` centroids per sub-space (seeded Lloyd
//! iterations). Codes are one byte per sub-space (`nbits <= 8`).
//!
//! Asymmetric distance precomputes an m x 2^nbits table of squared
//! distances between the query's subvectors and every centroid, then a
//! candidate costs `m` lookups and additions instead of a decode.

use super::check_training_input;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recalldb_core::{RecallError, Result};
use serde::{Deserialize, Serialize};

/// Lloyd iteration cap; codebooks converge well before this on real data.
const KMEANS_ITERATIONS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    m: usize,
    nbits: u8,
    /// Sub-space width: `dimension / m`.
    dsub: usize,
    training_sample_size: usize,
    seed: u64,
    /// `m` codebooks, each `2^nbits` centroids of `dsub` floats.
    codebooks: Vec<Vec<Vec<f32>>>,
    trained: bool,
}

/// Per-query lookup table of squared sub-distances.
pub struct DistanceTable {
    m: usize,
    k: usize,
    /// Row-major `m * k` squared distances.
    table: Vec<f32>,
}

impl DistanceTable {
    /// Sum the table cells named by a code and return the L2 distance.
    pub fn lookup(&self, code: &[u8]) -> Result<f32> {
        if code.len() != self.m {
            return Err(RecallError::invalid(format!(
                "product code has {} sub-codes, table expects {}",
                code.len(),
                self.m
            )));
        }
        let mut sum = 0.0f32;
        for (s, &c) in code.iter().enumerate() {
            let c = c as usize;
            if c >= self.k {
                return Err(RecallError::corruption(format!(
                    "product sub-code {c} out of range for k={}",
                    self.k
                )));
            }
            sum += self.table[s * self.k + c];
        }
        Ok(sum.sqrt())
    }
}

impl ProductQuantizer {
    pub fn new(
        dimension: usize,
        m: usize,
        nbits: u8,
        training_sample_size: usize,
        seed: u64,
    ) -> Self {
        Self {
            dimension,
            m,
            nbits,
            dsub: dimension / m,
            training_sample_size,
            seed,
            codebooks: Vec::new(),
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
        self.m
    }

    fn k(&self) -> usize {
        1 << self.nbits
    }

    fn check_ready(&self, vector: &[f32]) -> Result<()> {
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
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut codebooks = Vec::with_capacity(self.m);
        for s in 0..self.m {
            let lo = s * self.dsub;
            let hi = lo + self.dsub;
            let sub_samples: Vec<&[f32]> = samples.iter().map(|v| &v[lo..hi]).collect();
            codebooks.push(kmeans(&sub_samples, self.k(), KMEANS_ITERATIONS, &mut rng));
        }
        self.codebooks = codebooks;
        self.trained = true;
        Ok(())
    }

    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.check_ready(vector)?;
        let mut code = Vec::with_capacity(self.m);
        for (s, codebook) in self.codebooks.iter().enumerate() {
            let sub = &vector[s * self.dsub..(s + 1) * self.dsub];
            code.push(nearest_centroid(sub, codebook) as u8);
        }
        Ok(code)
    }

    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>> {
        if !self.trained {
            return Err(RecallError::NotTrained);
        }
        if code.len() != self.m {
            return Err(RecallError::invalid(format!(
                "product code has {} sub-codes, expected {}",
                code.len(),
                self.m
            )));
        }
        let mut out = Vec::with_capacity(self.dimension);
        for (s, &c) in code.iter().enumerate() {
            let centroid = self.codebooks[s].get(c as usize).ok_or_else(|| {
                RecallError::corruption(format!("product sub-code {c} out of range"))
            })?;
            out.extend_from_slice(centroid);
        }
        Ok(out)
    }

    /// Precompute the query's squared-distance table against every
    /// centroid in every sub-space.
    pub fn distance_table(&self, query: &[f32]) -> Result<DistanceTable> {
        self.check_ready(query)?;
        let k = self.k();
        let mut table = vec![0.0f32; self.m * k];
        for (s, codebook) in self.codebooks.iter().enumerate() {
            let sub = &query[s * self.dsub..(s + 1) * self.dsub];
            for (c, centroid) in codebook.iter().enumerate() {
                table[s * k + c] = squared_distance(sub, centroid);
            }
        }
        Ok(DistanceTable {
            m: self.m,
            k,
            table,
        })
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn nearest_centroid(sub: &[f32], codebook: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (c, centroid) in codebook.iter().enumerate() {
        let d = squared_distance(sub, centroid);
        if d < best_dist {
            best = c;
            best_dist = d;
        }
    }
    best
}

/// Seeded Lloyd k-means over sub-vectors.
///
/// Initialization samples training points (with replacement when the
/// sample pool is smaller than k); an emptied cluster is re-seeded from a
/// random sample so every code stays usable.
fn kmeans(samples: &[&[f32]], k: usize, iterations: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = samples.len();
    let dsub = samples[0].len();
    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|_| samples[rng.gen_range(0..n)].to_vec())
        .collect();

    let mut assignment = vec![0usize; n];
    for _ in 0..iterations {
        let mut moved = false;
        for (i, sample) in samples.iter().enumerate() {
            let nearest = nearest_centroid(sample, &centroids);
            if assignment[i] != nearest {
                assignment[i] = nearest;
                moved = true;
            }
        }

        let mut sums = vec![vec![0.0f32; dsub]; k];
        let mut counts = vec![0usize; k];
        for (i, sample) in samples.iter().enumerate() {
            let c = assignment[i];
            counts[c] += 1;
            for (d, &x) in sample.iter().enumerate() {
                sums[c][d] += x;
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                centroids[c] = samples[rng.gen_range(0..n)].to_vec();
                moved = true;
                continue;
            }
            for d in 0..dsub {
                centroids[c][d] = sums[c][d] / counts[c] as f32;
            }
        }
        if !moved {
            break;
        }
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn trained(dim: usize, m: usize, nbits: u8) -> (ProductQuantizer, Vec<Vec<f32>>) {
        let samples = clustered_samples(128, dim, 2.0);
        let mut q = ProductQuantizer::new(dim, m, nbits, 32, 11);
        q.train(&as_refs(&samples)).unwrap();
        (q, samples)
    }

    #[test]
    fn test_code_shape() {
        let (q, samples) = trained(8, 4, 4);
        let code = q.encode(&samples[0]).unwrap();
        assert_eq!(code.len(), 4);
        assert!(code.iter().all(|&c| (c as usize) < 16));
    }

    #[test]
    fn test_decode_reconstructs_cluster() {
        let (q, samples) = trained(8, 4, 4);
        // With two well-separated clusters and 16 centroids per
        // sub-space, reconstruction error stays well inside the
        // inter-cluster distance.
        let sample = &samples[0];
        let decoded = q.decode(&q.encode(sample).unwrap()).unwrap();
        let err = recalldb_core::euclidean(sample, &decoded).unwrap();
        let spread = recalldb_core::euclidean(&samples[0], &samples[1]).unwrap();
        assert!(err < spread / 2.0, "err {err} vs spread {spread}");
    }

    #[test]
    fn test_asymmetric_matches_table_lookup() {
        let (q, samples) = trained(8, 4, 4);
        let query = &samples[1];
        let code = q.encode(&samples[2]).unwrap();
        let table = q.distance_table(query).unwrap();
        let exact_to_decoded =
            recalldb_core::euclidean(query, &q.decode(&code).unwrap()).unwrap();
        let via_table = table.lookup(&code).unwrap();
        assert!((via_table - exact_to_decoded).abs() < 1e-4);
    }

    #[test]
    fn test_asymmetric_distance_is_monotone_across_clusters() {
        let (q, samples) = trained(8, 4, 4);
        // Query in cluster A: a cluster-A code must rank closer than a
        // cluster-B code.
        let query = &samples[0];
        let near_code = q.encode(&samples[2]).unwrap(); // same cluster (even index)
        let far_code = q.encode(&samples[1]).unwrap(); // other cluster
        let table = q.distance_table(query).unwrap();
        assert!(table.lookup(&near_code).unwrap() < table.lookup(&far_code).unwrap());
    }

    #[test]
    fn test_kmeans_with_fewer_samples_than_centroids() {
        let samples = clustered_samples(40, 8, 1.0);
        let mut q = ProductQuantizer::new(8, 4, 8, 32, 5); // 256 centroids, 40 samples
        q.train(&as_refs(&samples)).unwrap();
        let code = q.encode(&samples[0]).unwrap();
        assert_eq!(code.len(), 4);
    }

    #[test]
    fn test_bad_code_length_rejected() {
        let (q, _) = trained(8, 4, 4);
        assert!(q.decode(&[0, 1]).is_err());
        let table = q.distance_table(&vec![0.0; 8]).unwrap();
        assert!(table.lookup(&[0, 1]).is_err());
    }
}
