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

//! Distance kernels over dense and binary vectors.
//!
//! All functions are pure and fail fast on length mismatch. Two
//! conventions coexist and are kept explicit at every call site:
//!
//! - `similarity` returns the raw metric value (cosine similarity,
//!   euclidean distance, dot product).
//! - `graph_distance` returns a value where smaller always means closer,
//!   which is what the HNSW traversal orders by.
//! - [`score_for_metric`] maps a raw metric value to a higher-is-better
//!   score for result ranking and threshold filtering.

use crate::error::{RecallError, Result};
use serde::{Deserialize, Serialize};

/// Similarity metric selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Dot,
}

impl Metric {
    /// Stable single-byte tag, used in cache fingerprints.
    pub fn tag(self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::Euclidean => 1,
            Metric::Dot => 2,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dot => "dot",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Metric {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "dot" | "inner" => Ok(Metric::Dot),
            other => Err(RecallError::invalid(format!("unknown metric: {other}"))),
        }
    }
}

fn check_len(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(RecallError::InvalidArgument(format!(
            "vector length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(())
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
    check_len(a, b)?;
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Cosine similarity in [-1, 1]. Two zero-norm vectors compare as 1.0.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32> {
    check_len(a, b)?;
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 && nb == 0.0 {
        return Ok(1.0);
    }
    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0))
}

/// Euclidean (L2) distance.
pub fn euclidean(a: &[f32], b: &[f32]) -> Result<f32> {
    check_len(a, b)?;
    let sum: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum();
    Ok(sum.sqrt())
}

/// Hamming distance: popcount of XOR over packed bit codes.
pub fn hamming(a: &[u8], b: &[u8]) -> Result<u32> {
    if a.len() != b.len() {
        return Err(RecallError::InvalidArgument(format!(
            "code length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum())
}

/// Raw metric value for `metric` between `a` and `b`.
pub fn similarity(metric: Metric, a: &[f32], b: &[f32]) -> Result<f32> {
    match metric {
        Metric::Cosine => cosine(a, b),
        Metric::Euclidean => euclidean(a, b),
        Metric::Dot => dot(a, b),
    }
}

/// Distance where smaller always means closer; the HNSW traversal order.
pub fn graph_distance(metric: Metric, a: &[f32], b: &[f32]) -> Result<f32> {
    match metric {
        Metric::Cosine => Ok(1.0 - cosine(a, b)?),
        Metric::Euclidean => euclidean(a, b),
        Metric::Dot => Ok(-dot(a, b)?),
    }
}

/// Map a raw metric value to a higher-is-better score.
///
/// Euclidean distances map through 1/(1+d); cosine and dot pass through
/// unchanged.
pub fn score_for_metric(metric: Metric, raw: f32) -> f32 {
    match metric {
        Metric::Euclidean => 1.0 / (1.0 + raw),
        Metric::Cosine | Metric::Dot => raw,
    }
}
