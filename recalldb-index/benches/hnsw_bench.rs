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

//! HNSW search benchmark over uniformly random 128-dim vectors.
//!
//! Also prints recall@10 of the graph against exhaustive search; the
//! 0.9 recall target is benchmark-gated here, not a unit contract.
//!
//! Run with: cargo bench -p recalldb-index --bench hnsw_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recalldb_core::{graph_distance, HnswConfig, Metric};
use recalldb_index::HnswIndex;

const DIM: usize = 128;
const N: usize = 5_000;
const K: usize = 10;

fn random_vectors(n: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

fn build_index(vectors: &[Vec<f32>]) -> HnswIndex {
    let mut index = HnswIndex::new(DIM, Metric::Euclidean, HnswConfig::default()).unwrap();
    for (i, v) in vectors.iter().enumerate() {
        index.insert(&format!("v{i}"), v).unwrap();
    }
    index
}

fn exact_top_k(vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, graph_distance(Metric::Euclidean, query, v).unwrap()))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.into_iter().take(k).map(|(i, _)| i).collect()
}

fn report_recall(index: &HnswIndex, vectors: &[Vec<f32>]) {
    let queries = random_vectors(50, 999);
    let mut hits = 0usize;
    for q in &queries {
        let approx = index.search(q, K, 50).unwrap();
        let exact = exact_top_k(vectors, q, K);
        for (id, _) in approx {
            let idx: usize = id[1..].parse().unwrap();
            if exact.contains(&idx) {
                hits += 1;
            }
        }
    }
    let recall = hits as f64 / (queries.len() * K) as f64;
    println!("recall@{K} over {N} vectors: {recall:.3}");
}

fn bench_search(c: &mut Criterion) {
    let vectors = random_vectors(N, 7);
    let index = build_index(&vectors);
    report_recall(&index, &vectors);
    let query = random_vectors(1, 4242).remove(0);

    c.bench_function("hnsw_search_k10", |b| {
        b.iter(|| index.search(black_box(&query), K, 50).unwrap())
    });

    c.bench_function("exhaustive_search_k10", |b| {
        b.iter(|| exact_top_k(black_box(&vectors), black_box(&query), K))
    });
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
