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

//! End-to-end database scenarios.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recalldb::{
    DbConfig, DeadlinePolicy, InsertRequest, Metric, QuantizerConfig, QuantizerKind,
    RecallError, SearchOptions, VectorDb,
};
use serde_json::json;
use std::time::Duration;

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

#[test]
fn insert_then_search_single_vector() {
    let db = VectorDb::in_memory(DbConfig::in_memory(3)).unwrap();
    let id = db
        .insert(InsertRequest::new(vec![1.0, 0.0, 0.0]).with_metadata(json!({"doc": "a"})))
        .unwrap();

    let response = db.search(&[1.0, 0.0, 0.0], 1, Metric::Cosine).unwrap();
    assert_eq!(response.results.len(), 1);
    let top = &response.results[0];
    assert_eq!(top.id, id);
    assert!((top.score - 1.0).abs() < 1e-6);
    assert_eq!(top.metadata["doc"], "a");
}

#[test]
fn threshold_filters_dissimilar_vectors() {
    let db = VectorDb::in_memory(DbConfig::in_memory(3)).unwrap();
    let kept = db
        .insert(InsertRequest::new(vec![1.0, 0.0, 0.0]))
        .unwrap();
    db.insert(InsertRequest::new(vec![0.0, 1.0, 0.0])).unwrap();

    let response = db
        .search_with(
            &[1.0, 0.0, 0.0],
            &SearchOptions::new(10, Metric::Cosine).with_threshold(0.9),
        )
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, kept);
}

#[test]
fn batch_insert_is_all_or_nothing() {
    let db = VectorDb::in_memory(DbConfig::in_memory(3)).unwrap();
    db.insert(InsertRequest::new(vec![0.5, 0.5, 0.5])).unwrap();
    let before = db.stats().backend.count;

    let err = db
        .insert_batch(vec![
            InsertRequest::new(vec![1.0, 2.0, 3.0]),
            InsertRequest::new(vec![1.0, 2.0]),
        ])
        .unwrap_err();
    assert!(matches!(err, RecallError::DimensionMismatch { .. }));
    assert_eq!(db.stats().backend.count, before);
}

#[test]
fn hnsw_builds_at_threshold_and_serves_search() {
    let mut config = DbConfig::in_memory(16);
    config.hnsw.min_vectors_for_index = 64;
    let db = VectorDb::in_memory(config).unwrap();

    let vectors = random_vectors(64, 16, 9);
    for (i, v) in vectors.iter().enumerate() {
        db.insert(InsertRequest::new(v.clone()).with_id(format!("v{i}")))
            .unwrap();
        let ready = db.stats().hnsw.ready;
        assert_eq!(ready, i + 1 >= 64, "ready flag wrong after insert {i}");
    }

    let stats = db.stats();
    assert!(stats.hnsw.ready);
    assert_eq!(stats.hnsw.node_count, 64);
    assert!(stats.hnsw.edge_count > 0);

    let response = db.search(&vectors[10], 1, Metric::Cosine).unwrap();
    assert_eq!(response.results[0].id, "v10");
}

#[test]
fn repeated_search_hits_cache() {
    let db = VectorDb::in_memory(DbConfig::in_memory(3)).unwrap();
    db.insert(InsertRequest::new(vec![0.1, 0.2, 0.3])).unwrap();

    let q = [0.1, 0.2, 0.3];
    let first = db.search(&q, 5, Metric::Cosine).unwrap();
    let second = db.search(&q, 5, Metric::Cosine).unwrap();
    assert_eq!(first, second);
    assert!(db.cache_stats().hits >= 1);
}

#[test]
fn writes_invalidate_cached_results() {
    let db = VectorDb::in_memory(DbConfig::in_memory(2)).unwrap();
    db.insert(InsertRequest::new(vec![1.0, 0.0])).unwrap();

    let q = [1.0, 0.0];
    let first = db.search(&q, 10, Metric::Cosine).unwrap();
    assert_eq!(first.results.len(), 1);

    db.insert(InsertRequest::new(vec![0.9, 0.1])).unwrap();
    let second = db.search(&q, 10, Metric::Cosine).unwrap();
    assert_eq!(second.results.len(), 2, "stale cached result survived a write");
}

#[test]
fn delete_then_get_is_absent() {
    let db = VectorDb::in_memory(DbConfig::in_memory(2)).unwrap();
    let id = db.insert(InsertRequest::new(vec![1.0, 2.0])).unwrap();
    assert!(db.delete(&id).unwrap());
    assert!(!db.delete(&id).unwrap());
    assert!(db.get(&id).is_none());
}

#[test]
fn get_returns_bit_exact_embedding() {
    let db = VectorDb::in_memory(DbConfig::in_memory(4)).unwrap();
    let embedding = vec![0.123_456_79_f32, -4.2, 1e-20, 3.4e38];
    let id = db.insert(InsertRequest::new(embedding.clone())).unwrap();
    assert_eq!(db.get(&id).unwrap().embedding, embedding);
}

#[test]
fn export_import_round_trip_matches_search_results() {
    let mut config = DbConfig::in_memory(8);
    config.hnsw.min_vectors_for_index = 32;
    let db = VectorDb::in_memory(config.clone()).unwrap();
    for (i, v) in random_vectors(40, 8, 3).into_iter().enumerate() {
        db.insert(InsertRequest::new(v).with_id(format!("v{i}")))
            .unwrap();
    }

    let dump = db.export().unwrap();
    let restored = VectorDb::in_memory(config).unwrap();
    restored.import(&dump).unwrap();

    assert_eq!(restored.len(), db.len());
    assert_eq!(restored.stats().hnsw.ready, db.stats().hnsw.ready);
    for q in random_vectors(5, 8, 77) {
        assert_eq!(
            restored.search(&q, 5, Metric::Cosine).unwrap().results,
            db.search(&q, 5, Metric::Cosine).unwrap().results,
        );
    }
}

#[test]
fn disk_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.rcdb");
    let mut config = DbConfig::on_disk(4, &path);
    config.hnsw.min_vectors_for_index = 8;

    {
        let db = VectorDb::open(config.clone()).unwrap();
        for (i, v) in random_vectors(10, 4, 5).into_iter().enumerate() {
            db.insert(InsertRequest::new(v).with_id(format!("v{i}")))
                .unwrap();
        }
        assert!(db.stats().hnsw.ready);
        db.close().unwrap();
    }

    let db = VectorDb::open_existing(&path).unwrap();
    assert_eq!(db.len(), 10);
    assert!(db.get("v3").is_some());
}

#[test]
fn search_respects_k_and_ordering() {
    let db = VectorDb::in_memory(DbConfig::in_memory(4)).unwrap();
    for (i, v) in random_vectors(30, 4, 11).into_iter().enumerate() {
        db.insert(InsertRequest::new(v).with_id(format!("v{i}")))
            .unwrap();
    }
    for q in random_vectors(4, 4, 13) {
        let results = db.search(&q, 7, Metric::Euclidean).unwrap().results;
        assert!(results.len() <= 7);
        for w in results.windows(2) {
            assert!(w[0].score >= w[1].score, "results not sorted descending");
        }
    }
}

#[test]
fn k_zero_returns_empty() {
    let db = VectorDb::in_memory(DbConfig::in_memory(2)).unwrap();
    db.insert(InsertRequest::new(vec![1.0, 0.0])).unwrap();
    let response = db.search(&[1.0, 0.0], 0, Metric::Cosine).unwrap();
    assert!(response.results.is_empty());
}

#[test]
fn strict_insert_rejects_duplicate_id() {
    let mut config = DbConfig::in_memory(2);
    config.strict_insert = true;
    let db = VectorDb::in_memory(config).unwrap();
    db.insert(InsertRequest::new(vec![1.0, 0.0]).with_id("x"))
        .unwrap();
    let err = db
        .insert(InsertRequest::new(vec![0.0, 1.0]).with_id("x"))
        .unwrap_err();
    assert!(matches!(err, RecallError::AlreadyExists(_)));
}

#[test]
fn two_stage_quantized_search_finds_exact_neighbor() {
    let mut config = DbConfig::in_memory(8);
    config.quantizer = Some(QuantizerConfig {
        kind: QuantizerKind::Product { m: 4, nbits: 4 },
        training_sample_size: 32,
        seed: 5,
        rerank_factor: 4,
    });
    let db = VectorDb::in_memory(config).unwrap();
    let vectors = random_vectors(64, 8, 21);
    for (i, v) in vectors.iter().enumerate() {
        db.insert(InsertRequest::new(v.clone()).with_id(format!("v{i}")))
            .unwrap();
    }
    db.train_quantizer().unwrap();
    assert!(db.stats().quantizer.is_some());

    // Stage 2 reranks on full-precision vectors, so the exact nearest
    // neighbor (the vector itself) must surface.
    let response = db.search(&vectors[7], 1, Metric::Cosine).unwrap();
    assert_eq!(response.results[0].id, "v7");
    assert!((response.results[0].score - 1.0).abs() < 1e-5);
}

#[test]
fn deadline_partial_flags_truncated() {
    let db = VectorDb::in_memory(DbConfig::in_memory(4)).unwrap();
    for v in random_vectors(300, 4, 31) {
        db.insert(InsertRequest::new(v)).unwrap();
    }
    let opts = SearchOptions::new(5, Metric::Cosine)
        .with_deadline(Duration::ZERO, DeadlinePolicy::Partial);
    let response = db.search_with(&[0.1, 0.2, 0.3, 0.4], &opts).unwrap();
    assert!(response.truncated);
}

#[test]
fn deadline_fail_below_min_work() {
    let db = VectorDb::in_memory(DbConfig::in_memory(4)).unwrap();
    for v in random_vectors(300, 4, 37) {
        db.insert(InsertRequest::new(v)).unwrap();
    }
    let opts = SearchOptions::new(5, Metric::Cosine)
        .with_deadline(Duration::ZERO, DeadlinePolicy::Fail)
        .with_min_results(100);
    let err = db.search_with(&[0.1, 0.2, 0.3, 0.4], &opts).unwrap_err();
    assert!(matches!(err, RecallError::DeadlineExceeded));
}
