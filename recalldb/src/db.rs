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

//! The `VectorDb` facade.
//!
//! Composes a storage backend, the HNSW index, an optional quantizer, and
//! the query cache behind one readers-writer lock. Writes (`insert`,
//! `insert_batch`, `delete`, `import`, quantizer training, rebuild) take
//! the writer side and invalidate the cache before releasing it; reads
//! (`search`, `get`, `stats`) share the reader side, and the cache keeps
//! its own interior counters so hits never need the writer.
//!
//! Search path: cache → HNSW when built and the metric matches the graph
//! (brute-force scan otherwise, with quantized two-stage filtering when a
//! trained codec is attached) → exact rerank → score, threshold, sort,
//! truncate → cache fill.

use parking_lot::RwLock;
use recalldb_core::{
    graph_distance, score_for_metric, similarity, DbConfig, Metric, RecallError, Result,
    SearchResult, VectorRecord,
};
use recalldb_index::{
    CacheStats, Code, HnswIndex, HnswStats, QueryCache, Quantizer, QuantizerStats,
};
use recalldb_storage::{Container, DiskBackend, MemoryBackend, StorageStats, VectorStore};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Iterations between deadline checks on the scan path.
const DEADLINE_STRIDE: usize = 128;

/// What to do when a search deadline fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadlinePolicy {
    /// Return the results computed so far, flagged `truncated`.
    #[default]
    Partial,
    /// Fail with `DeadlineExceeded` unless `min_results` were computed.
    Fail,
}

/// Per-call search parameters.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub k: usize,
    pub metric: Metric,
    /// Results scoring below this are dropped.
    pub threshold: f32,
    /// Optional cooperative deadline.
    pub deadline: Option<Duration>,
    pub deadline_policy: DeadlinePolicy,
    /// Minimum-work threshold for [`DeadlinePolicy::Fail`].
    pub min_results: usize,
}

impl SearchOptions {
    pub fn new(k: usize, metric: Metric) -> Self {
        Self {
            k,
            metric,
            threshold: 0.0,
            deadline: None,
            deadline_policy: DeadlinePolicy::default(),
            min_results: 0,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration, policy: DeadlinePolicy) -> Self {
        self.deadline = Some(deadline);
        self.deadline_policy = policy;
        self
    }

    pub fn with_min_results(mut self, min_results: usize) -> Self {
        self.min_results = min_results;
        self
    }
}

/// Ranked results plus the deadline-truncation flag.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub truncated: bool,
}

/// One record to insert; missing fields are filled in by the database.
#[derive(Debug, Clone)]
pub struct InsertRequest {
    pub id: Option<String>,
    pub embedding: Vec<f32>,
    pub metadata: Value,
    pub created_at: Option<i64>,
}

impl InsertRequest {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            id: None,
            embedding,
            metadata: Value::Object(Map::new()),
            created_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    fn into_record(self, id: String) -> VectorRecord {
        VectorRecord {
            id,
            embedding: self.embedding,
            metadata: self.metadata,
            created_at: self.created_at.unwrap_or_else(recalldb_core::now_ms),
        }
    }
}

/// Aggregated statistics across the composed parts.
#[derive(Debug, Clone, PartialEq)]
pub struct DbStats {
    pub dimension: usize,
    pub backend: StorageStats,
    pub hnsw: HnswStats,
    pub cache: CacheStats,
    pub quantizer: Option<QuantizerStats>,
}

struct DbInner {
    backend: Box<dyn VectorStore>,
    index: Option<HnswIndex>,
    quantizer: Option<Quantizer>,
    /// Encoded form of every record once the quantizer is trained.
    codes: HashMap<String, Code>,
}

/// Embeddable vector database.
pub struct VectorDb {
    config: DbConfig,
    inner: RwLock<DbInner>,
    cache: QueryCache,
}

impl VectorDb {
    /// Open (or create) an on-disk database at `config.path`.
    pub fn open(config: DbConfig) -> Result<Self> {
        config.validate()?;
        let path = config
            .path
            .clone()
            .ok_or_else(|| RecallError::invalid("open requires a container path"))?;
        let backend = DiskBackend::open(path, config.dimension)?;
        Self::from_backend(config, Box::new(backend))
    }

    /// Open an existing container, reading the dimension from its header.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let dimension = DiskBackend::peek_dimension(path)?;
        Self::open(DbConfig::on_disk(dimension, path))
    }

    /// Dimension recorded in an existing container's header.
    pub fn peek_dimension(path: impl AsRef<Path>) -> Result<usize> {
        DiskBackend::peek_dimension(path.as_ref())
    }

    /// Create a volatile in-memory database.
    pub fn in_memory(mut config: DbConfig) -> Result<Self> {
        config.backend = recalldb_core::BackendKind::InMemory;
        config.validate()?;
        let backend = MemoryBackend::new(config.dimension);
        Self::from_backend(config, Box::new(backend))
    }

    fn from_backend(config: DbConfig, backend: Box<dyn VectorStore>) -> Result<Self> {
        let mut inner = DbInner {
            backend,
            index: None,
            quantizer: None,
            codes: HashMap::new(),
        };

        // Revive persisted index and quantizer state.
        let (hnsw_region, quant_region) = {
            let (h, q) = inner.backend.aux_regions();
            (h.map(<[u8]>::to_vec), q.map(<[u8]>::to_vec))
        };
        if let Some(region) = quant_region {
            inner.quantizer = Some(Quantizer::from_region_bytes(&region)?);
        } else if let Some(qc) = &config.quantizer {
            inner.quantizer = Some(Quantizer::from_config(qc, config.dimension)?);
        }
        if let Some(region) = hnsw_region {
            let vectors: HashMap<String, Vec<f32>> = inner
                .backend
                .scan()
                .map(|r| (r.id.clone(), r.embedding.clone()))
                .collect();
            inner.index = Some(HnswIndex::from_region_bytes(
                &region,
                config.dimension,
                config.metric,
                config.hnsw.clone(),
                &vectors,
            )?);
        } else if inner.backend.len() >= config.hnsw.min_vectors_for_index {
            build_index(&mut inner, &config)?;
        }
        if let Some(q) = &inner.quantizer {
            if q.is_trained() {
                let codes: Result<HashMap<String, Code>> = inner
                    .backend
                    .scan()
                    .map(|r| Ok((r.id.clone(), q.encode(&r.embedding)?)))
                    .collect();
                inner.codes = codes?;
            }
        }

        info!(
            dimension = config.dimension,
            count = inner.backend.len(),
            indexed = inner.index.is_some(),
            "database opened"
        );
        Ok(Self {
            cache: QueryCache::new(config.cache.clone()),
            config,
            inner: RwLock::new(inner),
        })
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn len(&self) -> usize {
        self.inner.read().backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Insert one record, generating an id when the caller supplied none.
    pub fn insert(&self, request: InsertRequest) -> Result<String> {
        self.check_dimension(&request.embedding)?;
        let id = request
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if self.config.strict_insert && inner.backend.get(&id).is_some() {
            return Err(RecallError::AlreadyExists(id));
        }
        let record = request.into_record(id.clone());
        let embedding = record.embedding.clone();
        inner.backend.put(record)?;

        if let Some(q) = &inner.quantizer {
            if q.is_trained() {
                let code = q.encode(&embedding)?;
                inner.codes.insert(id.clone(), code);
            }
        }

        if let Some(index) = &mut inner.index {
            index.insert(&id, &embedding)?;
        } else if inner.backend.len() >= self.config.hnsw.min_vectors_for_index {
            build_index(inner, &self.config)?;
        }

        self.cache.invalidate_all();
        Ok(id)
    }

    /// Insert many records; the backend write is atomic, so on any error
    /// nothing becomes visible.
    pub fn insert_batch(&self, requests: Vec<InsertRequest>) -> Result<Vec<String>> {
        for request in &requests {
            self.check_dimension(&request.embedding)?;
        }
        let ids: Vec<String> = requests
            .iter()
            .map(|r| {
                r.id.clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            })
            .collect();

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if self.config.strict_insert {
            for id in &ids {
                if inner.backend.get(id).is_some() {
                    return Err(RecallError::AlreadyExists(id.clone()));
                }
            }
        }
        let records: Vec<VectorRecord> = requests
            .into_iter()
            .zip(ids.iter())
            .map(|(request, id)| request.into_record(id.clone()))
            .collect();

        // Encode before any mutation so a codec failure is side-effect free.
        let mut new_codes = Vec::new();
        if let Some(q) = &inner.quantizer {
            if q.is_trained() {
                for record in &records {
                    new_codes.push((record.id.clone(), q.encode(&record.embedding)?));
                }
            }
        }

        inner.backend.put_batch(records.clone())?;
        inner.codes.extend(new_codes);

        if let Some(index) = &mut inner.index {
            for record in &records {
                index.insert(&record.id, &record.embedding)?;
            }
        } else if inner.backend.len() >= self.config.hnsw.min_vectors_for_index {
            build_index(inner, &self.config)?;
        }

        self.cache.invalidate_all();
        Ok(ids)
    }

    /// Point lookup.
    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.inner.read().backend.get(id).cloned()
    }

    /// Snapshot of stored records, optionally capped. Order follows the
    /// backend scan and is unspecified.
    pub fn records(&self, limit: Option<usize>) -> Vec<VectorRecord> {
        let inner = self.inner.read();
        let iter = inner.backend.scan().cloned();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Delete a record; returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let existed = inner.backend.delete(id);
        if existed {
            inner.codes.remove(id);
            let mut drop_index = false;
            if let Some(index) = &mut inner.index {
                index.delete(id);
                // Too few live vectors to be worth a graph: drop back to
                // brute-force mode until inserts cross the threshold again.
                drop_index =
                    index.live_count() < self.config.hnsw.min_vectors_for_index / 2;
            }
            if drop_index {
                debug!("live count fell below half threshold; dropping hnsw index");
                inner.index = None;
            }
            self.cache.invalidate_all();
        }
        Ok(existed)
    }

    /// Search with default options.
    pub fn search(&self, query: &[f32], k: usize, metric: Metric) -> Result<SearchResponse> {
        self.search_with(query, &SearchOptions::new(k, metric))
    }

    /// Search with explicit options.
    pub fn search_with(&self, query: &[f32], opts: &SearchOptions) -> Result<SearchResponse> {
        self.check_dimension(query)?;
        if opts.k == 0 {
            return Ok(SearchResponse {
                results: Vec::new(),
                truncated: false,
            });
        }

        let key = QueryCache::fingerprint(query, opts.k, opts.metric, opts.threshold);
        if self.config.cache.max_size > 0 {
            if let Some(results) = self.cache.get(key) {
                return Ok(SearchResponse {
                    results,
                    truncated: false,
                });
            }
        }

        let started = Instant::now();
        let inner = self.inner.read();
        let (candidates, truncated) = self.candidate_ids(&inner, query, opts, started)?;

        let mut results = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(record) = inner.backend.get(&id) else {
                continue;
            };
            let raw = similarity(opts.metric, query, &record.embedding)?;
            let score = score_for_metric(opts.metric, raw);
            if score >= opts.threshold {
                results.push(SearchResult::new(id, score, record.metadata.clone()));
            }
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        results.truncate(opts.k);
        drop(inner);

        if !truncated && self.config.cache.max_size > 0 {
            self.cache.put(key, results.clone());
        }
        Ok(SearchResponse { results, truncated })
    }

    /// Produce the candidate id set for exact reranking.
    fn candidate_ids(
        &self,
        inner: &DbInner,
        query: &[f32],
        opts: &SearchOptions,
        started: Instant,
    ) -> Result<(Vec<String>, bool)> {
        let fetch = opts.k.max(self.config.hnsw.ef_search);

        if let Some(index) = &inner.index {
            if opts.metric == self.config.metric {
                let found = index.search(query, fetch, fetch)?;
                return Ok((found.into_iter().map(|(id, _)| id).collect(), false));
            }
        }

        // Brute-force path. With a trained quantizer this is the two-stage
        // pattern: rank every code by asymmetric distance, keep the best
        // k * rerank_factor, and let the caller rerank them exactly.
        let quantized = inner
            .quantizer
            .as_ref()
            .filter(|q| q.is_trained() && !inner.codes.is_empty());
        match quantized {
            Some(q) => {
                let rerank_factor = self
                    .config
                    .quantizer
                    .as_ref()
                    .map(|qc| qc.rerank_factor)
                    .unwrap_or(4);
                let stage1 = opts.k.saturating_mul(rerank_factor).max(fetch);
                let prepared = q.prepare(query)?;
                let mut scored: Vec<(f32, &String)> = Vec::with_capacity(inner.codes.len());
                for (i, (id, code)) in inner.codes.iter().enumerate() {
                    if let Some(stop) = self.deadline_hit(opts, started, i, scored.len())? {
                        return Ok((take_nearest(scored, stage1), stop));
                    }
                    scored.push((prepared.distance(q, code)?, id));
                }
                Ok((take_nearest(scored, stage1), false))
            }
            None => {
                let mut scored: Vec<(f32, &String)> =
                    Vec::with_capacity(inner.backend.len());
                for (i, record) in inner.backend.scan().enumerate() {
                    if let Some(stop) = self.deadline_hit(opts, started, i, scored.len())? {
                        return Ok((take_nearest(scored, fetch), stop));
                    }
                    let dist = graph_distance(opts.metric, query, &record.embedding)?;
                    scored.push((dist, &record.id));
                }
                Ok((take_nearest(scored, fetch), false))
            }
        }
    }

    /// Evaluate the cooperative deadline every [`DEADLINE_STRIDE`] items.
    ///
    /// `Some(true)` tells the caller to stop and return what it has.
    fn deadline_hit(
        &self,
        opts: &SearchOptions,
        started: Instant,
        iteration: usize,
        collected: usize,
    ) -> Result<Option<bool>> {
        let Some(deadline) = opts.deadline else {
            return Ok(None);
        };
        if iteration % DEADLINE_STRIDE != 0 || started.elapsed() <= deadline {
            return Ok(None);
        }
        match opts.deadline_policy {
            DeadlinePolicy::Partial => Ok(Some(true)),
            DeadlinePolicy::Fail if collected >= opts.min_results => Ok(Some(true)),
            DeadlinePolicy::Fail => Err(RecallError::DeadlineExceeded),
        }
    }

    /// Train the configured quantizer on the stored vectors and encode
    /// every record.
    pub fn train_quantizer(&self) -> Result<()> {
        if self.config.quantizer.is_none() {
            return Err(RecallError::invalid("no quantizer configured"));
        }
        let mut guard = self.inner.write();
        let DbInner {
            backend,
            quantizer,
            codes,
            ..
        } = &mut *guard;
        let Some(q) = quantizer else {
            return Err(RecallError::invalid("no quantizer configured"));
        };
        let records: Vec<&VectorRecord> = backend.scan().collect();
        let samples: Vec<&[f32]> = records.iter().map(|r| r.embedding.as_slice()).collect();
        q.train(&samples)?;
        codes.clear();
        for record in &records {
            codes.insert(record.id.clone(), q.encode(&record.embedding)?);
        }
        info!(samples = samples.len(), "quantizer trained");
        self.cache.invalidate_all();
        Ok(())
    }

    /// Rebuild the graph from live records, compacting tombstones.
    pub fn rebuild_index(&self) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        match &inner.index {
            Some(index) => {
                inner.index = Some(index.rebuild()?);
            }
            None => {
                if inner.backend.len() >= self.config.hnsw.min_vectors_for_index {
                    build_index(inner, &self.config)?;
                }
            }
        }
        self.cache.invalidate_all();
        Ok(())
    }

    pub fn stats(&self) -> DbStats {
        let inner = self.inner.read();
        let hnsw = match &inner.index {
            Some(index) => index.stats(),
            None => HnswStats {
                enabled: true,
                ready: false,
                ..HnswStats::default()
            },
        };
        DbStats {
            dimension: self.config.dimension,
            backend: inner.backend.stats(),
            hnsw,
            cache: self.cache.stats(),
            quantizer: inner
                .quantizer
                .as_ref()
                .filter(|q| q.is_trained())
                .map(Quantizer::stats),
        }
    }

    /// Full dump: records plus index and quantizer state.
    pub fn export(&self) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let mut container = Container::new(
            self.config.dimension as u32,
            inner.backend.scan().cloned().collect(),
        );
        container.hnsw_region = inner.index.as_ref().map(HnswIndex::to_region_bytes);
        container.quantizer_region = match &inner.quantizer {
            Some(q) if q.is_trained() => Some(q.to_region_bytes()?),
            _ => None,
        };
        container.to_bytes()
    }

    /// Replace the database contents with an exported dump.
    pub fn import(&self, bytes: &[u8]) -> Result<()> {
        let container = Container::from_bytes(bytes)?;
        if container.dimension as usize != self.config.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: self.config.dimension,
                actual: container.dimension as usize,
            });
        }

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.backend.clear()?;
        inner.backend.put_batch(container.records)?;
        inner.quantizer = match container.quantizer_region {
            Some(region) => Some(Quantizer::from_region_bytes(&region)?),
            None => match &self.config.quantizer {
                Some(qc) => Some(Quantizer::from_config(qc, self.config.dimension)?),
                None => None,
            },
        };
        inner.index = match container.hnsw_region {
            Some(region) => {
                let vectors: HashMap<String, Vec<f32>> = inner
                    .backend
                    .scan()
                    .map(|r| (r.id.clone(), r.embedding.clone()))
                    .collect();
                Some(HnswIndex::from_region_bytes(
                    &region,
                    self.config.dimension,
                    self.config.metric,
                    self.config.hnsw.clone(),
                    &vectors,
                )?)
            }
            None => None,
        };
        if inner.index.is_none() && inner.backend.len() >= self.config.hnsw.min_vectors_for_index
        {
            build_index(inner, &self.config)?;
        }

        inner.codes.clear();
        if let Some(q) = &inner.quantizer {
            if q.is_trained() {
                let codes: Result<HashMap<String, Code>> = inner
                    .backend
                    .scan()
                    .map(|r| Ok((r.id.clone(), q.encode(&r.embedding)?)))
                    .collect();
                inner.codes = codes?;
            }
        }
        self.cache.invalidate_all();
        Ok(())
    }

    /// Persist pending state, including the index and quantizer regions.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let hnsw_region = inner.index.as_ref().map(HnswIndex::to_region_bytes);
        let quant_region = match &inner.quantizer {
            Some(q) if q.is_trained() => Some(q.to_region_bytes()?),
            _ => None,
        };
        inner.backend.set_aux_regions(hnsw_region, quant_region);
        inner.backend.flush()
    }

    /// Flush and drop the handle.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    /// Drop every record, the index, and cached results.
    pub fn clear(&self) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.backend.clear()?;
        inner.index = None;
        inner.codes.clear();
        self.cache.invalidate_all();
        Ok(())
    }

    /// Cache counters; exposed for diagnostics and tests.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Resize the query cache, evicting LRU entries if shrinking.
    pub fn resize_cache(&self, new_max: usize) {
        self.cache.resize(new_max);
    }
}

/// Build the graph from every stored record.
fn build_index(inner: &mut DbInner, config: &DbConfig) -> Result<()> {
    let DbInner { backend, index, .. } = inner;
    let mut fresh = HnswIndex::new(config.dimension, config.metric, config.hnsw.clone())?;
    for record in backend.scan() {
        fresh.insert(&record.id, &record.embedding)?;
    }
    fresh.verify_invariants()?;
    info!(count = fresh.live_count(), "hnsw index built");
    *index = Some(fresh);
    Ok(())
}

/// Keep the `n` nearest of a distance-scored id list.
fn take_nearest(mut scored: Vec<(f32, &String)>, n: usize) -> Vec<String> {
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.truncate(n);
    scored.into_iter().map(|(_, id)| id.clone()).collect()
}
