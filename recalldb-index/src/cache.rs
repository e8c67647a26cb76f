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

//! Query-result cache.
//!
//! Exact-fingerprint cache of ranked result lists with TTL expiry and
//! least-recently-used eviction. Keys are an XXH64 over the first eight
//! query coordinates rounded to three decimals, k, the metric tag, and
//! the threshold. Approximate-match hits are deliberately out of scope.
//!
//! Counters are interior atomics so readers of the surrounding database
//! can record hits and misses without the writer lock.

use parking_lot::RwLock;
use recalldb_core::{CacheConfig, Metric, SearchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use twox_hash::XxHash64;

/// Coordinates folded into the fingerprint.
const KEY_PREFIX_DIMS: usize = 8;

/// Rounding applied to fingerprinted coordinates and thresholds.
const KEY_PRECISION: f32 = 1000.0;

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub evictions: u64,
    /// Mean `get` latency in microseconds.
    pub avg_access_time_us: f64,
}

struct CacheEntry {
    results: Vec<SearchResult>,
    expires_at: Instant,
    last_used: Instant,
    hits: u64,
}

/// Keyed cache of ranked results.
pub struct QueryCache {
    entries: RwLock<HashMap<u64, CacheEntry>>,
    max_size: RwLock<usize>,
    ttl: Duration,
    stats_enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    access_total_ns: AtomicU64,
    accesses: AtomicU64,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size: RwLock::new(config.max_size),
            ttl: Duration::from_millis(config.ttl_ms),
            stats_enabled: config.stats_enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            access_total_ns: AtomicU64::new(0),
            accesses: AtomicU64::new(0),
        }
    }

    /// Fingerprint for a search invocation.
    pub fn fingerprint(query: &[f32], k: usize, metric: Metric, threshold: f32) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        for &x in query.iter().take(KEY_PREFIX_DIMS) {
            let rounded = (x * KEY_PRECISION).round() as i64;
            hasher.write(&rounded.to_le_bytes());
        }
        hasher.write(&(query.len() as u64).to_le_bytes());
        hasher.write(&(k as u64).to_le_bytes());
        hasher.write(&[metric.tag()]);
        let threshold = (threshold * KEY_PRECISION).round() as i64;
        hasher.write(&threshold.to_le_bytes());
        hasher.finish()
    }

    /// Look up a key, lazily evicting it when the TTL has passed.
    pub fn get(&self, key: u64) -> Option<Vec<SearchResult>> {
        let started = Instant::now();
        let result = {
            let mut entries = self.entries.write();
            match entries.get_mut(&key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    entry.last_used = Instant::now();
                    entry.hits += 1;
                    Some(entry.results.clone())
                }
                Some(_) => {
                    entries.remove(&key);
                    None
                }
                None => None,
            }
        };
        if self.stats_enabled {
            match result {
                Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
                None => self.misses.fetch_add(1, Ordering::Relaxed),
            };
            self.access_total_ns
                .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
            self.accesses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Insert a result list, evicting the least-recently-used entry when
    /// at capacity.
    pub fn put(&self, key: u64, results: Vec<SearchResult>) {
        let max = *self.max_size.read();
        if max == 0 {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= max {
            self.evict_lru(&mut entries, 1);
        }
        entries.insert(
            key,
            CacheEntry {
                results,
                expires_at: now + self.ttl,
                last_used: now,
                hits: 0,
            },
        );
    }

    fn evict_lru(&self, entries: &mut HashMap<u64, CacheEntry>, count: usize) {
        for _ in 0..count {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(&k, _)| k);
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => return,
            }
        }
    }

    /// Drop every entry; called on any write to the underlying store.
    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    /// Change capacity, evicting LRU entries until within the new bound.
    ///
    /// Lock order matches `put`: capacity first, then the entry map.
    pub fn resize(&self, new_max: usize) {
        let mut max = self.max_size.write();
        *max = new_max;
        let mut entries = self.entries.write();
        if entries.len() > new_max {
            let excess = entries.len() - new_max;
            self.evict_lru(&mut entries, excess);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let accesses = self.accesses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            size: self.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            avg_access_time_us: if accesses == 0 {
                0.0
            } else {
                self.access_total_ns.load(Ordering::Relaxed) as f64 / accesses as f64 / 1000.0
            },
        }
    }
}
