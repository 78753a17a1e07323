//! Metric Cache
//!
//! Process-lifetime TTL cache of gathered series, keyed by a SHA-256
//! fingerprint of `(datasource, query, time range)`.
//!
//! Expired entries are removed lazily on access, by a sweep when an insert
//! finds the cache more than half full, and by a periodic background task.
//! The sweep never evicts live entries, so unique keys with long TTLs grow
//! the cache without bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::config::CacheConfig;
use crate::domain::{MetricSeries, TimeRange};
use crate::telemetry;

// =============================================================================
// Cache Key
// =============================================================================

/// Deterministic fingerprint of a query against one datasource and range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(datasource_id: &str, query: &str, range: &TimeRange) -> Self {
        let mut hasher = Sha256::new();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        for part in [datasource_id.as_bytes(), query.as_bytes()] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        for ts in [range.start, range.end] {
            hasher.update(ts.timestamp().to_be_bytes());
            hasher.update(ts.timestamp_subsec_nanos().to_be_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

#[derive(Debug)]
struct CacheEntry {
    data: Vec<MetricSeries>,
    expires: Instant,
    hit_count: AtomicU64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: u64,
}

impl CacheState {
    fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }
}

// =============================================================================
// Metric Cache
// =============================================================================

/// Thread-safe TTL cache for gathered metric series.
#[derive(Debug)]
pub struct MetricCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
}

impl MetricCache {
    /// Create a cache and, when called inside a tokio runtime, start its
    /// background sweep. The sweep ends once the last handle is dropped.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let cache = Arc::new(Self {
            config,
            state: RwLock::new(CacheState::default()),
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(sweep_loop(Arc::downgrade(&cache), cache.config.sweep_interval));
        }

        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up live data for `key`.
    ///
    /// An expired entry is deleted and counted as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<MetricSeries>> {
        let now = Instant::now();

        {
            let state = self.state.read();
            if let Some(entry) = state.entries.get(key) {
                if entry.is_live(now) {
                    entry.hit_count.fetch_add(1, Ordering::Relaxed);
                    state.hits.fetch_add(1, Ordering::Relaxed);
                    telemetry::record_cache_lookup(true);
                    return Some(entry.data.clone());
                }
            }
        }

        let mut state = self.state.write();
        // Another writer may have refreshed the entry in between.
        if let Some(entry) = state.entries.get(key) {
            if entry.is_live(now) {
                entry.hit_count.fetch_add(1, Ordering::Relaxed);
                let data = entry.data.clone();
                state.hits.fetch_add(1, Ordering::Relaxed);
                telemetry::record_cache_lookup(true);
                return Some(data);
            }
            trace!(key = %key, "Removing expired cache entry");
            state.entries.remove(key);
        }
        state.misses += 1;
        telemetry::record_cache_lookup(false);
        None
    }

    /// Store `data` under `key`, replacing any previous entry.
    pub fn set(&self, key: CacheKey, data: Vec<MetricSeries>) {
        let now = Instant::now();
        let mut state = self.state.write();

        if state.entries.len() * 2 > self.config.max_size {
            let removed = state.sweep_expired(now);
            if removed > 0 {
                debug!(removed, "Swept expired cache entries before insert");
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                data,
                expires: now + self.config.max_age,
                hit_count: AtomicU64::new(0),
            },
        );
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.state.write().sweep_expired(Instant::now())
    }

    /// Hit count of a single entry, if present.
    pub fn entry_hits(&self, key: &CacheKey) -> Option<u64> {
        self.state
            .read()
            .entries
            .get(key)
            .map(|e| e.hit_count.load(Ordering::Relaxed))
    }

    /// Drop all entries and reset the counters.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.hits.store(0, Ordering::Relaxed);
        state.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        let hits = state.hits.load(Ordering::Relaxed);
        let misses = state.misses;
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            hit_rate,
            size: state.entries.len(),
        }
    }
}

async fn sweep_loop(cache: Weak<MetricCache>, period: std::time::Duration) {
    let mut tick = tokio::time::interval(period);
    // First tick completes immediately; there is nothing to sweep yet.
    tick.tick().await;

    loop {
        tick.tick().await;
        let Some(cache) = cache.upgrade() else {
            debug!("Metric cache dropped, stopping sweep");
            return;
        };
        let removed = cache.sweep_expired();
        if removed > 0 {
            debug!(removed, "Periodic cache sweep");
        }
    }
}

/// Cache performance statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups that hit, `0.0..=100.0`
    pub hit_rate: f64,
    pub size: usize,
}
