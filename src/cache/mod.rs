pub mod key;
pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::CacheConfig;
use crate::providers::types::{CompletionResponse, RequestOptions};

use self::store::MemoryStore;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Hit/miss counters for cache observability.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// CompletionCache -- public facade
// ---------------------------------------------------------------------------

/// Memoization cache for deterministic (non-streaming) completions.
///
/// The cache is an optimization, never a correctness dependency: any failure
/// to deserialize a stored entry degrades to a miss. Entries are tagged
/// `model:<id>` so a model's entries can be invalidated in bulk.
pub struct CompletionCache {
    store: MemoryStore,
    config: CacheConfig,
    stats: CacheStats,
}

impl CompletionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            store: MemoryStore::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    /// Whether this request participates in caching at all.
    pub fn should_check(&self, options: &RequestOptions) -> bool {
        self.config.enabled && !key::should_skip(options, &self.config)
    }

    /// Look up a cached response. Any stored-entry corruption is treated as
    /// a miss.
    pub fn lookup(&self, options: &RequestOptions) -> Option<CompletionResponse> {
        let cache_key = key::cache_key(options);

        let raw = match self.store.get(&cache_key) {
            Some(raw) => raw,
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        match serde_json::from_str::<CompletionResponse>(&raw) {
            Ok(response) => {
                self.stats.record_hit();
                Some(response)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to deserialize cached response, treating as miss");
                self.store.remove(&cache_key);
                self.stats.record_miss();
                None
            }
        }
    }

    /// Store a completed response. Serialization failure is logged and
    /// swallowed; a cache write must never fail the surrounding request.
    pub fn store(&self, options: &RequestOptions, response: &CompletionResponse) {
        let raw = match serde_json::to_string(response) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize response for cache");
                return;
            }
        };

        let cache_key = key::cache_key(options);
        let tags = vec![format!("model:{}", options.model)];
        self.store.set(
            &cache_key,
            raw,
            Duration::from_secs(self.config.ttl_secs),
            &tags,
        );
        self.stats.record_store();

        if self.config.max_entries > 0 && self.store.len() > self.config.max_entries {
            let purged = self.store.purge_expired();
            tracing::debug!(purged, "Cache over capacity, purged expired entries");
        }
    }

    /// Invalidate every entry for a model. Returns how many were removed.
    pub fn invalidate_model(&self, model: &str) -> usize {
        self.store.invalidate_tag(&format!("model:{model}"))
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Entry count.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
