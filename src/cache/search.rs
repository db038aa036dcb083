use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::bounded::{BoundedCache, BoundedCacheConfig};
use super::metrics::SearchCacheMetrics;
use crate::config::SearchCacheConfig;

// Adaptive TTL tuning. A rewrite that changes a query's results halves the
// signature's multiplier; a stable rewrite grows it back.
const TTL_SHRINK_FACTOR: f64 = 0.5;
const TTL_GROW_FACTOR: f64 = 1.25;
const MIN_TTL_MULTIPLIER: f64 = 0.25;
const MAX_TTL_MULTIPLIER: f64 = 2.0;

/// Two-tier search cache: normalized query signatures map to canonical
/// query objects in one store and to result sets in the other, each with
/// independent TTL. Splitting the tiers lets result freshness be tuned
/// without re-deriving normalized query representations.
#[derive(Debug)]
pub struct SearchCache {
    config: SearchCacheConfig,
    queries: BoundedCache<Value>,
    results: BoundedCache<Value>,
    /// Per-signature TTL multiplier observed from result volatility.
    volatility: HashMap<String, f64>,
}

impl SearchCache {
    pub fn new(config: SearchCacheConfig) -> Self {
        // Both stores are count-bounded; byte budgeting for search entries
        // is handled by the service-level global limit.
        let queries = BoundedCache::new(BoundedCacheConfig {
            name: "search:queries".to_string(),
            max_entries: config.max_queries,
            ttl: config.query_ttl(),
            update_age_on_get: false,
            max_memory_bytes: u64::MAX,
        });
        let results = BoundedCache::new(BoundedCacheConfig {
            name: "search:results".to_string(),
            max_entries: config.max_results,
            ttl: config.result_ttl(),
            update_age_on_get: false,
            max_memory_bytes: u64::MAX,
        });

        Self {
            config,
            queries,
            results,
            volatility: HashMap::new(),
        }
    }

    pub fn get_query(&mut self, signature: &str) -> Option<Value> {
        self.queries.get(signature)
    }

    pub fn set_query(&mut self, signature: &str, query: Value) {
        self.queries.set(signature, query, None);
    }

    pub fn get_results(&mut self, signature: &str) -> Option<Value> {
        self.results.get(signature)
    }

    pub fn set_results(&mut self, signature: &str, results: Value) {
        let ttl = if self.config.adaptive_ttl {
            Some(self.adaptive_result_ttl(signature, &results))
        } else {
            None
        };
        self.results.set(signature, results, ttl);

        // The multiplier map is bounded by the live signature set.
        if self.volatility.len() > self.config.max_results * 2 {
            let live = &self.results;
            self.volatility.retain(|sig, _| live.peek(sig).is_some());
        }
    }

    /// Caller-pinned TTL write, bypassing the adaptive computation.
    pub fn set_results_with_ttl(&mut self, signature: &str, results: Value, ttl: Duration) {
        self.results.set(signature, results, Some(ttl));
    }

    /// Removes every query and result entry whose signature contains the
    /// pattern, returning the count removed. With pattern invalidation
    /// disabled, falls back to dropping both stores wholesale.
    pub fn invalidate_pattern(&mut self, pattern: &str) -> usize {
        if !self.config.enable_pattern_invalidation {
            debug!(
                "Pattern invalidation disabled, clearing search cache for pattern '{}'",
                pattern
            );
            return self.clear();
        }

        let removed = self.queries.remove_matching(pattern) + self.results.remove_matching(pattern);
        self.volatility.retain(|sig, _| !sig.contains(pattern));
        removed
    }

    pub fn invalidate_channel(&mut self, channel_id: &str) -> usize {
        self.invalidate_pattern(channel_id)
    }

    pub fn invalidate_user(&mut self, user_id: &str) -> usize {
        self.invalidate_pattern(user_id)
    }

    /// Drops one signature from both stores. A result entry never outlives
    /// the invalidation of its query signature.
    pub fn invalidate_signature(&mut self, signature: &str) -> bool {
        let had_query = self.queries.delete(signature);
        let had_results = self.results.delete(signature);
        self.volatility.remove(signature);
        had_query || had_results
    }

    pub fn purge_stale(&mut self) -> usize {
        self.queries.purge_stale() + self.results.purge_stale()
    }

    pub fn clear(&mut self) -> usize {
        self.volatility.clear();
        self.queries.clear() + self.results.clear()
    }

    /// Evicts oldest-access-first until both stores fit the given fraction
    /// of their configured capacities.
    pub fn shrink_to(&mut self, fraction: f64) -> usize {
        let query_cap = (self.config.max_queries as f64 * fraction) as usize;
        let result_cap = (self.config.max_results as f64 * fraction) as usize;
        self.queries.evict_to(query_cap, u64::MAX) + self.results.evict_to(result_cap, u64::MAX)
    }

    pub fn memory_bytes(&self) -> u64 {
        self.queries.memory_bytes() + self.results.memory_bytes()
    }

    pub fn metrics(&self) -> SearchCacheMetrics {
        SearchCacheMetrics {
            queries: self.queries.metrics(),
            results: self.results.metrics(),
        }
    }

    fn adaptive_result_ttl(&mut self, signature: &str, results: &Value) -> Duration {
        let multiplier = self.volatility.entry(signature.to_string()).or_insert(1.0);

        if let Some(previous) = self.results.peek(signature) {
            if previous != results {
                *multiplier = (*multiplier * TTL_SHRINK_FACTOR).max(MIN_TTL_MULTIPLIER);
            } else {
                *multiplier = (*multiplier * TTL_GROW_FACTOR).min(MAX_TTL_MULTIPLIER);
            }
        }

        let scaled = (self.config.result_ttl_ms as f64 * *multiplier) as u64;
        let clamped = scaled.clamp(self.config.min_result_ttl_ms, self.config.max_result_ttl_ms);
        Duration::from_millis(clamped)
    }
}
