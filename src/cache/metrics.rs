use serde::{Deserialize, Serialize};

/// Hit/miss counters and footprint for a single cache store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Hit rate as a percentage; 0.0 when the store has seen no traffic.
    pub hit_rate: f64,
    pub entries: usize,
    pub memory_bytes: u64,
}

impl CacheMetrics {
    pub fn new(hits: u64, misses: u64, entries: usize, memory_bytes: u64) -> Self {
        Self {
            hits,
            misses,
            hit_rate: hit_rate_pct(hits, misses),
            entries,
            memory_bytes,
        }
    }

    pub fn samples(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Query store and result store are tracked separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCacheMetrics {
    pub queries: CacheMetrics,
    pub results: CacheMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheServiceMetrics {
    pub channels: CacheMetrics,
    pub users: CacheMetrics,
    pub files: CacheMetrics,
    pub threads: CacheMetrics,
    pub search: SearchCacheMetrics,
    pub totals: CacheTotals,
}

/// Sum of hits/misses/memory across every owned store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheTotals {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_bytes: u64,
}

impl CacheServiceMetrics {
    pub fn aggregate(
        channels: CacheMetrics,
        users: CacheMetrics,
        files: CacheMetrics,
        threads: CacheMetrics,
        search: SearchCacheMetrics,
    ) -> Self {
        let stores = [
            &channels,
            &users,
            &files,
            &threads,
            &search.queries,
            &search.results,
        ];

        let hits: u64 = stores.iter().map(|m| m.hits).sum();
        let misses: u64 = stores.iter().map(|m| m.misses).sum();
        let memory_bytes: u64 = stores.iter().map(|m| m.memory_bytes).sum();

        Self {
            channels,
            users,
            files,
            threads,
            search,
            totals: CacheTotals {
                hits,
                misses,
                hit_rate: hit_rate_pct(hits, misses),
                memory_bytes,
            },
        }
    }
}

/// One row of `CacheService::get_cache_instances` diagnostics output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInstanceInfo {
    pub name: String,
    pub max_entries: usize,
    pub ttl_ms: u64,
    pub update_age_on_get: bool,
    /// None for the count-bounded search stores.
    pub max_memory_bytes: Option<u64>,
    pub metrics: CacheMetrics,
}

pub(crate) fn hit_rate_pct(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hit_rate_with_no_traffic() {
        let metrics = CacheMetrics::new(0, 0, 0, 0);
        assert_eq!(metrics.hit_rate, 0.0);
        assert_eq!(metrics.samples(), 0);
    }

    #[test]
    fn test_hit_rate_percentage() {
        let metrics = CacheMetrics::new(3, 1, 3, 100);
        assert_eq!(metrics.hit_rate, 75.0);
    }

    #[test]
    fn test_aggregate_totals() {
        let store = |hits, misses, bytes| CacheMetrics::new(hits, misses, 1, bytes);
        let aggregated = CacheServiceMetrics::aggregate(
            store(10, 10, 100),
            store(5, 5, 200),
            store(0, 0, 0),
            store(1, 1, 50),
            SearchCacheMetrics {
                queries: store(2, 0, 25),
                results: store(2, 2, 75),
            },
        );

        assert_eq!(aggregated.totals.hits, 20);
        assert_eq!(aggregated.totals.misses, 18);
        assert_eq!(aggregated.totals.memory_bytes, 450);
        assert!((aggregated.totals.hit_rate - 20.0 / 38.0 * 100.0).abs() < 1e-9);
    }
}
