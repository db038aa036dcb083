use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use super::metrics::CacheMetrics;

/// Size charged to an entry when the estimator fails. A pathological value
/// must never block caching altogether.
pub(crate) const FALLBACK_ENTRY_SIZE: u64 = 1000;

/// Why an entry left the cache. Passed to the disposal hook exactly once
/// per removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Expired,
    Evicted,
    Deleted,
    Replaced,
    Cleared,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Expired => "expired",
            RemovalReason::Evicted => "evicted",
            RemovalReason::Deleted => "deleted",
            RemovalReason::Replaced => "replaced",
            RemovalReason::Cleared => "cleared",
        }
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type SizeEstimator<V> = Arc<dyn Fn(&V) -> anyhow::Result<u64> + Send + Sync>;
pub type DisposalHook<V> = Arc<dyn Fn(&str, &V, RemovalReason) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BoundedCacheConfig {
    /// Label used in log lines and diagnostics.
    pub name: String,
    pub max_entries: usize,
    pub ttl: Duration,
    /// Reset the TTL clock on every read.
    pub update_age_on_get: bool,
    pub max_memory_bytes: u64,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    size: u64,
    expires_at: Instant,
    ttl: Duration,
    /// Monotonic use tick; the entry with the lowest tick is the LRU victim.
    last_used: u64,
}

/// String-keyed LRU store with per-entry TTL, byte budgeting, and a
/// disposal hook. Eviction happens synchronously inside `set`; expiry is
/// detected lazily on read and proactively by `purge_stale`.
pub struct BoundedCache<V> {
    config: BoundedCacheConfig,
    entries: HashMap<String, Entry<V>>,
    memory_bytes: u64,
    hits: u64,
    misses: u64,
    use_clock: u64,
    size_of: SizeEstimator<V>,
    disposer: Option<DisposalHook<V>>,
}

impl<V: fmt::Debug> fmt::Debug for BoundedCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("config", &self.config)
            .field("entries", &self.entries)
            .field("memory_bytes", &self.memory_bytes)
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .field("use_clock", &self.use_clock)
            .finish_non_exhaustive()
    }
}

fn json_size<V: Serialize>(value: &V) -> anyhow::Result<u64> {
    Ok(serde_json::to_vec(value)?.len() as u64)
}

impl<V: Serialize + 'static> BoundedCache<V> {
    /// Cache whose entry sizes are measured by JSON encoding length.
    pub fn new(config: BoundedCacheConfig) -> Self {
        Self::with_estimator(config, Arc::new(json_size::<V>))
    }
}

impl<V> BoundedCache<V> {
    pub fn with_estimator(config: BoundedCacheConfig, size_of: SizeEstimator<V>) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            memory_bytes: 0,
            hits: 0,
            misses: 0,
            use_clock: 0,
            size_of,
            disposer: None,
        }
    }

    pub fn set_disposer(&mut self, hook: DisposalHook<V>) {
        self.disposer = Some(hook);
    }

    pub fn config(&self) -> &BoundedCacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics::new(self.hits, self.misses, self.entries.len(), self.memory_bytes)
    }

    /// Inserts or replaces an entry, then evicts least-recently-used
    /// entries until both the entry-count and byte ceilings hold.
    pub fn set(&mut self, key: &str, value: V, ttl_override: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl_override.unwrap_or(self.config.ttl);
        let size = self.estimate_size(&value);

        if let Some(previous) = self.entries.remove(key) {
            self.memory_bytes = self.memory_bytes.saturating_sub(previous.size);
            self.dispose(key, &previous.value, RemovalReason::Replaced);
        }

        self.use_clock += 1;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                size,
                expires_at: now + ttl,
                ttl,
                last_used: self.use_clock,
            },
        );
        self.memory_bytes += size;

        self.enforce_limits();
    }

    pub fn delete(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.memory_bytes = self.memory_bytes.saturating_sub(entry.size);
                self.dispose(key, &entry.value, RemovalReason::Deleted);
                true
            }
            None => false,
        }
    }

    /// Removes every entry whose key contains `pattern`. Returns the count
    /// removed.
    pub fn remove_matching(&mut self, pattern: &str) -> usize {
        let matched: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.contains(pattern))
            .cloned()
            .collect();

        for key in &matched {
            if let Some(entry) = self.entries.remove(key) {
                self.memory_bytes = self.memory_bytes.saturating_sub(entry.size);
                self.dispose(key, &entry.value, RemovalReason::Deleted);
            }
        }

        matched.len()
    }

    /// Proactively removes entries whose TTL has elapsed. Intended to run
    /// from periodic maintenance rather than relying on lazy expiry alone.
    pub fn purge_stale(&mut self) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            if let Some(entry) = self.entries.remove(key) {
                self.memory_bytes = self.memory_bytes.saturating_sub(entry.size);
                self.dispose(key, &entry.value, RemovalReason::Expired);
            }
        }

        stale.len()
    }

    pub fn clear(&mut self) -> usize {
        let drained: Vec<(String, Entry<V>)> = self.entries.drain().collect();
        for (key, entry) in &drained {
            self.dispose(key, &entry.value, RemovalReason::Cleared);
        }
        self.memory_bytes = 0;
        drained.len()
    }

    /// Evicts least-recently-used entries until the cache fits the given
    /// ceilings. Used by emergency cleanup under memory pressure.
    pub fn evict_to(&mut self, max_entries: usize, max_memory_bytes: u64) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_entries || self.memory_bytes > max_memory_bytes {
            if !self.evict_lru() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn enforce_limits(&mut self) {
        while self.entries.len() > self.config.max_entries
            || self.memory_bytes > self.config.max_memory_bytes
        {
            if !self.evict_lru() {
                break;
            }
        }
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());

        match victim {
            Some(key) => {
                if let Some(entry) = self.entries.remove(&key) {
                    self.memory_bytes = self.memory_bytes.saturating_sub(entry.size);
                    self.dispose(&key, &entry.value, RemovalReason::Evicted);
                }
                true
            }
            None => false,
        }
    }

    fn estimate_size(&self, value: &V) -> u64 {
        match (self.size_of)(value) {
            Ok(size) => size,
            Err(e) => {
                warn!(
                    "Size estimation failed in {} cache, charging {} bytes: {}",
                    self.config.name, FALLBACK_ENTRY_SIZE, e
                );
                FALLBACK_ENTRY_SIZE
            }
        }
    }

    /// Non-counting read: no recency update, no TTL refresh, no hit/miss
    /// bookkeeping. Expired entries are treated as absent but left for the
    /// next `get` or `purge_stale` to remove.
    pub fn peek(&self, key: &str) -> Option<&V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| &entry.value)
    }

    fn dispose(&self, key: &str, value: &V, reason: RemovalReason) {
        if let Some(hook) = &self.disposer {
            hook(key, value, reason);
        }
    }
}

impl<V: Clone> BoundedCache<V> {
    /// Returns the value if present and unexpired. A read marks the entry
    /// most-recently-used; with `update_age_on_get` it also resets the TTL
    /// clock. An expired entry is removed on the spot and counted a miss.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.use_clock += 1;
        let tick = self.use_clock;

        match self.entries.get_mut(key) {
            None => {
                self.misses += 1;
                None
            }
            Some(entry) if now < entry.expires_at => {
                entry.last_used = tick;
                if self.config.update_age_on_get {
                    entry.expires_at = now + entry.ttl;
                }
                self.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                if let Some(entry) = self.entries.remove(key) {
                    self.memory_bytes = self.memory_bytes.saturating_sub(entry.size);
                    self.dispose(key, &entry.value, RemovalReason::Expired);
                }
                self.misses += 1;
                None
            }
        }
    }
}
