use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::CacheDomain;
use super::metrics::CacheServiceMetrics;
use crate::error::CacheResult;
use crate::utils::domain_for_key;

/// The narrow surface business logic sees. `CacheService` is the production
/// implementation; the indirection is what keeps cache failures out of the
/// fetch path, since every call site below treats an `Err` as a miss.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn lookup(&self, domain: CacheDomain, key: &str) -> CacheResult<Option<Value>>;

    async fn store(
        &self,
        domain: CacheDomain,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> CacheResult<()>;

    async fn remove(&self, domain: CacheDomain, key: &str) -> CacheResult<bool>;

    async fn remove_pattern(&self, pattern: &str) -> CacheResult<usize>;

    async fn clear_domain(&self, domain: CacheDomain) -> CacheResult<usize>;

    async fn service_metrics(&self) -> CacheResult<CacheServiceMetrics>;
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Per-call TTL override for the stored value.
    pub ttl: Option<Duration>,
    /// Bypass the cache entirely for this call.
    pub skip_cache: bool,
}

/// Any combination of explicit keys, search patterns, and full domain
/// clears; each item is applied independently.
#[derive(Debug, Clone, Default)]
pub struct InvalidateRequest {
    pub keys: Vec<String>,
    pub patterns: Vec<String>,
    pub cache_types: Vec<CacheDomain>,
}

/// Read-through adapter between business logic and the cache service. A
/// missing or failing cache never makes a fetch worse than "slightly
/// slower".
pub struct CacheIntegration {
    provider: Option<Arc<dyn CacheProvider>>,
}

impl CacheIntegration {
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// Helper with caching turned off; every call goes straight to the
    /// fetch function.
    pub fn disabled() -> Self {
        Self { provider: None }
    }

    pub fn is_cache_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Looks up `key` in the named cache; on miss, invokes `fetch`, stores
    /// the result, and returns it. Cache-layer errors are logged and treated
    /// as misses. `fetch` runs at most once per invocation.
    pub async fn cache_or_fetch<F, Fut>(
        &self,
        domain: CacheDomain,
        key: &str,
        fetch: F,
        options: FetchOptions,
    ) -> anyhow::Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let provider = match &self.provider {
            Some(provider) if !options.skip_cache => provider,
            _ => return fetch().await,
        };

        match provider.lookup(domain, key).await {
            Ok(Some(value)) => {
                debug!("Cache hit for '{}'", key);
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Cache lookup failed for '{}', falling back to direct fetch: {}",
                    key, e
                );
            }
        }

        let value = fetch().await?;

        if let Err(e) = provider.store(domain, key, value.clone(), options.ttl).await {
            warn!("Failed to store '{}' in {} cache: {}", key, domain, e);
        }

        Ok(value)
    }

    /// Applies each key, pattern, and domain clear independently and
    /// returns the total number of entries removed. Failures are logged and
    /// skipped, never propagated.
    pub async fn invalidate_cache(&self, request: InvalidateRequest) -> usize {
        let Some(provider) = &self.provider else {
            return 0;
        };

        let mut removed = 0;

        for key in &request.keys {
            match domain_for_key(key) {
                Some(domain) => match provider.remove(domain, key).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Failed to invalidate key '{}': {}", key, e),
                },
                None => warn!("Cannot infer cache domain for key '{}', skipping", key),
            }
        }

        for pattern in &request.patterns {
            match provider.remove_pattern(pattern).await {
                Ok(count) => removed += count,
                Err(e) => warn!("Failed to invalidate pattern '{}': {}", pattern, e),
            }
        }

        for domain in &request.cache_types {
            match provider.clear_domain(*domain).await {
                Ok(count) => removed += count,
                Err(e) => warn!("Failed to clear {} cache: {}", domain, e),
            }
        }

        removed
    }

    pub async fn cache_metrics(&self) -> Option<CacheServiceMetrics> {
        let provider = self.provider.as_ref()?;
        match provider.service_metrics().await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("Failed to read cache metrics: {}", e);
                None
            }
        }
    }
}
