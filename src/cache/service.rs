use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::CacheDomain;
use super::bounded::{BoundedCache, BoundedCacheConfig};
use super::integration::CacheProvider;
use super::metrics::{CacheInstanceInfo, CacheMetrics, CacheServiceMetrics};
use super::search::SearchCache;
use crate::config::{CacheSettings, DomainCacheConfig};
use crate::error::CacheResult;

// Memory-pressure thresholds against the global limit.
const MEMORY_WARN_RATIO: f64 = 0.90;
const MEMORY_EMERGENCY_RATIO: f64 = 0.95;
/// Emergency cleanup shrinks every cache to this fraction of its
/// configured ceilings.
const EMERGENCY_SHRINK_FRACTION: f64 = 0.75;

const HEALTH_MIN_HIT_RATE_PCT: f64 = 50.0;

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub name: String,
    pub healthy: bool,
    pub hit_rate: f64,
    pub samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CacheHealth {
    fn from_metrics(name: &str, metrics: &CacheMetrics) -> Self {
        let samples = metrics.samples();
        let (healthy, reason) = if samples == 0 {
            (false, Some("no traffic".to_string()))
        } else if metrics.hit_rate < HEALTH_MIN_HIT_RATE_PCT {
            (
                false,
                Some(format!(
                    "hit rate {:.1}% below {:.0}% threshold",
                    metrics.hit_rate, HEALTH_MIN_HIT_RATE_PCT
                )),
            )
        } else {
            (true, None)
        };

        Self {
            name: name.to_string(),
            healthy,
            hit_rate: metrics.hit_rate,
            samples,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub caches: Vec<CacheHealth>,
    pub memory_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u64>,
    pub generated_at: DateTime<Utc>,
}

/// Owns the four domain caches and the search cache. All external access
/// goes through the accessors or the `CacheProvider` surface; nothing else
/// ever holds the underlying stores.
#[derive(Debug)]
pub struct CacheService {
    settings: CacheSettings,
    channels: Mutex<BoundedCache<Value>>,
    users: Mutex<BoundedCache<Value>>,
    files: Mutex<BoundedCache<Value>>,
    threads: Mutex<BoundedCache<Value>>,
    search: Mutex<SearchCache>,
    maintenance_task: Mutex<Option<JoinHandle<()>>>,
}

fn build_domain_cache(name: &str, config: &DomainCacheConfig) -> BoundedCache<Value> {
    let mut cache = BoundedCache::new(BoundedCacheConfig {
        name: name.to_string(),
        max_entries: config.max_entries,
        ttl: config.ttl(),
        update_age_on_get: config.update_age_on_get,
        max_memory_bytes: config.max_memory_bytes,
    });

    let label = name.to_string();
    cache.set_disposer(Arc::new(move |key, _value, reason| {
        debug!("{} cache removed '{}' ({})", label, key, reason);
    }));

    cache
}

impl CacheService {
    /// Validates the settings eagerly; a service is never handed out in a
    /// half-initialized state.
    pub fn new(settings: CacheSettings) -> CacheResult<Self> {
        settings.validate()?;

        Ok(Self {
            channels: Mutex::new(build_domain_cache("channels", &settings.channels)),
            users: Mutex::new(build_domain_cache("users", &settings.users)),
            files: Mutex::new(build_domain_cache("files", &settings.files)),
            threads: Mutex::new(build_domain_cache("threads", &settings.threads)),
            search: Mutex::new(SearchCache::new(settings.search.clone())),
            maintenance_task: Mutex::new(None),
            settings,
        })
    }

    pub fn channel_cache(&self) -> &Mutex<BoundedCache<Value>> {
        &self.channels
    }

    pub fn user_cache(&self) -> &Mutex<BoundedCache<Value>> {
        &self.users
    }

    pub fn file_cache(&self) -> &Mutex<BoundedCache<Value>> {
        &self.files
    }

    pub fn thread_cache(&self) -> &Mutex<BoundedCache<Value>> {
        &self.threads
    }

    pub fn search_cache(&self) -> &Mutex<SearchCache> {
        &self.search
    }

    /// Fans a channel mutation out across every cache that may hold state
    /// scoped to the channel. Each cache is handled independently so a
    /// problem in one never aborts the sweep; the count accumulated so far
    /// is still returned.
    pub async fn invalidate_by_channel(&self, channel_id: &str) -> usize {
        let mut removed = 0;

        {
            let mut channels = self.channels.lock().await;
            if channels.delete(channel_id) {
                removed += 1;
            }
            removed += channels.remove_matching(channel_id);
        }

        removed += self.search.lock().await.invalidate_channel(channel_id);
        removed += self.threads.lock().await.remove_matching(channel_id);
        removed += self.files.lock().await.remove_matching(channel_id);

        debug!(
            "Invalidated {} cache entries for channel {}",
            removed, channel_id
        );
        removed
    }

    pub async fn invalidate_by_user(&self, user_id: &str) -> usize {
        let mut removed = 0;

        {
            let mut users = self.users.lock().await;
            if users.delete(user_id) {
                removed += 1;
            }
            removed += users.remove_matching(user_id);
        }

        removed += self.search.lock().await.invalidate_user(user_id);
        removed += self.threads.lock().await.remove_matching(user_id);
        removed += self.files.lock().await.remove_matching(user_id);

        debug!("Invalidated {} cache entries for user {}", removed, user_id);
        removed
    }

    pub async fn clear_all(&self) -> usize {
        let mut removed = self.channels.lock().await.clear();
        removed += self.users.lock().await.clear();
        removed += self.files.lock().await.clear();
        removed += self.threads.lock().await.clear();
        removed += self.search.lock().await.clear();

        info!("Cleared all caches ({} entries)", removed);
        removed
    }

    pub async fn get_metrics(&self) -> CacheServiceMetrics {
        CacheServiceMetrics::aggregate(
            self.channels.lock().await.metrics(),
            self.users.lock().await.metrics(),
            self.files.lock().await.metrics(),
            self.threads.lock().await.metrics(),
            self.search.lock().await.metrics(),
        )
    }

    /// Enumerates every owned cache with its configuration and current
    /// metrics, for diagnostics surfaces.
    pub async fn get_cache_instances(&self) -> Vec<CacheInstanceInfo> {
        let mut instances = Vec::with_capacity(6);

        for cache in [&self.channels, &self.users, &self.files, &self.threads] {
            let guard = cache.lock().await;
            let config = guard.config();
            instances.push(CacheInstanceInfo {
                name: config.name.clone(),
                max_entries: config.max_entries,
                ttl_ms: config.ttl.as_millis() as u64,
                update_age_on_get: config.update_age_on_get,
                max_memory_bytes: Some(config.max_memory_bytes),
                metrics: guard.metrics(),
            });
        }

        let search = self.search.lock().await;
        let search_config = &self.settings.search;
        let search_metrics = search.metrics();
        instances.push(CacheInstanceInfo {
            name: "search:queries".to_string(),
            max_entries: search_config.max_queries,
            ttl_ms: search_config.query_ttl_ms,
            update_age_on_get: false,
            max_memory_bytes: None,
            metrics: search_metrics.queries,
        });
        instances.push(CacheInstanceInfo {
            name: "search:results".to_string(),
            max_entries: search_config.max_results,
            ttl_ms: search_config.result_ttl_ms,
            update_age_on_get: false,
            max_memory_bytes: None,
            metrics: search_metrics.results,
        });

        instances
    }

    /// Purges stale entries everywhere, then checks the global memory
    /// budget. Never fails: a bad maintenance pass must not disturb
    /// in-flight reads and writes or the periodic timer.
    pub async fn perform_maintenance(&self) {
        let mut purged = self.channels.lock().await.purge_stale();
        purged += self.users.lock().await.purge_stale();
        purged += self.files.lock().await.purge_stale();
        purged += self.threads.lock().await.purge_stale();
        purged += self.search.lock().await.purge_stale();

        if purged > 0 {
            debug!("Maintenance purged {} stale cache entries", purged);
        }

        let Some(limit) = self.settings.global_memory_limit else {
            return;
        };

        let usage = self.total_memory_bytes().await;
        let ratio = usage as f64 / limit as f64;

        if ratio > MEMORY_EMERGENCY_RATIO {
            warn!(
                "Cache memory usage {} bytes exceeds {:.0}% of the {} byte limit, shedding entries",
                usage,
                MEMORY_EMERGENCY_RATIO * 100.0,
                limit
            );
            let evicted = self.emergency_cleanup().await;
            warn!("Emergency cleanup evicted {} cache entries", evicted);
        } else if ratio > MEMORY_WARN_RATIO {
            warn!(
                "Cache memory usage {} bytes exceeds {:.0}% of the {} byte limit",
                usage,
                MEMORY_WARN_RATIO * 100.0,
                limit
            );
        }
    }

    /// Starts the periodic maintenance ticker. Idempotent: a second call
    /// while the ticker is running is a no-op.
    pub async fn initialize(self: &Arc<Self>) {
        let mut task = self.maintenance_task.lock().await;
        if task.is_some() {
            return;
        }

        let service = Arc::clone(self);
        let interval = Duration::from_secs(self.settings.maintenance_interval_secs);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.perform_maintenance().await;
            }
        }));

        info!(
            "Cache maintenance scheduled every {}s",
            self.settings.maintenance_interval_secs
        );
    }

    /// Cancels the maintenance ticker and empties every cache.
    pub async fn shutdown(&self) {
        if let Some(task) = self.maintenance_task.lock().await.take() {
            task.abort();
        }
        self.clear_all().await;
        info!("Cache service shut down");
    }

    pub async fn get_health_status(&self) -> ServiceHealth {
        let metrics = self.get_metrics().await;

        let caches = vec![
            CacheHealth::from_metrics("channels", &metrics.channels),
            CacheHealth::from_metrics("users", &metrics.users),
            CacheHealth::from_metrics("files", &metrics.files),
            CacheHealth::from_metrics("threads", &metrics.threads),
            CacheHealth::from_metrics("search:queries", &metrics.search.queries),
            CacheHealth::from_metrics("search:results", &metrics.search.results),
        ];

        let memory_bytes = metrics.totals.memory_bytes;
        let memory_ok = match self.settings.global_memory_limit {
            Some(limit) => (memory_bytes as f64) < limit as f64 * MEMORY_WARN_RATIO,
            None => true,
        };

        ServiceHealth {
            healthy: caches.iter().all(|cache| cache.healthy) && memory_ok,
            caches,
            memory_bytes,
            memory_limit: self.settings.global_memory_limit,
            generated_at: Utc::now(),
        }
    }

    async fn total_memory_bytes(&self) -> u64 {
        self.channels.lock().await.memory_bytes()
            + self.users.lock().await.memory_bytes()
            + self.files.lock().await.memory_bytes()
            + self.threads.lock().await.memory_bytes()
            + self.search.lock().await.memory_bytes()
    }

    async fn emergency_cleanup(&self) -> usize {
        let mut evicted = 0;

        for cache in [&self.channels, &self.users, &self.files, &self.threads] {
            let mut guard = cache.lock().await;
            let max_entries =
                (guard.config().max_entries as f64 * EMERGENCY_SHRINK_FRACTION) as usize;
            let max_bytes =
                (guard.config().max_memory_bytes as f64 * EMERGENCY_SHRINK_FRACTION) as u64;
            evicted += guard.evict_to(max_entries, max_bytes);
        }

        evicted += self.search.lock().await.shrink_to(EMERGENCY_SHRINK_FRACTION);
        evicted
    }
}

#[async_trait]
impl CacheProvider for CacheService {
    async fn lookup(&self, domain: CacheDomain, key: &str) -> CacheResult<Option<Value>> {
        let value = match domain {
            CacheDomain::Channels => self.channels.lock().await.get(key),
            CacheDomain::Users => self.users.lock().await.get(key),
            CacheDomain::Files => self.files.lock().await.get(key),
            CacheDomain::Threads => self.threads.lock().await.get(key),
            CacheDomain::Search => self.search.lock().await.get_results(key),
        };
        Ok(value)
    }

    async fn store(
        &self,
        domain: CacheDomain,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        match domain {
            CacheDomain::Channels => self.channels.lock().await.set(key, value, ttl),
            CacheDomain::Users => self.users.lock().await.set(key, value, ttl),
            CacheDomain::Files => self.files.lock().await.set(key, value, ttl),
            CacheDomain::Threads => self.threads.lock().await.set(key, value, ttl),
            CacheDomain::Search => {
                let mut search = self.search.lock().await;
                match ttl {
                    Some(ttl) => search.set_results_with_ttl(key, value, ttl),
                    None => search.set_results(key, value),
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, domain: CacheDomain, key: &str) -> CacheResult<bool> {
        let removed = match domain {
            CacheDomain::Channels => self.channels.lock().await.delete(key),
            CacheDomain::Users => self.users.lock().await.delete(key),
            CacheDomain::Files => self.files.lock().await.delete(key),
            CacheDomain::Threads => self.threads.lock().await.delete(key),
            CacheDomain::Search => self.search.lock().await.invalidate_signature(key),
        };
        Ok(removed)
    }

    async fn remove_pattern(&self, pattern: &str) -> CacheResult<usize> {
        Ok(self.search.lock().await.invalidate_pattern(pattern))
    }

    async fn clear_domain(&self, domain: CacheDomain) -> CacheResult<usize> {
        let cleared = match domain {
            CacheDomain::Channels => self.channels.lock().await.clear(),
            CacheDomain::Users => self.users.lock().await.clear(),
            CacheDomain::Files => self.files.lock().await.clear(),
            CacheDomain::Threads => self.threads.lock().await.clear(),
            CacheDomain::Search => self.search.lock().await.clear(),
        };
        Ok(cleared)
    }

    async fn service_metrics(&self) -> CacheResult<CacheServiceMetrics> {
        Ok(self.get_metrics().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::advance;

    fn small_settings() -> CacheSettings {
        let mut settings = CacheSettings::default();
        settings.channels.max_entries = 8;
        settings.users.max_entries = 8;
        settings.files.max_entries = 8;
        settings.threads.max_entries = 8;
        settings
    }

    async fn populate_channel_scoped(service: &CacheService) {
        service
            .channel_cache()
            .lock()
            .await
            .set("C1", json!({"id": "C1"}), None);
        service
            .channel_cache()
            .lock()
            .await
            .set("channels:info:C1", json!({"id": "C1"}), None);
        service
            .thread_cache()
            .lock()
            .await
            .set("threads:replies:C1:1724680000.000100", json!(["r1"]), None);
        service
            .file_cache()
            .lock()
            .await
            .set("files:list:channel:C1", json!(["F1"]), None);

        let mut search = service.search_cache().lock().await;
        search.set_query("search:messages:channel:C1|query:deploy", json!({}));
        search.set_results("search:messages:channel:C1|query:deploy", json!(["m1"]));
    }

    #[tokio::test]
    async fn test_invalid_settings_fail_construction() {
        let mut settings = CacheSettings::default();
        settings.channels.ttl_ms = 0;

        let err = CacheService::new(settings).unwrap_err();
        assert!(err.to_string().contains("channels.ttl_ms"));
    }

    #[tokio::test]
    async fn test_invalidate_by_channel_fans_out() {
        let service = CacheService::new(small_settings()).unwrap();
        populate_channel_scoped(&service).await;

        // Unrelated state survives the sweep.
        service
            .user_cache()
            .lock()
            .await
            .set("users:info:U1", json!({"id": "U1"}), None);
        service
            .thread_cache()
            .lock()
            .await
            .set("threads:replies:C2:1724680001.000200", json!(["r2"]), None);

        let removed = service.invalidate_by_channel("C1").await;
        assert_eq!(removed, 6);

        assert!(service.channel_cache().lock().await.get("C1").is_none());
        assert!(
            service
                .thread_cache()
                .lock()
                .await
                .get("threads:replies:C1:1724680000.000100")
                .is_none()
        );
        assert!(
            service
                .file_cache()
                .lock()
                .await
                .get("files:list:channel:C1")
                .is_none()
        );
        assert!(
            service
                .search_cache()
                .lock()
                .await
                .get_results("search:messages:channel:C1|query:deploy")
                .is_none()
        );

        assert!(service.user_cache().lock().await.get("users:info:U1").is_some());
        assert!(
            service
                .thread_cache()
                .lock()
                .await
                .get("threads:replies:C2:1724680001.000200")
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_invalidate_by_user_fans_out() {
        let service = CacheService::new(small_settings()).unwrap();

        service
            .user_cache()
            .lock()
            .await
            .set("U1", json!({"id": "U1"}), None);
        service
            .user_cache()
            .lock()
            .await
            .set("users:info:U1", json!({"id": "U1"}), None);
        service
            .file_cache()
            .lock()
            .await
            .set("files:list:user:U1", json!(["F1"]), None);
        service
            .search_cache()
            .lock()
            .await
            .set_results("search:messages:from:U1|query:standup", json!(["m1"]));

        let removed = service.invalidate_by_user("U1").await;
        assert_eq!(removed, 4);
    }

    #[tokio::test]
    async fn test_clear_all_empties_every_cache() {
        let service = CacheService::new(small_settings()).unwrap();
        populate_channel_scoped(&service).await;

        let removed = service.clear_all().await;
        assert_eq!(removed, 6);

        let metrics = service.get_metrics().await;
        assert_eq!(metrics.totals.memory_bytes, 0);
        assert_eq!(metrics.channels.entries, 0);
        assert_eq!(metrics.search.results.entries, 0);
    }

    #[tokio::test]
    async fn test_metrics_aggregation() {
        let service = CacheService::new(small_settings()).unwrap();

        service
            .channel_cache()
            .lock()
            .await
            .set("C1", json!({"id": "C1"}), None);
        service.channel_cache().lock().await.get("C1");
        service.channel_cache().lock().await.get("C2");
        service.user_cache().lock().await.get("U1");

        let metrics = service.get_metrics().await;
        assert_eq!(metrics.channels.hits, 1);
        assert_eq!(metrics.channels.misses, 1);
        assert_eq!(metrics.users.misses, 1);
        assert_eq!(metrics.totals.hits, 1);
        assert_eq!(metrics.totals.misses, 2);
        assert!(metrics.totals.memory_bytes > 0);
    }

    #[tokio::test]
    async fn test_cache_instances_enumeration() {
        let service = CacheService::new(small_settings()).unwrap();
        let instances = service.get_cache_instances().await;

        let names: Vec<&str> = instances.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "channels",
                "users",
                "files",
                "threads",
                "search:queries",
                "search:results"
            ]
        );
        assert!(instances[0].max_memory_bytes.is_some());
        assert!(instances[4].max_memory_bytes.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_purges_stale_entries() {
        let service = CacheService::new(small_settings()).unwrap();

        service.channel_cache().lock().await.set(
            "C1",
            json!({"id": "C1"}),
            Some(Duration::from_millis(100)),
        );
        advance(Duration::from_millis(200)).await;

        service.perform_maintenance().await;
        assert_eq!(service.get_metrics().await.channels.entries, 0);
    }

    #[tokio::test]
    async fn test_emergency_cleanup_sheds_down_to_fraction() {
        let mut settings = small_settings();
        settings.channels.max_entries = 4;
        // Four ~500-byte values blow through 95% of this budget.
        settings.global_memory_limit = Some(2000);
        let service = CacheService::new(settings).unwrap();

        for i in 0..4 {
            service.channel_cache().lock().await.set(
                &format!("C{}", i),
                json!("x".repeat(500)),
                None,
            );
        }
        assert!(service.get_metrics().await.totals.memory_bytes > 1900);

        service.perform_maintenance().await;

        // Shrunk to 75% of the configured 4-entry ceiling.
        assert_eq!(service.get_metrics().await.channels.entries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_runs_periodic_maintenance() {
        let mut settings = small_settings();
        settings.maintenance_interval_secs = 1;
        let service = Arc::new(CacheService::new(settings).unwrap());
        service.initialize().await;

        service.channel_cache().lock().await.set(
            "C1",
            json!({"id": "C1"}),
            Some(Duration::from_millis(100)),
        );

        // Let the spawned ticker register its timer before moving the clock.
        tokio::task::yield_now().await;
        advance(Duration::from_millis(1100)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(service.get_metrics().await.channels.entries, 0);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_clears_and_allows_reinit() {
        let service = Arc::new(CacheService::new(small_settings()).unwrap());
        service.initialize().await;
        populate_channel_scoped(&service).await;

        service.shutdown().await;
        assert_eq!(service.get_metrics().await.totals.memory_bytes, 0);

        // The ticker handle was released; a fresh initialize works.
        service.initialize().await;
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_requires_traffic_and_hit_rate() {
        let service = CacheService::new(small_settings()).unwrap();

        let health = service.get_health_status().await;
        assert!(!health.healthy);
        assert!(health.caches.iter().all(|c| !c.healthy));
        assert_eq!(health.caches[0].reason.as_deref(), Some("no traffic"));

        // Give every store a perfect hit rate.
        service
            .channel_cache()
            .lock()
            .await
            .set("C1", json!({}), None);
        service.channel_cache().lock().await.get("C1");
        service.user_cache().lock().await.set("U1", json!({}), None);
        service.user_cache().lock().await.get("U1");
        service.file_cache().lock().await.set("F1", json!({}), None);
        service.file_cache().lock().await.get("F1");
        service
            .thread_cache()
            .lock()
            .await
            .set("T1", json!({}), None);
        service.thread_cache().lock().await.get("T1");
        {
            let mut search = service.search_cache().lock().await;
            search.set_query("sig", json!({}));
            search.get_query("sig");
            search.set_results("sig", json!([]));
            search.get_results("sig");
        }

        let health = service.get_health_status().await;
        assert!(health.healthy);
    }

    #[tokio::test]
    async fn test_health_flags_low_hit_rate() {
        let service = CacheService::new(small_settings()).unwrap();

        // 1 hit, 3 misses: 25% is below the 50% threshold.
        service
            .channel_cache()
            .lock()
            .await
            .set("C1", json!({}), None);
        let mut channels = service.channel_cache().lock().await;
        channels.get("C1");
        channels.get("C2");
        channels.get("C3");
        channels.get("C4");
        drop(channels);

        let health = service.get_health_status().await;
        let channel_health = &health.caches[0];
        assert!(!channel_health.healthy);
        assert!(
            channel_health
                .reason
                .as_deref()
                .unwrap()
                .contains("hit rate")
        );
    }

    #[tokio::test]
    async fn test_health_flags_memory_high_water() {
        let mut settings = small_settings();
        settings.global_memory_limit = Some(1000);
        let service = CacheService::new(settings).unwrap();

        service
            .channel_cache()
            .lock()
            .await
            .set("C1", json!("x".repeat(950)), None);

        let health = service.get_health_status().await;
        assert!(!health.healthy);
        assert!(health.memory_bytes > 900);
        assert_eq!(health.memory_limit, Some(1000));
    }
}
