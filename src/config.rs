use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

// Default configuration constants
const DEFAULT_CHANNELS_MAX_ENTRIES: u64 = 1000;
const DEFAULT_CHANNELS_TTL_MS: u64 = 600_000;
const DEFAULT_CHANNELS_MAX_MEMORY_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_USERS_MAX_ENTRIES: u64 = 5000;
const DEFAULT_USERS_TTL_MS: u64 = 1_800_000;
const DEFAULT_USERS_MAX_MEMORY_BYTES: u64 = 20 * 1024 * 1024;
const DEFAULT_FILES_MAX_ENTRIES: u64 = 500;
const DEFAULT_FILES_TTL_MS: u64 = 600_000;
const DEFAULT_FILES_MAX_MEMORY_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_THREADS_MAX_ENTRIES: u64 = 1000;
const DEFAULT_THREADS_TTL_MS: u64 = 180_000;
const DEFAULT_THREADS_MAX_MEMORY_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_QUERIES: u64 = 200;
const DEFAULT_MAX_RESULTS: u64 = 500;
const DEFAULT_QUERY_TTL_MS: u64 = 600_000;
const DEFAULT_RESULT_TTL_MS: u64 = 120_000;
const DEFAULT_MIN_RESULT_TTL_MS: u64 = 30_000;
const DEFAULT_MAX_RESULT_TTL_MS: u64 = 600_000;
const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    pub channels: DomainCacheConfig,
    pub users: DomainCacheConfig,
    pub files: DomainCacheConfig,
    pub threads: DomainCacheConfig,
    pub search: SearchCacheConfig,
    /// Optional ceiling on the combined memory footprint of all caches.
    #[serde(default)]
    pub global_memory_limit: Option<u64>,
    pub maintenance_interval_secs: u64,
}

/// Configuration for one LRU domain cache (channels, users, files, threads).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomainCacheConfig {
    pub max_entries: usize,
    pub ttl_ms: u64,
    /// Reset an entry's TTL clock whenever it is read.
    pub update_age_on_get: bool,
    pub max_memory_bytes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchCacheConfig {
    pub max_queries: usize,
    pub max_results: usize,
    pub query_ttl_ms: u64,
    pub result_ttl_ms: u64,
    /// Clamp band for the adaptive result TTL.
    pub min_result_ttl_ms: u64,
    pub max_result_ttl_ms: u64,
    pub adaptive_ttl: bool,
    pub enable_pattern_invalidation: bool,
}

impl DomainCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl SearchCacheConfig {
    pub fn query_ttl(&self) -> Duration {
        Duration::from_millis(self.query_ttl_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_millis(self.result_ttl_ms)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            channels: DomainCacheConfig {
                max_entries: DEFAULT_CHANNELS_MAX_ENTRIES as usize,
                ttl_ms: DEFAULT_CHANNELS_TTL_MS,
                update_age_on_get: true,
                max_memory_bytes: DEFAULT_CHANNELS_MAX_MEMORY_BYTES,
            },
            users: DomainCacheConfig {
                max_entries: DEFAULT_USERS_MAX_ENTRIES as usize,
                ttl_ms: DEFAULT_USERS_TTL_MS,
                update_age_on_get: true,
                max_memory_bytes: DEFAULT_USERS_MAX_MEMORY_BYTES,
            },
            files: DomainCacheConfig {
                max_entries: DEFAULT_FILES_MAX_ENTRIES as usize,
                ttl_ms: DEFAULT_FILES_TTL_MS,
                update_age_on_get: false,
                max_memory_bytes: DEFAULT_FILES_MAX_MEMORY_BYTES,
            },
            threads: DomainCacheConfig {
                max_entries: DEFAULT_THREADS_MAX_ENTRIES as usize,
                ttl_ms: DEFAULT_THREADS_TTL_MS,
                update_age_on_get: false,
                max_memory_bytes: DEFAULT_THREADS_MAX_MEMORY_BYTES,
            },
            search: SearchCacheConfig {
                max_queries: DEFAULT_MAX_QUERIES as usize,
                max_results: DEFAULT_MAX_RESULTS as usize,
                query_ttl_ms: DEFAULT_QUERY_TTL_MS,
                result_ttl_ms: DEFAULT_RESULT_TTL_MS,
                min_result_ttl_ms: DEFAULT_MIN_RESULT_TTL_MS,
                max_result_ttl_ms: DEFAULT_MAX_RESULT_TTL_MS,
                adaptive_ttl: true,
                enable_pattern_invalidation: true,
            },
            global_memory_limit: None,
            maintenance_interval_secs: DEFAULT_MAINTENANCE_INTERVAL_SECS,
        }
    }
}

impl CacheSettings {
    pub fn load(config_path: Option<&str>) -> CacheResult<Self> {
        let mut settings = config::Config::builder();

        // Default values
        settings = settings
            .set_default("channels.max_entries", DEFAULT_CHANNELS_MAX_ENTRIES)?
            .set_default("channels.ttl_ms", DEFAULT_CHANNELS_TTL_MS)?
            .set_default("channels.update_age_on_get", true)?
            .set_default("channels.max_memory_bytes", DEFAULT_CHANNELS_MAX_MEMORY_BYTES)?
            .set_default("users.max_entries", DEFAULT_USERS_MAX_ENTRIES)?
            .set_default("users.ttl_ms", DEFAULT_USERS_TTL_MS)?
            .set_default("users.update_age_on_get", true)?
            .set_default("users.max_memory_bytes", DEFAULT_USERS_MAX_MEMORY_BYTES)?
            .set_default("files.max_entries", DEFAULT_FILES_MAX_ENTRIES)?
            .set_default("files.ttl_ms", DEFAULT_FILES_TTL_MS)?
            .set_default("files.update_age_on_get", false)?
            .set_default("files.max_memory_bytes", DEFAULT_FILES_MAX_MEMORY_BYTES)?
            .set_default("threads.max_entries", DEFAULT_THREADS_MAX_ENTRIES)?
            .set_default("threads.ttl_ms", DEFAULT_THREADS_TTL_MS)?
            .set_default("threads.update_age_on_get", false)?
            .set_default("threads.max_memory_bytes", DEFAULT_THREADS_MAX_MEMORY_BYTES)?
            .set_default("search.max_queries", DEFAULT_MAX_QUERIES)?
            .set_default("search.max_results", DEFAULT_MAX_RESULTS)?
            .set_default("search.query_ttl_ms", DEFAULT_QUERY_TTL_MS)?
            .set_default("search.result_ttl_ms", DEFAULT_RESULT_TTL_MS)?
            .set_default("search.min_result_ttl_ms", DEFAULT_MIN_RESULT_TTL_MS)?
            .set_default("search.max_result_ttl_ms", DEFAULT_MAX_RESULT_TTL_MS)?
            .set_default("search.adaptive_ttl", true)?
            .set_default("search.enable_pattern_invalidation", true)?
            .set_default(
                "maintenance_interval_secs",
                DEFAULT_MAINTENANCE_INTERVAL_SECS,
            )?;

        // Load from config file if provided
        if let Some(path) = config_path
            && Path::new(path).exists()
        {
            settings = settings.add_source(config::File::with_name(path));
        }

        // Override with environment variables
        settings = settings.add_source(
            config::Environment::with_prefix("SLACK_CACHE")
                .prefix_separator("_")
                .separator("__"),
        );

        let loaded: CacheSettings = settings.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject unusable values before any cache is built. A service is never
    /// constructed from settings that fail here.
    pub fn validate(&self) -> CacheResult<()> {
        for (name, domain) in [
            ("channels", &self.channels),
            ("users", &self.users),
            ("files", &self.files),
            ("threads", &self.threads),
        ] {
            if domain.max_entries == 0 {
                return Err(CacheError::InvalidConfig(format!(
                    "{}.max_entries must be positive",
                    name
                )));
            }
            if domain.ttl_ms == 0 {
                return Err(CacheError::InvalidConfig(format!(
                    "{}.ttl_ms must be positive",
                    name
                )));
            }
            if domain.max_memory_bytes == 0 {
                return Err(CacheError::InvalidConfig(format!(
                    "{}.max_memory_bytes must be positive",
                    name
                )));
            }
        }

        if self.search.max_queries == 0 || self.search.max_results == 0 {
            return Err(CacheError::InvalidConfig(
                "search store capacities must be positive".to_string(),
            ));
        }
        if self.search.query_ttl_ms == 0 || self.search.result_ttl_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "search TTLs must be positive".to_string(),
            ));
        }
        if self.search.min_result_ttl_ms == 0
            || self.search.min_result_ttl_ms > self.search.max_result_ttl_ms
        {
            return Err(CacheError::InvalidConfig(format!(
                "search result TTL clamp band is invalid: min={} max={}",
                self.search.min_result_ttl_ms, self.search.max_result_ttl_ms
            )));
        }

        if let Some(limit) = self.global_memory_limit
            && limit == 0
        {
            return Err(CacheError::InvalidConfig(
                "global_memory_limit must be positive when set".to_string(),
            ));
        }

        if self.maintenance_interval_secs == 0 {
            return Err(CacheError::InvalidConfig(
                "maintenance_interval_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
