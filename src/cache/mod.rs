mod bounded;
mod integration;
mod metrics;
mod search;
mod service;

pub use bounded::{BoundedCache, BoundedCacheConfig, DisposalHook, RemovalReason, SizeEstimator};
pub use integration::{CacheIntegration, CacheProvider, FetchOptions, InvalidateRequest};
pub use metrics::{CacheInstanceInfo, CacheMetrics, CacheServiceMetrics, CacheTotals};
pub use search::SearchCache;
pub use service::{CacheHealth, CacheService, ServiceHealth};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The five caches owned by the service. Adding a domain is a
/// compile-time-checked change: every dispatch site matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheDomain {
    Channels,
    Users,
    Search,
    Files,
    Threads,
}

impl CacheDomain {
    pub const ALL: [CacheDomain; 5] = [
        CacheDomain::Channels,
        CacheDomain::Users,
        CacheDomain::Search,
        CacheDomain::Files,
        CacheDomain::Threads,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheDomain::Channels => "channels",
            CacheDomain::Users => "users",
            CacheDomain::Search => "search",
            CacheDomain::Files => "files",
            CacheDomain::Threads => "threads",
        }
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheDomain {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channels" => Ok(CacheDomain::Channels),
            "users" => Ok(CacheDomain::Users),
            "search" => Ok(CacheDomain::Search),
            "files" => Ok(CacheDomain::Files),
            "threads" => Ok(CacheDomain::Threads),
            other => Err(CacheError::UnknownDomain(other.to_string())),
        }
    }
}
