pub mod cache;
pub mod config;
pub mod error;
pub mod monitor;
pub mod utils;

pub use cache::{
    BoundedCache, CacheDomain, CacheIntegration, CacheProvider, CacheService, FetchOptions,
    InvalidateRequest, SearchCache,
};
pub use config::CacheSettings;
pub use error::{CacheError, CacheResult};
pub use monitor::PerformanceMonitor;
