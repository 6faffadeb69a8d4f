pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod server;

pub use cache::{
    CacheManager, CacheManagerStats, CacheOptions, CdnProfile, RemoteStore, RemoteValue,
    cdn_headers,
};
pub use config::{AppConfig, CacheSettings, CdnSettings, MemorySettings, RedisSettings};
pub use error::{CacheError, CacheResult};
pub use middleware::{ResponseCacheOptions, ResponseCacheState, cdn_profile, response_cache};
pub use observability::init_tracing;
pub use server::{AppState, build_router};
