//! Two-tier caching system.
//!
//! ## Architecture
//!
//! - **Memory tier (DashMap)**: In-process, microsecond latency, bounded, per-instance
//! - **Redis tier**: Network, millisecond latency, shared across instances
//! - **CDN profiles**: Cache-control header sets for the edge tier in front of us
//!
//! ## Cache Hierarchy
//!
//! ```text
//! GET request → memory (DashMap) → Redis → Source (DB/API)
//!                    ↓                ↓           ↓
//!                <1µs latency    ~1ms latency  ~50ms latency
//! ```
//!
//! ## Graceful Degradation
//!
//! If Redis is unavailable or disabled, the manager automatically falls back
//! to memory-only mode and reconnects in the background.

pub mod cdn;
pub mod keys;
pub mod manager;
pub mod memory;
pub mod redis_store;
pub mod remote;

pub use cdn::{CdnProfile, UnknownCdnProfile, cdn_headers, cdn_headers_by_name};
pub use keys::{glob_to_regex, local_key, remote_key};
pub use manager::{CacheManager, CacheManagerStats, CacheOptions, RemoteStats};
pub use memory::{MemoryStats, MemoryTier};
pub use redis_store::RedisStore;
pub use remote::{RemoteStore, RemoteValue};
