//! Tiered cache manager: memory (L1) in front of Redis (L2).
//!
//! ## Read Path
//!
//! ```text
//! get(key) → memory ──hit──▶ value
//!              │ miss
//!              ▼
//!            Redis (if connected) ──hit──▶ populate memory (min TTL) ──▶ value
//!              │ miss / down
//!              ▼
//!            fallback
//! ```
//!
//! ## Failure Semantics
//!
//! A Redis outage degrades to memory-only caching: reads miss, writes become
//! no-ops, and nothing is ever raised to the caller. The only error that
//! crosses this API is the one returned by a caller-supplied fetch function
//! in [`CacheManager::get_or_set`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::keys::{glob_to_regex, local_key, remote_key};
use super::memory::{MemoryStats, MemoryTier};
use super::redis_store::RedisStore;
use super::remote::RemoteStore;
use crate::config::CacheSettings;
use crate::error::CacheError;
use crate::metrics::{self, CacheOp, CacheTier};

/// Per-call options. Fields that don't apply to an operation are ignored.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Logical key group; `""` is the default namespace
    pub namespace: String,
    /// Lifetime for writes; defaults to `default_ttl_secs`
    pub ttl: Option<Duration>,
    /// Bypass the memory tier
    pub skip_memory: bool,
    /// Bypass the Redis tier
    pub skip_redis: bool,
    /// `get_or_set` only: call the fetch function without touching either tier
    pub skip_cache: bool,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_ttl_secs(self, secs: u64) -> Self {
        self.with_ttl(Duration::from_secs(secs))
    }

    pub fn skip_memory(mut self) -> Self {
        self.skip_memory = true;
        self
    }

    pub fn skip_redis(mut self) -> Self {
        self.skip_redis = true;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

/// Remote tier status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoteStats {
    /// A remote tier was configured and reached at startup
    pub enabled: bool,
    /// The remote tier is currently answering
    pub connected: bool,
    pub key_prefix: String,
    /// Keys in the Redis database, when connected
    pub keys: Option<u64>,
}

/// Combined statistics for both tiers.
#[derive(Debug, Clone, Serialize)]
pub struct CacheManagerStats {
    pub memory: MemoryStats,
    pub redis: RemoteStats,
}

/// Two-tier cache: process-local memory in front of a shared remote store.
///
/// Constructed once by the composition root and shared as
/// `Arc<CacheManager>`; call [`close`](Self::close) on shutdown.
pub struct CacheManager {
    settings: CacheSettings,
    memory: Arc<MemoryTier>,
    remote: Option<Arc<dyn RemoteStore>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl CacheManager {
    /// Create a manager, connecting to Redis when enabled.
    ///
    /// ## Graceful Degradation
    ///
    /// If Redis is disabled, the URL is unusable, or it cannot be reached
    /// within the retry limits, the manager runs memory-only. This never fails.
    pub async fn connect(settings: CacheSettings) -> Self {
        if !settings.redis.enabled {
            tracing::info!("Redis disabled, using memory cache only");
            return Self::memory_only(settings);
        }

        match RedisStore::connect(&settings.redis).await {
            Ok(store) => Self::with_remote(settings, Arc::new(store)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to connect to Redis. Falling back to memory cache."
                );
                Self::memory_only(settings)
            }
        }
    }

    /// Create a memory-only manager.
    pub fn memory_only(settings: CacheSettings) -> Self {
        Self::build(settings, None)
    }

    /// Create a manager over an already connected remote store.
    pub fn with_remote(settings: CacheSettings, remote: Arc<dyn RemoteStore>) -> Self {
        Self::build(settings, Some(remote))
    }

    fn build(settings: CacheSettings, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let memory = Arc::new(MemoryTier::from_settings(&settings.memory));
        let shutdown = CancellationToken::new();

        if let Some(period) = settings.memory.check_period()
            && memory.spawn_sweeper(period, shutdown.child_token()).is_none()
        {
            tracing::debug!("no Tokio runtime, memory cache sweeper not started");
        }

        metrics::set_redis_connected(remote.as_ref().is_some_and(|r| r.is_connected()));

        Self {
            settings,
            memory,
            remote,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Whether the remote tier is configured and currently connected.
    pub fn is_remote_connected(&self) -> bool {
        self.remote.as_ref().is_some_and(|r| r.is_connected())
    }

    /// Remote tier to use for this call, if any.
    fn remote_for(&self, opts: &CacheOptions) -> Option<&Arc<dyn RemoteStore>> {
        if opts.skip_redis {
            return None;
        }
        self.remote.as_ref().filter(|r| r.accepts_commands())
    }

    fn remote_key(&self, namespace: &str, key: &str) -> String {
        remote_key(&self.settings.redis.key_prefix, namespace, key)
    }

    fn write_ttl(&self, opts: &CacheOptions) -> Duration {
        opts.ttl.unwrap_or_else(|| self.settings.default_ttl())
    }

    /// Read a raw JSON value.
    ///
    /// Misses, malformed payloads and tier failures all return `None`.
    pub async fn get_value(&self, key: &str, opts: &CacheOptions) -> Option<Value> {
        self.lookup(key, opts).await.map(|v| (*v).clone())
    }

    /// Read and deserialize a value.
    ///
    /// A cached value that doesn't fit `T` is treated as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, opts: &CacheOptions) -> Option<T> {
        let value = self.lookup(key, opts).await?;
        match T::deserialize(&*value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cached value has unexpected shape");
                metrics::record_cache_error(CacheTier::Memory, CacheOp::Deserialize);
                None
            }
        }
    }

    /// Read a value, returning `fallback` on a miss.
    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, opts: &CacheOptions, fallback: T) -> T {
        self.get(key, opts).await.unwrap_or(fallback)
    }

    async fn lookup(&self, key: &str, opts: &CacheOptions) -> Option<Arc<Value>> {
        let local = local_key(&opts.namespace, key);

        // 1. Memory tier (hot path, never touches Redis)
        if !opts.skip_memory {
            if let Some(value) = self.memory.get(&local) {
                tracing::debug!(key = %local, "cache hit (memory)");
                metrics::record_cache_hit(CacheTier::Memory);
                return Some(value);
            }
        }

        // 2. Redis tier
        if let Some(remote) = self.remote_for(opts) {
            let full_key = self.remote_key(&opts.namespace, key);
            match remote.get(&full_key).await {
                Ok(Some(found)) => match serde_json::from_str::<Value>(&found.payload) {
                    Ok(value) => {
                        tracing::debug!(key = %full_key, "cache hit (redis)");
                        metrics::record_cache_hit(CacheTier::Redis);

                        // Promote to memory without outliving the remote entry
                        let value = Arc::new(value);
                        if !opts.skip_memory {
                            let mut ttl = self.write_ttl(opts).min(self.memory.default_ttl());
                            if let Some(remaining) = found.ttl {
                                ttl = ttl.min(remaining);
                            }
                            self.memory.set(&local, (*value).clone(), Some(ttl));
                        }
                        return Some(value);
                    }
                    Err(e) => {
                        tracing::warn!(key = %full_key, error = %e, "Malformed JSON in Redis, treating as miss");
                        metrics::record_cache_error(CacheTier::Redis, CacheOp::Deserialize);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    if !e.is_unavailable() {
                        tracing::warn!(key = %full_key, error = %e, "Redis GET error");
                        metrics::record_cache_error(CacheTier::Redis, CacheOp::Get);
                    }
                }
            }
        }

        tracing::debug!(key = %local, "cache miss");
        metrics::record_cache_miss();
        None
    }

    /// Write a value through both tiers.
    ///
    /// ## Write Strategy
    ///
    /// 1. Redis first (`SET .. EX ttl`), if connected and not skipped
    /// 2. Memory with `min(ttl, memory ttl)`, even if the Redis write failed
    ///
    /// Returns `false` when serialization failed or an attempted tier reported
    /// a failure. A disconnected Redis is a no-op, not a failure. Partial
    /// success (Redis failed, memory written) is acceptable for a cache and
    /// reported as `false`.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: &CacheOptions) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize value for cache");
                metrics::record_cache_error(CacheTier::Memory, CacheOp::Serialize);
                return false;
            }
        };
        self.set_value(key, value, opts).await
    }

    async fn set_value(&self, key: &str, value: Value, opts: &CacheOptions) -> bool {
        let ttl = self.write_ttl(opts);
        let mut ok = true;

        if let Some(remote) = self.remote_for(opts) {
            let full_key = self.remote_key(&opts.namespace, key);
            match serde_json::to_string(&value) {
                Ok(payload) => {
                    if let Err(e) = remote.set_ex(&full_key, &payload, ttl.as_secs().max(1)).await {
                        if !e.is_unavailable() {
                            tracing::warn!(key = %full_key, error = %e, "Redis SET error");
                            metrics::record_cache_error(CacheTier::Redis, CacheOp::Set);
                            ok = false;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %full_key, error = %e, "Failed to encode value for Redis");
                    metrics::record_cache_error(CacheTier::Redis, CacheOp::Serialize);
                    ok = false;
                }
            }
        }

        if !opts.skip_memory {
            let local = local_key(&opts.namespace, key);
            if !self.memory.set(&local, value, Some(ttl)) {
                tracing::debug!(key = %local, "memory tier rejected write");
                ok = false;
            }
        }

        tracing::debug!(key = %key, namespace = %opts.namespace, ttl_secs = ttl.as_secs(), ok, "cache set");
        ok
    }

    /// Remove a key from both tiers. Absence is not an error.
    pub async fn del(&self, key: &str, opts: &CacheOptions) -> bool {
        let mut ok = true;

        if let Some(remote) = self.remote_for(opts) {
            let full_key = self.remote_key(&opts.namespace, key);
            if let Err(e) = remote.del(std::slice::from_ref(&full_key)).await {
                if !e.is_unavailable() {
                    tracing::warn!(key = %full_key, error = %e, "Redis DEL error");
                    metrics::record_cache_error(CacheTier::Redis, CacheOp::Del);
                    ok = false;
                }
            }
        }

        if !opts.skip_memory {
            self.memory.remove(&local_key(&opts.namespace, key));
        }

        tracing::debug!(key = %key, namespace = %opts.namespace, "cache invalidated");
        ok
    }

    /// Remove every key in `opts.namespace` matching a Redis glob.
    ///
    /// Both tiers use the same glob semantics: Redis via `SCAN MATCH`, memory
    /// by matching the compiled pattern against every local key.
    pub async fn clear_pattern(&self, pattern: &str, opts: &CacheOptions) -> bool {
        let mut ok = true;

        if let Some(remote) = self.remote_for(opts) {
            let full_pattern = self.remote_key(&opts.namespace, pattern);
            let result = match remote.scan(&full_pattern).await {
                Ok(keys) => remote.del(&keys).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(removed) => {
                    tracing::debug!(pattern = %full_pattern, removed, "cleared Redis keys");
                }
                Err(e) if e.is_unavailable() => {}
                Err(e) => {
                    tracing::warn!(pattern = %full_pattern, error = %e, "Redis pattern clear error");
                    metrics::record_cache_error(CacheTier::Redis, CacheOp::ClearPattern);
                    ok = false;
                }
            }
        }

        if !opts.skip_memory {
            match glob_to_regex(&local_key(&opts.namespace, pattern)) {
                Ok(re) => {
                    let removed = self.memory.remove_matching(&re);
                    tracing::debug!(pattern = %pattern, namespace = %opts.namespace, removed, "cleared memory keys");
                }
                Err(e) => {
                    let err = CacheError::from(e);
                    tracing::warn!(pattern = %pattern, error = %err, "Cannot match pattern against memory keys");
                    metrics::record_cache_error(CacheTier::Memory, CacheOp::ClearPattern);
                    ok = false;
                }
            }
        }

        ok
    }

    /// Cache-aside read.
    ///
    /// Returns the cached value on a hit without calling `fetch`. On a miss,
    /// `fetch` runs exactly once; its error is returned unchanged and nothing
    /// is cached. A value that serializes to JSON `null` is returned but not
    /// cached. With `skip_cache`, `fetch` is called directly.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, opts: &CacheOptions, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if opts.skip_cache {
            return fetch().await;
        }

        if let Some(cached) = self.get::<T>(key, opts).await {
            return Ok(cached);
        }

        let fresh = fetch().await?;

        match serde_json::to_value(&fresh) {
            Ok(Value::Null) => {
                tracing::debug!(key = %key, "fetched value is null, not caching");
            }
            Ok(value) => {
                self.set_value(key, value, opts).await;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize fetched value for cache");
                metrics::record_cache_error(CacheTier::Memory, CacheOp::Serialize);
            }
        }

        Ok(fresh)
    }

    /// Increment a counter and return its new value.
    ///
    /// Uses Redis' atomic increment when connected; a missing key starts at
    /// `initial + by` and expires after `opts.ttl` (first write sets the
    /// window). Without Redis the counter lives in process memory only, for
    /// the full `opts.ttl` and not shared across instances.
    pub async fn increment(&self, key: &str, opts: &CacheOptions, by: i64, initial: i64) -> i64 {
        let ttl = self.write_ttl(opts);
        let local = local_key(&opts.namespace, key);

        if let Some(remote) = self.remote_for(opts) {
            let full_key = self.remote_key(&opts.namespace, key);
            match remote.increment(&full_key, by, ttl.as_secs().max(1), initial).await {
                Ok(value) => {
                    // Drop any stale shadow copy; the next read repopulates it
                    self.memory.remove(&local);
                    return value;
                }
                Err(e) if e.is_unavailable() => {}
                Err(e) => {
                    tracing::warn!(key = %full_key, error = %e, "Redis INCRBY error, using memory counter");
                    metrics::record_cache_error(CacheTier::Redis, CacheOp::Increment);
                }
            }
        }

        tracing::debug!(key = %local, "incrementing process-local counter");
        self.memory.increment(&local, by, Some(ttl), initial)
    }

    /// Statistics for both tiers.
    pub async fn stats(&self) -> CacheManagerStats {
        let memory = self.memory.stats();
        metrics::set_cache_entries(CacheTier::Memory, memory.keys as u64);

        let redis = match &self.remote {
            Some(remote) => {
                let connected = remote.is_connected();
                let keys = if connected {
                    remote.key_count().await.ok().flatten()
                } else {
                    None
                };
                if let Some(count) = keys {
                    metrics::set_cache_entries(CacheTier::Redis, count);
                }
                RemoteStats {
                    enabled: true,
                    connected,
                    key_prefix: self.settings.redis.key_prefix.clone(),
                    keys,
                }
            }
            None => RemoteStats {
                enabled: false,
                connected: false,
                key_prefix: self.settings.redis.key_prefix.clone(),
                keys: None,
            },
        };
        metrics::set_redis_connected(redis.connected);

        CacheManagerStats { memory, redis }
    }

    /// Release both tiers.
    ///
    /// Idempotent, and safe when Redis was never reached.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.cancel();
        if let Some(remote) = &self.remote {
            remote.close().await;
        }
        self.memory.clear();
        tracing::info!("Cache manager closed");
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
