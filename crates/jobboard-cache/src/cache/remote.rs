//! Remote (L2) cache tier abstraction.
//!
//! `CacheManager` only talks to the shared tier through [`RemoteStore`], so the
//! same manager runs against Redis in production and against in-process fakes
//! in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// A value read from the remote tier together with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteValue {
    /// JSON text as stored
    pub payload: String,
    /// Remaining TTL; `None` when the key has no expiry
    pub ttl: Option<Duration>,
}

/// Trait for the shared key-value tier.
///
/// Keys passed in are always fully prefixed. Implementations return
/// [`CacheError::Unavailable`](crate::error::CacheError::Unavailable) while
/// disconnected instead of blocking.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether the tier currently believes it is connected.
    fn is_connected(&self) -> bool;

    /// Whether commands should be sent at all right now.
    ///
    /// Stores that queue commands while reconnecting return `true` even when
    /// disconnected and decide per command whether to wait or fail.
    fn accepts_commands(&self) -> bool {
        self.is_connected()
    }

    /// Read a key and its remaining TTL.
    async fn get(&self, key: &str) -> CacheResult<Option<RemoteValue>>;

    /// Write a key with an expiry in whole seconds.
    async fn set_ex(&self, key: &str, payload: &str, ttl_secs: u64) -> CacheResult<()>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> CacheResult<u64>;

    /// List keys matching a glob pattern.
    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Atomically increment a counter.
    ///
    /// A missing key is created as `initial + by` with `ttl_secs`; an existing
    /// key is incremented in place and keeps its expiry.
    async fn increment(&self, key: &str, by: i64, ttl_secs: u64, initial: i64) -> CacheResult<i64>;

    /// Number of keys held by the tier, if cheaply known.
    async fn key_count(&self) -> CacheResult<Option<u64>> {
        Ok(None)
    }

    /// Release connections. Must be idempotent.
    async fn close(&self);
}
