//! Error types for cache tiers.

use std::time::Duration;

use deadpool_redis::{PoolError, TimeoutType};
use thiserror::Error;

/// Result type for cache tier operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while talking to a cache tier.
///
/// These never leave `CacheManager`'s public operations: a tier that is down
/// turns into a miss (reads) or a no-op (writes), and everything else is
/// logged and reported as `false`.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Remote tier is disconnected or was never reachable
    #[error("remote cache tier unavailable")]
    Unavailable,

    /// Remote command exceeded the configured command timeout
    #[error("remote cache command timed out after {0:?}")]
    Timeout(Duration),

    /// Redis command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to check a connection out of the pool
    #[error("Redis pool error: {0}")]
    Pool(#[from] PoolError),

    /// Failed to build the connection pool (usually an unusable URL)
    #[error("failed to create Redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    /// Value could not be serialized to / parsed from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key pattern could not be compiled
    #[error("invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl CacheError {
    /// True when the error means "tier down", which callers treat as a miss
    /// or no-op rather than as a failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable)
    }

    /// True when the error indicates the connection itself is broken and the
    /// remote tier should start reconnecting.
    pub fn is_connection_error(&self) -> bool {
        match self {
            CacheError::Timeout(_) => true,
            // Pool exhausted: every connection is checked out
            CacheError::Pool(PoolError::Timeout(TimeoutType::Wait)) => false,
            CacheError::Pool(_) => true,
            CacheError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
            }
            _ => false,
        }
    }
}
