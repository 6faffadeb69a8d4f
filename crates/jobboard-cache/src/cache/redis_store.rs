//! Redis implementation of the remote tier.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! connect() ──PING ok──▶ connected ──I/O error / timeout──▶ disconnected
//!    │                       ▲                                  │
//!    │ retries exhausted     └────────── PING ok ◀── reconnect loop (capped backoff)
//!    ▼
//!  Err (manager runs memory-only)
//! ```
//!
//! While disconnected, commands fail fast with `CacheError::Unavailable`
//! unless the offline queue is enabled, in which case they wait up to the
//! command timeout for the reconnect.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime, Timeouts};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::remote::{RemoteStore, RemoteValue};
use crate::config::RedisSettings;
use crate::error::{CacheError, CacheResult};
use crate::metrics;

/// Keys requested per SCAN round trip.
const SCAN_COUNT: usize = 500;

/// Keys deleted per DEL command.
const DEL_CHUNK: usize = 500;

struct Inner {
    pool: Pool,
    /// Connection state; `true` while Redis answers.
    state: watch::Sender<bool>,
    reconnecting: AtomicBool,
    shutdown: CancellationToken,
    offline_queue: bool,
    command_timeout: Duration,
    connect_timeout: Duration,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

impl Inner {
    fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    async fn ping(&self) -> CacheResult<()> {
        let attempt = async {
            let mut conn = self.pool.get().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<(), CacheError>(())
        };
        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.connect_timeout)),
        }
    }

    /// Log a failed command and start reconnecting if the connection is broken.
    fn handle_error(this: &Arc<Self>, op: &'static str, err: &CacheError) {
        if err.is_connection_error() {
            Self::mark_disconnected(this, err);
        } else {
            tracing::warn!(op, error = %err, "Redis command failed");
        }
    }

    fn mark_disconnected(this: &Arc<Self>, reason: &CacheError) {
        if this.shutdown.is_cancelled() {
            return;
        }

        if this.state.send_replace(false) {
            tracing::warn!(error = %reason, "Lost connection to Redis, serving from memory tier");
            metrics::set_redis_connected(false);
        }

        // Only one reconnect loop at a time
        if this.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            this.reconnecting.store(false, Ordering::Release);
            return;
        };

        let inner = Arc::clone(this);
        runtime.spawn(async move {
            inner.reconnect_loop().await;
        });
    }

    async fn reconnect_loop(&self) {
        let mut backoff = self.retry_delay;
        let mut attempt: u32 = 0;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Redis reconnect loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }

            attempt = attempt.saturating_add(1);
            match self.ping().await {
                Ok(()) => {
                    // Clear the flag before flipping the state so a failure right
                    // after reconnecting can start a fresh loop.
                    self.reconnecting.store(false, Ordering::Release);
                    self.state.send_replace(true);
                    metrics::set_redis_connected(true);
                    tracing::info!(attempt, "Reconnected to Redis");
                    return;
                }
                Err(e) => {
                    tracing::debug!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Redis reconnect attempt failed"
                    );
                    // Exponential backoff with max limit
                    backoff = (backoff * 2).min(self.max_retry_delay);
                }
            }
        }
    }
}

/// Redis-backed remote tier using a deadpool connection pool.
#[derive(Clone)]
pub struct RedisStore {
    inner: Arc<Inner>,
}

impl RedisStore {
    /// Build the pool and wait for Redis to answer.
    ///
    /// Makes `1 + max_retries` attempts with exponential backoff starting at
    /// `retry_delay_on_failover_ms` and capped at `max_retry_delay_ms`.
    pub async fn connect(settings: &RedisSettings) -> CacheResult<Self> {
        let inner = Self::build(settings)?.inner;

        let url = redact_url(&settings.url);
        let attempts = settings.max_retries.saturating_add(1);
        let mut backoff = inner.retry_delay;
        let mut last_error = CacheError::Unavailable;

        for attempt in 1..=attempts {
            match inner.ping().await {
                Ok(()) => {
                    inner.state.send_replace(true);
                    metrics::set_redis_connected(true);
                    tracing::info!(url = %url, attempt, "Connected to Redis");
                    return Ok(Self { inner });
                }
                Err(e) => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Redis connection attempt failed"
                    );
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(inner.max_retry_delay);
                    }
                }
            }
        }

        inner.shutdown.cancel();
        inner.pool.close();
        metrics::set_redis_connected(false);
        Err(last_error)
    }

    /// Build the pool without contacting Redis. The store starts disconnected.
    fn build(settings: &RedisSettings) -> CacheResult<Self> {
        let connect_timeout = settings.connect_timeout();

        let mut config = deadpool_redis::Config::from_url(settings.url.clone());
        let mut pool_config = PoolConfig::new(settings.pool_size);
        pool_config.timeouts = Timeouts {
            wait: Some(connect_timeout),
            create: Some(connect_timeout),
            recycle: Some(connect_timeout),
        };
        config.pool = Some(pool_config);

        let pool = config.create_pool(Some(Runtime::Tokio1))?;

        let (state, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            pool,
            state,
            reconnecting: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            offline_queue: settings.enable_offline_queue,
            command_timeout: settings.command_timeout(),
            connect_timeout,
            retry_delay: settings.retry_delay(),
            max_retry_delay: settings.max_retry_delay(),
        });
        Ok(Self { inner })
    }

    /// Check a connection out of the pool, honouring the offline-queue setting.
    async fn connection(&self) -> CacheResult<Connection> {
        if !self.inner.is_connected() {
            if !self.inner.offline_queue || self.inner.shutdown.is_cancelled() {
                return Err(CacheError::Unavailable);
            }
            let mut state = self.inner.state.subscribe();
            match tokio::time::timeout(self.inner.command_timeout, state.wait_for(|up| *up)).await
            {
                Ok(Ok(_)) => {}
                _ => return Err(CacheError::Unavailable),
            }
        }

        match self.inner.pool.get().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                let err = CacheError::from(e);
                Inner::handle_error(&self.inner, "CONNECT", &err);
                Err(err)
            }
        }
    }

    /// Run one Redis command under the command timeout.
    async fn bounded<T, F>(&self, op: &'static str, command: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let result = match tokio::time::timeout(self.inner.command_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Redis(e)),
            Err(_) => Err(CacheError::Timeout(self.inner.command_timeout)),
        };
        if let Err(ref err) = result {
            Inner::handle_error(&self.inner, op, err);
        }
        result
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn accepts_commands(&self) -> bool {
        self.inner.is_connected() || (self.inner.offline_queue && !self.inner.shutdown.is_cancelled())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<RemoteValue>> {
        let mut conn = self.connection().await?;
        let (payload, ttl): (Option<String>, i64) = self
            .bounded(
                "GET",
                redis::pipe()
                    .cmd("GET")
                    .arg(key)
                    .cmd("TTL")
                    .arg(key)
                    .query_async(&mut conn),
            )
            .await?;

        Ok(payload.map(|payload| RemoteValue {
            payload,
            ttl: match ttl {
                -1 => None,
                secs if secs >= 0 => Some(Duration::from_secs(secs as u64)),
                // Expired between GET and TTL
                _ => Some(Duration::ZERO),
            },
        }))
    }

    async fn set_ex(&self, key: &str, payload: &str, ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: () = self
            .bounded(
                "SET",
                redis::cmd("SET")
                    .arg(key)
                    .arg(payload)
                    .arg("EX")
                    .arg(ttl_secs.max(1))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let mut removed = 0;
        for chunk in keys.chunks(DEL_CHUNK) {
            let n: u64 = self
                .bounded("DEL", redis::cmd("DEL").arg(chunk).query_async(&mut conn))
                .await?;
            removed += n;
        }
        Ok(removed)
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn increment(&self, key: &str, by: i64, ttl_secs: u64, initial: i64) -> CacheResult<i64> {
        let mut conn = self.connection().await?;
        // MULTI: the first writer creates the key with its expiry window,
        // every writer (including the first) then increments atomically.
        let (value,): (i64,) = self
            .bounded(
                "INCRBY",
                redis::pipe()
                    .atomic()
                    .cmd("SET")
                    .arg(key)
                    .arg(initial)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs.max(1))
                    .ignore()
                    .cmd("INCRBY")
                    .arg(key)
                    .arg(by)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(value)
    }

    async fn key_count(&self) -> CacheResult<Option<u64>> {
        let mut conn = self.connection().await?;
        let count: u64 = self
            .bounded("DBSIZE", redis::cmd("DBSIZE").query_async(&mut conn))
            .await?;
        Ok(Some(count))
    }

    async fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.state.send_replace(false);
        self.inner.pool.close();
        metrics::set_redis_connected(false);
        tracing::info!("Redis connection pool closed");
    }
}

/// Strip credentials from a connection URL for logging.
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
