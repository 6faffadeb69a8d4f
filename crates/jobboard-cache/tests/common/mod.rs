//! In-process stand-in for the Redis tier.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobboard_cache::cache::glob_to_regex;
use jobboard_cache::config::CacheSettings;
use jobboard_cache::{CacheError, CacheResult, RemoteStore, RemoteValue};

/// How long a queued command waits for the connection to come back.
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

struct Stored {
    payload: String,
    expires_at: Instant,
}

/// Remote tier backed by a `HashMap`, with a switch to simulate outages.
pub struct FakeRemote {
    entries: Mutex<HashMap<String, Stored>>,
    connected: AtomicBool,
    offline_queue: AtomicBool,
    timing_out: AtomicBool,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            offline_queue: AtomicBool::new(false),
            timing_out: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queue commands while disconnected instead of failing fast.
    pub fn with_offline_queue(self) -> Self {
        self.offline_queue.store(true, Ordering::SeqCst);
        self
    }

    /// Make every command fail as if it exceeded the command timeout.
    pub fn set_timing_out(&self, timing_out: bool) {
        self.timing_out.store(timing_out, Ordering::SeqCst);
    }

    /// Raw payload for a fully prefixed key.
    pub fn raw(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|s| s.expires_at > Instant::now())
            .map(|s| s.payload.clone())
    }

    /// Remaining lifetime for a fully prefixed key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .map(|s| s.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Write a payload directly, as another instance would.
    pub fn put(&self, key: &str, payload: &str, ttl: Duration) {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Stored {
                payload: payload.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn check(&self) -> CacheResult<()> {
        if self.timing_out.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout(COMMAND_TIMEOUT));
        }
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.offline_queue.load(Ordering::SeqCst) {
            let deadline = Instant::now() + COMMAND_TIMEOUT;
            while Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if self.connected.load(Ordering::SeqCst) {
                    return Ok(());
                }
            }
        }
        Err(CacheError::Unavailable)
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn accepts_commands(&self) -> bool {
        self.is_connected() || self.offline_queue.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<RemoteValue>> {
        self.check().await?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(key)
            .filter(|s| s.expires_at > now)
            .map(|s| RemoteValue {
                payload: s.payload.clone(),
                ttl: Some(s.expires_at - now),
            }))
    }

    async fn set_ex(&self, key: &str, payload: &str, ttl_secs: u64) -> CacheResult<()> {
        self.check().await?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.put(key, payload, Duration::from_secs(ttl_secs));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        self.check().await?;
        let mut entries = self.entries.lock().unwrap();
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count() as u64)
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.check().await?;
        let re = glob_to_regex(pattern)?;
        let entries = self.entries.lock().unwrap();
        Ok(entries.keys().filter(|k| re.is_match(k)).cloned().collect())
    }

    async fn increment(&self, key: &str, by: i64, ttl_secs: u64, initial: i64) -> CacheResult<i64> {
        self.check().await?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let current = entries
            .get(key)
            .filter(|s| s.expires_at > now)
            .and_then(|s| s.payload.parse::<i64>().ok().map(|n| (n, s.expires_at)));
        let (next, expires_at) = match current {
            Some((n, expires_at)) => (n + by, expires_at),
            None => (initial + by, now + Duration::from_secs(ttl_secs)),
        };
        entries.insert(
            key.to_string(),
            Stored {
                payload: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn key_count(&self) -> CacheResult<Option<u64>> {
        self.check().await?;
        Ok(Some(self.entries.lock().unwrap().len() as u64))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Settings with Redis disabled and no background sweeper.
pub fn test_settings() -> CacheSettings {
    let mut settings = CacheSettings::default();
    settings.redis.enabled = false;
    settings.memory.check_period_secs = 0;
    settings
}
