//! Process-local (L1) cache tier backed by DashMap.
//!
//! Entries carry their own expiry; expired entries are dropped lazily on read
//! and in bulk by a periodic sweeper. The tier is bounded by `max_keys`: when
//! full, expired entries are purged first and then the entry closest to
//! expiry is evicted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MemorySettings;
use crate::metrics;

/// A cached value with its expiry.
///
/// The value is wrapped in `Arc` so hits hand out a shared reference instead
/// of copying potentially large JSON documents.
#[derive(Clone, Debug)]
struct MemoryEntry {
    value: Arc<Value>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value: Arc::new(value),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Memory tier statistics for monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    /// Number of entries currently stored (may include not-yet-swept expired ones)
    pub keys: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed by expiry or capacity pressure
    pub evictions: u64,
    /// Configured capacity, 0 when unbounded
    pub max_keys: usize,
}

impl MemoryStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Bounded in-memory tier with per-entry TTL.
pub struct MemoryTier {
    entries: DashMap<String, MemoryEntry>,
    default_ttl: Duration,
    max_keys: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryTier {
    pub fn new(default_ttl: Duration, max_keys: usize) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            max_keys,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &MemorySettings) -> Self {
        Self::new(settings.ttl(), settings.max_keys)
    }

    /// Upper bound for any entry's lifetime in this tier.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Lifetime actually used for a write: never longer than the tier default.
    pub fn effective_ttl(&self, requested: Option<Duration>) -> Duration {
        requested.map_or(self.default_ttl, |ttl| ttl.min(self.default_ttl))
    }

    /// Get a live entry. Expired entries are removed and count as a miss.
    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.value));
            }
            drop(entry);
            if self
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now))
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_evictions(1);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value for `min(requested_ttl, default_ttl)`.
    ///
    /// Returns `false` only when the tier has no usable lifetime for the entry.
    pub fn set(&self, key: &str, value: Value, requested_ttl: Option<Duration>) -> bool {
        let ttl = self.effective_ttl(requested_ttl);
        if ttl.is_zero() {
            return false;
        }

        if !self.entries.contains_key(key) {
            self.make_room();
        }
        self.entries.insert(key.to_string(), MemoryEntry::new(value, ttl));
        true
    }

    /// Remove an entry. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose key matches `pattern`.
    pub fn remove_matching(&self, pattern: &Regex) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            if pattern.is_match(key) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Increment an integer counter in place.
    ///
    /// A missing, expired or non-integer entry is initialised to
    /// `initial + by` and lives for `ttl`; an existing counter keeps the expiry
    /// set by its first write. A counter here is the only copy, so `ttl` is
    /// not capped by the tier default.
    pub fn increment(&self, key: &str, by: i64, ttl: Option<Duration>, initial: i64) -> i64 {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);

        if !self.entries.contains_key(key) {
            self.make_room();
        }

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let next = match current.value.as_i64() {
                    Some(n) if !current.is_expired(now) => Some(n.saturating_add(by)),
                    _ => None,
                };
                match next {
                    Some(n) => {
                        let expires_at = current.expires_at;
                        occupied.insert(MemoryEntry {
                            value: Arc::new(Value::from(n)),
                            expires_at,
                        });
                        n
                    }
                    None => {
                        let n = initial.saturating_add(by);
                        occupied.insert(MemoryEntry::new(Value::from(n), ttl));
                        n
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let n = initial.saturating_add(by);
                vacant.insert(MemoryEntry::new(Value::from(n), ttl));
                n
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clean up expired entries.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            metrics::record_cache_evictions(removed as u64);
        }

        removed
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            keys: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            max_keys: self.max_keys,
        }
    }

    /// Start the periodic expiry sweep.
    ///
    /// The task holds only a weak reference and stops when the tier is dropped
    /// or `shutdown` is cancelled. Returns `None` outside a Tokio runtime.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let tier: Weak<Self> = Arc::downgrade(self);

        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(tier) = tier.upgrade() else { break };
                        let removed = tier.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "swept expired memory cache entries");
                        }
                        metrics::set_cache_entries(metrics::CacheTier::Memory, tier.len() as u64);
                    }
                }
            }
            tracing::debug!("memory cache sweeper stopped");
        }))
    }

    /// Free a slot for a new key when the tier is at capacity.
    fn make_room(&self) {
        if self.max_keys == 0 || self.entries.len() < self.max_keys {
            return;
        }

        self.purge_expired();
        if self.entries.len() < self.max_keys {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim
            && self.entries.remove(&key).is_some()
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_evictions(1);
            tracing::debug!(key = %key, "evicted memory cache entry (capacity)");
        }
    }
}
