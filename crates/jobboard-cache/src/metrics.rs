//! Prometheus metrics for the cache manager.
//!
//! Series are labelled only through the typed [`CacheTier`] and [`CacheOp`]
//! enums, so a typo cannot create a new time series.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "cache_evictions_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
    pub const CACHE_REDIS_CONNECTED: &str = "cache_redis_connected";
}

/// Cache tier a measurement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    Memory,
    Redis,
}

impl CacheTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Redis => "redis",
        }
    }
}

/// Cache operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Get,
    Set,
    Del,
    ClearPattern,
    Increment,
    Serialize,
    Deserialize,
}

impl CacheOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            CacheOp::Get => "get",
            CacheOp::Set => "set",
            CacheOp::Del => "del",
            CacheOp::ClearPattern => "clear_pattern",
            CacheOp::Increment => "increment",
            CacheOp::Serialize => "serialize",
            CacheOp::Deserialize => "deserialize",
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at startup.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics is served by our own router
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Record a cache hit.
pub fn record_cache_hit(tier: CacheTier) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier.as_str()).increment(1);
}

/// Record a miss in every consulted tier.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a tier failure that was absorbed by the manager.
pub fn record_cache_error(tier: CacheTier, op: CacheOp) {
    counter!(
        names::CACHE_ERRORS_TOTAL,
        "tier" => tier.as_str(),
        "op" => op.as_str()
    )
    .increment(1);
}

/// Record entries dropped from the memory tier for capacity or expiry.
pub fn record_cache_evictions(count: u64) {
    if count > 0 {
        counter!(names::CACHE_EVICTIONS_TOTAL).increment(count);
    }
}

/// Set the number of cache entries.
pub fn set_cache_entries(tier: CacheTier, count: u64) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier.as_str()).set(count as f64);
}

/// Record whether the remote tier is currently reachable.
pub fn set_redis_connected(connected: bool) {
    gauge!(names::CACHE_REDIS_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}
