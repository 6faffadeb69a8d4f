//! Integration tests for the two-tier cache manager.
//!
//! The remote tier is replaced by an in-process fake, so these run without
//! Redis. See `redis_cache.rs` for the real thing.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{FakeRemote, test_settings};
use jobboard_cache::{CacheManager, CacheOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Job {
    id: u64,
    title: String,
    tags: Vec<String>,
}

fn job(id: u64) -> Job {
    Job {
        id,
        title: format!("Engineer #{id}"),
        tags: vec!["rust".into(), "remote".into()],
    }
}

fn layered() -> (CacheManager, Arc<FakeRemote>) {
    let remote = Arc::new(FakeRemote::new());
    let cache = CacheManager::with_remote(test_settings(), remote.clone());
    (cache, remote)
}

#[tokio::test]
async fn test_set_then_get_returns_equal_value() {
    let (cache, remote) = layered();
    let opts = CacheOptions::namespace("jobs");

    assert!(cache.set("job:1", &job(1), &opts).await);
    assert_eq!(cache.get::<Job>("job:1", &opts).await, Some(job(1)));
    assert!(remote.raw("jobboard:jobs:job:1").is_some());
}

#[tokio::test]
async fn test_memory_only_set_then_get() {
    let cache = CacheManager::memory_only(test_settings());
    let opts = CacheOptions::new();

    assert!(cache.set("k", &json!({"a": [1, 2, 3]}), &opts).await);
    assert_eq!(cache.get_value("k", &opts).await, Some(json!({"a": [1, 2, 3]})));
}

#[tokio::test]
async fn test_get_or_returns_fallback_after_del() {
    let (cache, remote) = layered();
    let opts = CacheOptions::namespace("jobs");

    cache.set("job:2", &job(2), &opts).await;
    assert!(cache.del("job:2", &opts).await);

    let fallback = job(0);
    assert_eq!(cache.get_or("job:2", &opts, fallback.clone()).await, fallback);
    assert!(remote.raw("jobboard:jobs:job:2").is_none());

    // Deleting an absent key is not an error
    assert!(cache.del("never-set", &opts).await);
}

#[tokio::test]
async fn test_clear_pattern_only_touches_matching_keys_in_namespace() {
    let (cache, remote) = layered();
    let ns = CacheOptions::namespace("ns");
    let other = CacheOptions::namespace("other");

    cache.set("foo:1", &1, &ns).await;
    cache.set("foo:2", &2, &ns).await;
    cache.set("bar:1", &3, &ns).await;
    cache.set("foo:1", &4, &other).await;

    assert!(cache.clear_pattern("foo:*", &ns).await);

    assert_eq!(cache.get::<i64>("foo:1", &ns).await, None);
    assert_eq!(cache.get::<i64>("foo:2", &ns).await, None);
    assert_eq!(cache.get::<i64>("bar:1", &ns).await, Some(3));
    assert_eq!(cache.get::<i64>("foo:1", &other).await, Some(4));
    assert_eq!(
        remote.keys(),
        vec!["jobboard:ns:bar:1".to_string(), "jobboard:other:foo:1".to_string()]
    );
}

#[tokio::test]
async fn test_clear_pattern_memory_only() {
    let cache = CacheManager::memory_only(test_settings());
    let ns = CacheOptions::namespace("ns");

    cache.set("foo:1", &1, &ns).await;
    cache.set("foobar", &2, &ns).await;

    assert!(cache.clear_pattern("foo:*", &ns).await);
    assert_eq!(cache.get::<i64>("foo:1", &ns).await, None);
    assert_eq!(cache.get::<i64>("foobar", &ns).await, Some(2));
}

#[tokio::test]
async fn test_increment_with_remote() {
    let (cache, remote) = layered();
    let opts = CacheOptions::namespace("rate").with_ttl_secs(60);

    assert_eq!(cache.increment("ip:1", &opts, 5, 10).await, 15);
    assert_eq!(cache.increment("ip:1", &opts, 3, 10).await, 18);
    assert_eq!(remote.raw("jobboard:rate:ip:1").as_deref(), Some("18"));
    assert_eq!(cache.get::<i64>("ip:1", &opts).await, Some(18));
}

#[tokio::test]
async fn test_increment_memory_only() {
    let cache = CacheManager::memory_only(test_settings());
    let opts = CacheOptions::namespace("rate");

    assert_eq!(cache.increment("ip:1", &opts, 5, 10).await, 15);
    assert_eq!(cache.increment("ip:1", &opts, 3, 10).await, 18);
    assert_eq!(cache.get::<i64>("ip:1", &opts).await, Some(18));
}

#[tokio::test]
async fn test_increment_falls_back_to_memory_when_disconnected() {
    let (cache, remote) = layered();
    remote.set_connected(false);
    let opts = CacheOptions::new();

    assert_eq!(cache.increment("hits", &opts, 1, 0).await, 1);
    assert_eq!(cache.increment("hits", &opts, 1, 0).await, 2);
    assert!(remote.keys().is_empty());
}

#[tokio::test]
async fn test_memory_counter_keeps_requested_window() {
    let mut settings = test_settings();
    settings.memory.ttl_secs = 1;
    let cache = CacheManager::memory_only(settings);
    let opts = CacheOptions::namespace("rate").with_ttl_secs(60);

    assert_eq!(cache.increment("ip:2", &opts, 1, 0).await, 1);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(cache.increment("ip:2", &opts, 1, 0).await, 2);
}

#[tokio::test]
async fn test_get_or_set_fetches_once() {
    let (cache, _remote) = layered();
    let opts = CacheOptions::namespace("jobs");
    let calls = &AtomicUsize::new(0);

    for _ in 0..3 {
        let value: Result<Job, String> = cache
            .get_or_set("job:7", &opts, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(job(7))
            })
            .await;
        assert_eq!(value, Ok(job(7)));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_or_set_propagates_fetch_error_without_caching() {
    let (cache, remote) = layered();
    let opts = CacheOptions::namespace("jobs");

    let result: Result<Job, String> = cache
        .get_or_set("job:8", &opts, || async { Err("database down".to_string()) })
        .await;

    assert_eq!(result, Err("database down".to_string()));
    assert_eq!(cache.get::<Job>("job:8", &opts).await, None);
    assert!(remote.keys().is_empty());
}

#[tokio::test]
async fn test_get_or_set_does_not_cache_null() {
    let cache = CacheManager::memory_only(test_settings());
    let opts = CacheOptions::new();
    let calls = &AtomicUsize::new(0);

    for _ in 0..2 {
        let value: Result<Option<Job>, String> = cache
            .get_or_set("missing", &opts, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .await;
        assert_eq!(value, Ok(None));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_get_or_set_skip_cache_always_fetches() {
    let cache = CacheManager::memory_only(test_settings());
    let opts = CacheOptions::new().skip_cache();
    let calls = &AtomicUsize::new(0);

    for _ in 0..2 {
        let _: Result<i64, String> = cache
            .get_or_set("n", &opts, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get::<i64>("n", &CacheOptions::new()).await, None);
}

#[tokio::test]
async fn test_disconnected_remote_degrades_to_memory() {
    let (cache, remote) = layered();
    remote.set_connected(false);
    let opts = CacheOptions::namespace("jobs");

    assert!(cache.set("job:3", &job(3), &opts).await);
    assert_eq!(cache.get::<Job>("job:3", &opts).await, Some(job(3)));
    assert!(remote.keys().is_empty());

    let stats = cache.stats().await;
    assert!(stats.redis.enabled);
    assert!(!stats.redis.connected);
    assert_eq!(stats.memory.keys, 1);
}

#[tokio::test]
async fn test_offline_queue_waits_for_reconnect() {
    let remote = Arc::new(FakeRemote::new().with_offline_queue());
    let cache = CacheManager::with_remote(test_settings(), remote.clone());
    let opts = CacheOptions::namespace("jobs");
    remote.put("jobboard:jobs:job:4", r#"{"id":4}"#, Duration::from_secs(60));
    remote.set_connected(false);

    let reconnect = {
        let remote = remote.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            remote.set_connected(true);
        })
    };

    assert!(!cache.is_remote_connected());
    assert_eq!(cache.get_value("job:4", &opts).await, Some(json!({"id": 4})));
    assert_eq!(remote.gets.load(Ordering::SeqCst), 1);
    reconnect.await.unwrap();
}

#[tokio::test]
async fn test_offline_queue_gives_up_after_command_timeout() {
    let remote = Arc::new(FakeRemote::new().with_offline_queue());
    let cache = CacheManager::with_remote(test_settings(), remote.clone());
    let opts = CacheOptions::namespace("jobs");
    remote.set_connected(false);

    assert!(cache.set("job:5", &job(5), &opts).await);
    assert_eq!(cache.get::<Job>("job:5", &opts).await, Some(job(5)));
    assert!(remote.keys().is_empty());
    assert_eq!(remote.sets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_timeouts_degrade_every_operation() {
    let (cache, remote) = layered();
    let opts = CacheOptions::namespace("jobs");
    remote.put("jobboard:jobs:remote-only", "1", Duration::from_secs(60));
    remote.set_timing_out(true);

    // The remote write failed, memory still holds the value
    assert!(!cache.set("job:6", &job(6), &opts).await);
    assert_eq!(cache.get::<Job>("job:6", &opts).await, Some(job(6)));
    assert_eq!(cache.get_value("remote-only", &opts).await, None);

    assert_eq!(cache.increment("views", &opts, 1, 0).await, 1);
    assert_eq!(cache.increment("views", &opts, 1, 0).await, 2);
    assert!(!cache.clear_pattern("job:*", &opts).await);
    assert!(!cache.del("job:6", &opts).await);
    assert_eq!(cache.get::<Job>("job:6", &opts).await, None);

    remote.set_timing_out(false);
    assert_eq!(cache.get_value("remote-only", &opts).await, Some(json!(1)));
}

#[tokio::test]
async fn test_remote_hit_is_promoted_to_memory() {
    let (cache, remote) = layered();
    let opts = CacheOptions::namespace("jobs");

    // Written by another instance
    remote.put(
        "jobboard:jobs:job:42",
        r#"{"id":42,"title":"Engineer #42","tags":["rust","remote"]}"#,
        Duration::from_secs(600),
    );

    assert_eq!(cache.get::<Job>("job:42", &opts).await, Some(job(42)));
    assert_eq!(remote.gets.load(Ordering::SeqCst), 1);

    // Served from memory now, even with Redis gone
    remote.set_connected(false);
    assert_eq!(cache.get::<Job>("job:42", &opts).await, Some(job(42)));
    assert_eq!(remote.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_promoted_entry_never_outlives_remote_entry() {
    let (cache, remote) = layered();
    let opts = CacheOptions::new();

    remote.put("jobboard::short", "\"v\"", Duration::from_millis(300));
    assert_eq!(cache.get::<String>("short", &opts).await.as_deref(), Some("v"));

    tokio::time::sleep(Duration::from_millis(400)).await;
    remote.set_connected(false);
    assert_eq!(cache.get::<String>("short", &opts).await, None);
}

#[tokio::test]
async fn test_malformed_remote_payload_is_a_miss() {
    let (cache, remote) = layered();
    remote.put("jobboard::bad", "{not json", Duration::from_secs(60));

    assert_eq!(cache.get_value("bad", &CacheOptions::new()).await, None);
}

#[tokio::test]
async fn test_shape_mismatch_is_a_miss() {
    let cache = CacheManager::memory_only(test_settings());
    let opts = CacheOptions::new();

    cache.set("title", &"Rust Engineer", &opts).await;
    assert_eq!(cache.get::<Job>("title", &opts).await, None);
    assert_eq!(
        cache.get::<String>("title", &opts).await.as_deref(),
        Some("Rust Engineer")
    );
}

#[tokio::test]
async fn test_skip_flags_select_tiers() {
    let (cache, remote) = layered();

    let remote_only = CacheOptions::namespace("a").skip_memory();
    cache.set("k", &1, &remote_only).await;
    assert_eq!(remote.raw("jobboard:a:k").as_deref(), Some("1"));
    assert_eq!(cache.stats().await.memory.keys, 0);

    let memory_only = CacheOptions::namespace("b").skip_redis();
    cache.set("k", &2, &memory_only).await;
    assert!(remote.raw("jobboard:b:k").is_none());
    assert_eq!(cache.get::<i64>("k", &memory_only).await, Some(2));
}

#[tokio::test]
async fn test_ttl_is_passed_to_remote_in_seconds() {
    let (cache, remote) = layered();
    let opts = CacheOptions::namespace("jobs").with_ttl_secs(120);

    cache.set("job:5", &job(5), &opts).await;

    let ttl = remote.ttl("jobboard:jobs:job:5").expect("key exists");
    assert!(ttl > Duration::from_secs(110) && ttl <= Duration::from_secs(120));
}

#[tokio::test]
async fn test_job_listing_scenario() {
    let (cache, remote) = layered();
    let opts = CacheOptions::namespace("jobs").with_ttl_secs(300);
    let loads = &AtomicUsize::new(0);

    let load = || async move {
        loads.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(job(42))
    };

    assert_eq!(cache.get_or_set("job:42", &opts, load).await, Ok(job(42)));
    assert_eq!(cache.get_or_set("job:42", &opts, load).await, Ok(job(42)));
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(remote.raw("jobboard:jobs:job:42").is_some());

    // Job updated: invalidate, next read reloads
    cache.clear_pattern("job:*", &opts).await;
    assert_eq!(cache.get_or_set("job:42", &opts, load).await, Ok(job(42)));
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stats_reports_both_tiers() {
    let (cache, _remote) = layered();
    let opts = CacheOptions::new();

    cache.set("a", &1, &opts).await;
    cache.get::<i64>("a", &opts).await;

    let stats = cache.stats().await;
    assert_eq!(stats.memory.keys, 1);
    assert_eq!(stats.memory.hits, 1);
    assert!(stats.redis.connected);
    assert_eq!(stats.redis.keys, Some(1));
    assert_eq!(stats.redis.key_prefix, "jobboard:");

    let rendered = serde_json::to_value(&stats).unwrap();
    assert!(rendered.get("memory").is_some());
    assert!(rendered.get("redis").is_some());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (cache, remote) = layered();
    cache.set("a", &1, &CacheOptions::new()).await;

    cache.close().await;
    cache.close().await;

    assert_eq!(remote.closes.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().await.memory.keys, 0);
}

#[tokio::test]
async fn test_connect_with_redis_disabled_is_memory_only() {
    let cache = CacheManager::connect(test_settings()).await;

    assert!(!cache.is_remote_connected());
    assert!(!cache.stats().await.redis.enabled);
    assert!(cache.set("a", &1, &CacheOptions::new()).await);
    cache.close().await;
}

#[tokio::test]
async fn test_connect_to_unreachable_redis_degrades() {
    let mut settings = test_settings();
    settings.redis.enabled = true;
    settings.redis.url = "redis://127.0.0.1:1".to_string();
    settings.redis.max_retries = 1;
    settings.redis.retry_delay_on_failover_ms = 10;
    settings.redis.connect_timeout_ms = 200;

    let cache = tokio::time::timeout(Duration::from_secs(5), CacheManager::connect(settings))
        .await
        .expect("connect gives up quickly");

    assert!(!cache.is_remote_connected());
    assert!(cache.set("a", &1, &CacheOptions::new()).await);
    assert_eq!(cache.get::<i64>("a", &CacheOptions::new()).await, Some(1));
    cache.close().await;
}

#[tokio::test]
async fn test_job_written_then_deleted() {
    let (cache, _remote) = layered();
    let opts = CacheOptions::namespace("jobs").with_ttl_secs(60);
    let value = json!({"title": "Engineer"});

    assert!(cache.set("job:42", &value, &opts).await);
    assert_eq!(cache.get_value("job:42", &opts).await, Some(value));

    assert!(cache.del("job:42", &opts).await);
    assert_eq!(
        cache.get_or("job:42", &opts, json!({"title": "n/a"})).await,
        json!({"title": "n/a"})
    );
}
