//! Redis 存储集成测试
//!
//! 需要本地 Redis（默认 127.0.0.1:6379，可用 MDCACHE_TEST_REDIS_HOST 覆盖），
//! 使用 `cargo test -- --ignored` 运行

use std::sync::Arc;
use std::time::Duration;

use mdcache_adapter_redis::{RedisStore, RemoteStoreConfig};
use mdcache_common::{CompressionConfig, ManualClock, SharedClock};

fn test_config() -> RemoteStoreConfig {
    let host = std::env::var("MDCACHE_TEST_REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    RemoteStoreConfig::new(host, 6379)
        .with_db(15)
        .with_compression(CompressionConfig::enabled(64))
}

async fn connect() -> (RedisStore, Arc<ManualClock>) {
    let clock = ManualClock::starting_now();
    let shared: SharedClock = clock.clone();
    let store = RedisStore::connect(test_config(), shared)
        .await
        .expect("needs a Redis instance");
    (store, clock)
}

#[tokio::test]
#[ignore = "needs a Redis instance"]
async fn test_set_get_with_logical_ttl() {
    let (store, clock) = connect().await;
    let key = "easyxt:test:ttl";

    assert!(store.set(key, b"1850.0", Some(5), Some("realtime_quotes")).await);
    assert_eq!(store.get(key, None).await, Some(b"1850.0".to_vec()));
    assert!(store.exists(key).await);

    // 逻辑 TTL 过期后即使物理 TTL 未到也视为未命中
    clock.advance(Duration::from_secs(6));
    assert_eq!(store.get(key, None).await, None);
    assert!(!store.exists(key).await);
}

#[tokio::test]
#[ignore = "needs a Redis instance"]
async fn test_get_on_missing_key_creates_nothing() {
    let (store, _) = connect().await;
    let key = "easyxt:test:missing";
    store.delete(key, None).await;

    assert_eq!(store.get(key, None).await, None);
    assert!(store.keys(key).await.is_empty());
}

#[tokio::test]
#[ignore = "needs a Redis instance"]
async fn test_compressed_round_trip_and_delete() {
    let (store, _) = connect().await;
    let key = "easyxt:test:big";
    let big = "000001.SZ,".repeat(100).into_bytes();

    assert!(store.set(key, &big, Some(60), None).await);
    assert_eq!(store.get(key, None).await, Some(big));
    assert!(store.delete(key, None).await);
    assert!(!store.delete(key, None).await);
}

#[tokio::test]
#[ignore = "needs a Redis instance"]
async fn test_clear_by_prefix_and_info() {
    let (store, _) = connect().await;
    store.set("easyxt:scoped:a", b"1", Some(60), None).await;
    store.set("easyxt:scoped:b", b"2", Some(60), None).await;
    store.set("easyxt:other:a", b"3", Some(60), None).await;

    store.clear(Some("easyxt:scoped:")).await;
    assert!(store.keys("easyxt:scoped:*").await.is_empty());
    assert!(store.exists("easyxt:other:a").await);

    assert!(store.ping().await);
    let stats = store.stats().await;
    assert!(stats.connected);
    assert!(stats.server.and_then(|s| s.redis_version).is_some());
}

#[tokio::test]
async fn test_unreachable_server_fails_open() {
    let clock: SharedClock = ManualClock::starting_now();
    let mut config = RemoteStoreConfig::new("127.0.0.1", 1)
        .with_operation_timeout(Duration::from_millis(200));
    config.connect_timeout = Duration::from_millis(200);
    let store = RedisStore::lazy(config, clock);

    assert!(!store.ping().await);
    assert_eq!(store.get("k", Some("hot_stocks")).await, None);
    assert!(!store.set("k", b"v", None, Some("hot_stocks")).await);
    let errors = store.metrics().total.errors;
    assert!(errors >= 2);

    assert!(!store.exists("k").await);
    assert_eq!(store.metrics().total.errors, errors + 1);
    store.clear(Some("easyxt:hot_stocks:")).await;
    assert_eq!(store.metrics().total.errors, errors + 2);
    store.clear(None).await;
    assert_eq!(store.metrics().total.errors, errors + 3);
}
