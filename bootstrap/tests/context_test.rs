//! 服务上下文集成测试
//!
//! 缓存未命中 -> 受保护的上游调用 -> 回写缓存的完整链路

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use mdcache_adapter_redis::{RedisStore, RemoteStoreConfig};
use mdcache_bootstrap::ServiceContext;
use mdcache_cache::CacheMode;
use mdcache_common::{HealthState, ManualClock};
use mdcache_config::{AppConfig, CacheSettings, FaultToleranceSettings, TelemetryConfig};
use mdcache_errors::AppError;
use mdcache_resilience::{CircuitState, GuardError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Quote {
    code: String,
    price: f64,
}

fn quote(price: f64) -> Quote {
    Quote {
        code: "000001.SZ".to_string(),
        price,
    }
}

fn app_config(mode: CacheMode) -> AppConfig {
    let mut cache = CacheSettings::default();
    cache.mode = mode;
    cache.remote.port = 1;
    cache.remote.connect_attempts = 1;
    cache.remote.connect_timeout_secs = 1;
    cache.remote.operation_timeout_secs = 1;

    AppConfig {
        app_name: "mdcache-test".to_string(),
        app_env: "test".to_string(),
        cache,
        fault_tolerance: FaultToleranceSettings {
            failure_threshold: 3,
            recovery_timeout_seconds: 10,
            success_threshold: 2,
            ..Default::default()
        },
        telemetry: TelemetryConfig::default(),
    }
}

async fn local_context(clock: Arc<ManualClock>) -> ServiceContext {
    ServiceContext::with_remote(app_config(CacheMode::Local), clock, None).await
}

#[tokio::test]
async fn test_get_or_fetch_caches_upstream_value() {
    let ctx = local_context(ManualClock::starting_now()).await;
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let value = ctx
            .get_or_fetch("000001.SZ", "realtime_quotes", "tdx", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(quote(10.5))
            })
            .await
            .unwrap();
        assert_eq!(value, Some(quote(10.5)));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    ctx.close().await;
}

#[tokio::test]
async fn test_expired_entry_is_fetched_again() {
    let clock = ManualClock::starting_now();
    let ctx = local_context(clock.clone()).await;
    let calls = AtomicU32::new(0);

    let fetch = |price: f64| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, AppError>(quote(price)) }
    };

    ctx.get_or_fetch("000001.SZ", "realtime_quotes", "tdx", || fetch(10.0))
        .await
        .unwrap();
    clock.advance(Duration::from_secs(6));
    let refreshed = ctx
        .get_or_fetch("000001.SZ", "realtime_quotes", "tdx", || fetch(10.2))
        .await
        .unwrap();

    assert_eq!(refreshed, Some(quote(10.2)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    ctx.close().await;
}

#[tokio::test]
async fn test_failing_upstream_opens_breaker() {
    let clock = ManualClock::starting_now();
    let ctx = local_context(clock.clone()).await;
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let result = ctx
            .get_or_fetch::<Quote, _, _>("000002.SZ", "realtime_quotes", "eastmoney", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::timeout("quote request timed out"))
            })
            .await;
        assert!(matches!(result, Ok(None)));
    }
    assert_eq!(
        ctx.recovery().breakers().state("eastmoney"),
        Some(CircuitState::Open)
    );

    let refused = ctx
        .get_or_fetch("000002.SZ", "realtime_quotes", "eastmoney", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AppError>(quote(8.0))
        })
        .await;
    assert!(matches!(refused, Err(GuardError::CircuitOpen(ref s)) if s == "eastmoney"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    clock.advance(Duration::from_secs(10));
    let recovered = ctx
        .get_or_fetch("000002.SZ", "realtime_quotes", "eastmoney", || async {
            Ok::<_, AppError>(quote(8.0))
        })
        .await
        .unwrap();
    assert_eq!(recovered, Some(quote(8.0)));
    assert_eq!(
        ctx.recovery().breakers().state("eastmoney"),
        Some(CircuitState::HalfOpen)
    );

    let stats = ctx.recovery().statistics();
    assert_eq!(stats.total_errors, 3);
    assert_eq!(stats.category_distribution["timeout"], 3);
    ctx.close().await;
}

#[tokio::test]
async fn test_remote_mode_degrades_when_redis_unreachable() {
    let clock = ManualClock::starting_now();
    let remote = RedisStore::lazy(
        RemoteStoreConfig::new("127.0.0.1", 1).with_operation_timeout(Duration::from_secs(1)),
        clock.clone(),
    );
    let ctx =
        ServiceContext::with_remote(app_config(CacheMode::Remote), clock, Some(Arc::new(remote)))
            .await;

    assert_eq!(ctx.cache().mode(), CacheMode::Local);
    assert!(ctx.cache().remote().is_none());
    assert!(ctx.cache().set("600000.SH", b"v", "hot_stocks", None).await);
    ctx.close().await;
}

#[tokio::test]
async fn test_hybrid_mode_keeps_unreachable_redis_and_reports_degraded() {
    let ctx =
        ServiceContext::with_clock(app_config(CacheMode::Hybrid), ManualClock::starting_now())
            .await;

    assert_eq!(ctx.cache().mode(), CacheMode::Hybrid);
    assert!(ctx.cache().remote().is_some());

    let report = ctx.health_check().await;
    assert_eq!(report.overall, HealthState::Degraded);
    ctx.close().await;
}
