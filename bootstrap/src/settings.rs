//! 配置到组件配置的唯一转换点

use std::time::Duration;

use mdcache_adapter_redis::RemoteStoreConfig;
use mdcache_cache::{CoordinatorConfig, LocalStoreConfig};
use mdcache_common::{BackoffPolicy, CompressionConfig};
use mdcache_config::{CacheSettings, FaultToleranceSettings};
use mdcache_resilience::FaultToleranceConfig;

fn compression(settings: &CacheSettings) -> CompressionConfig {
    if settings.enable_compression {
        CompressionConfig::enabled(settings.compression_threshold_bytes)
    } else {
        CompressionConfig::default()
    }
}

pub fn local_store_config(settings: &CacheSettings) -> LocalStoreConfig {
    LocalStoreConfig::new(settings.max_size, settings.default_ttl)
        .with_eviction_policy(settings.eviction_policy)
        .with_compression(compression(settings))
        .with_sweep_interval(Duration::from_secs(settings.sweep_interval_secs))
        .with_stats(settings.enable_stats)
}

pub fn coordinator_config(settings: &CacheSettings) -> CoordinatorConfig {
    CoordinatorConfig::new(settings.mode)
        .with_local(local_store_config(settings))
        .with_namespace(settings.namespace.clone())
        .with_worker_count(settings.worker_count)
        .with_write_timeout(Duration::from_secs(settings.write_timeout_secs))
        .with_stats(settings.enable_stats)
}

pub fn remote_store_config(settings: &CacheSettings) -> RemoteStoreConfig {
    let remote = &settings.remote;
    let mut config = RemoteStoreConfig::new(remote.host.clone(), remote.port)
        .with_db(remote.db)
        .with_default_ttl(settings.default_ttl)
        .with_compression(compression(settings))
        .with_operation_timeout(Duration::from_secs(remote.operation_timeout_secs))
        .with_stats(settings.enable_stats);
    config.password = remote.password.clone();
    config.connect_timeout = Duration::from_secs(remote.connect_timeout_secs);
    config
}

/// 启动时连接远程缓存的重试策略
pub fn remote_connect_policy(settings: &CacheSettings) -> BackoffPolicy {
    BackoffPolicy::new(
        settings.remote.connect_attempts.max(1),
        Duration::from_secs(1),
        Duration::from_secs(10),
    )
}

pub fn fault_tolerance_config(settings: &FaultToleranceSettings) -> FaultToleranceConfig {
    FaultToleranceConfig::default()
        .with_breaker(
            settings.failure_threshold,
            Duration::from_secs(settings.recovery_timeout_seconds),
            settings.success_threshold,
        )
        .with_history(
            settings.max_error_history,
            Duration::from_secs(settings.error_retention_hours.saturating_mul(3600)),
        )
        .with_max_recovery_attempts(settings.max_recovery_attempts)
        .with_recovery_logging(settings.recovery_logging)
}
