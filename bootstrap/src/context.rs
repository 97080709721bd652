//! 服务上下文
//!
//! 进程启动时构造一次，持有缓存协调器和恢复引擎，按引用传给需要的组件

use std::future::Future;
use std::sync::Arc;

use mdcache_adapter_redis::RedisStore;
use mdcache_cache::{CacheCoordinator, CacheStore, HealthReport};
use mdcache_common::{SharedClock, system_clock, with_retry_optional};
use mdcache_config::{AppConfig, ConfigError};
use mdcache_errors::{AppError, AppResult};
use mdcache_resilience::{FaultContext, GuardError, RecoveryEngine, call_guarded};
use mdcache_telemetry::TelemetryError;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

use crate::settings::{
    coordinator_config, fault_tolerance_config, remote_connect_policy, remote_store_config,
};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// 服务上下文
pub struct ServiceContext {
    config: AppConfig,
    clock: SharedClock,
    cache: Arc<CacheCoordinator>,
    recovery: Arc<RecoveryEngine>,
    metrics: Option<PrometheusHandle>,
}

impl ServiceContext {
    /// 加载配置、初始化遥测并构造上下文
    pub async fn start(config_dir: &str) -> Result<Self, BootstrapError> {
        let config = AppConfig::load(config_dir)?;
        let metrics = mdcache_telemetry::init(&config.telemetry)?;
        info!(
            app = %config.app_name,
            env = %config.app_env,
            "Starting market data cache"
        );

        let mut context = Self::from_config(config).await;
        context.metrics = metrics;
        Ok(context)
    }

    /// 使用系统时钟构造
    pub async fn from_config(config: AppConfig) -> Self {
        Self::with_clock(config, system_clock()).await
    }

    /// 需要时连接 Redis，再构造上下文
    pub async fn with_clock(config: AppConfig, clock: SharedClock) -> Self {
        let remote = connect_remote(&config, clock.clone()).await;
        Self::with_remote(config, clock, remote).await
    }

    /// 使用给定的远程存储构造
    pub async fn with_remote(
        config: AppConfig,
        clock: SharedClock,
        remote: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        let cache = CacheCoordinator::new(coordinator_config(&config.cache), clock.clone(), remote)
            .await;
        let recovery = RecoveryEngine::new(
            fault_tolerance_config(&config.fault_tolerance),
            clock.clone(),
        );

        Self {
            config,
            clock,
            cache: Arc::new(cache),
            recovery: Arc::new(recovery),
            metrics: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.cache
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    /// Prometheus 句柄，用于渲染指标
    pub fn metrics_handle(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }

    /// 先查缓存，未命中时在断路器保护下调用上游并回写缓存
    ///
    /// 上游失败且故障被吞掉时返回 `Ok(None)`
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        data_type: &str,
        source: &str,
        fetch: F,
    ) -> Result<Option<T>, GuardError<AppError>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if let Some(cached) = self.cache.get_json::<T>(key, data_type).await {
            return Ok(Some(cached));
        }

        let ctx = FaultContext::new()
            .with_context("key", key)
            .with_context("data_type", data_type);
        let fetched = call_guarded(&self.recovery, source, ctx, fetch).await?;

        if let Some(value) = &fetched {
            if !self.cache.set_json(key, value, data_type, None).await {
                debug!(key, data_type, "Fetched value not cached");
            }
        }
        Ok(fetched)
    }

    pub async fn health_check(&self) -> HealthReport {
        self.cache.health_check().await
    }

    /// 关闭缓存（等待后台任务、断开远程连接）
    pub async fn close(&self) {
        self.cache.close().await;
        info!("Service context closed");
    }
}

/// 按模式连接远程缓存
///
/// 连接失败时交给协调器一个延迟连接的存储，由协调器按模式决定降级
async fn connect_remote(config: &AppConfig, clock: SharedClock) -> Option<Arc<dyn CacheStore>> {
    let settings = &config.cache;
    if !settings.mode.uses_remote() {
        return None;
    }

    let remote_config = remote_store_config(settings);
    let policy = remote_connect_policy(settings);
    let connected = with_retry_optional(&policy, "Redis connection", || {
        let config = remote_config.clone();
        let clock = clock.clone();
        async move { RedisStore::connect(config, clock).await }
    })
    .await;

    let store = connected.unwrap_or_else(|| RedisStore::lazy(remote_config, clock));
    Some(Arc::new(store))
}
