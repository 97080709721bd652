//! 多级缓存协调器
//!
//! 按模式把请求路由到进程内存储、远程存储或两者：
//! - local：只用进程内存储
//! - remote：只用远程存储，启动时不可达则降级为 local
//! - hybrid：先读本地再读远程，远程命中后在工作池中回填本地；写入两层并发进行

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use mdcache_common::{
    AggregatedHealthResult, BaseHealthResult, CacheMetrics, ComponentHealth, HealthState,
    MetricsSnapshot, SharedClock,
};
use mdcache_ports::{CacheMode, CacheStore, CacheTier};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::local::{LocalStore, LocalStoreInfo};
use crate::pool::WorkerPool;
use crate::strategy::{CachePolicy, CacheStrategy};

/// 健康探测写入的值
const PROBE_VALUE: &[u8] = b"test";
/// 健康探测条目的 TTL（秒）
const PROBE_TTL: i64 = 10;

/// 协调器统计
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    /// 实际生效的模式
    pub mode: CacheMode,
    /// 配置的模式
    pub configured_mode: CacheMode,
    pub strategy_count: usize,
    pub local: Option<MetricsSnapshot>,
    pub local_info: Option<LocalStoreInfo>,
    pub remote: Option<MetricsSnapshot>,
    /// 各层合并后的指标
    pub combined: MetricsSnapshot,
    /// 协调器自身的指标
    pub coordinator: MetricsSnapshot,
    pub pending_tasks: usize,
}

/// 健康检查报告
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthState,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

impl From<AggregatedHealthResult> for HealthReport {
    fn from(result: AggregatedHealthResult) -> Self {
        Self {
            overall: result.overall(),
            components: result.components,
        }
    }
}

/// 多级缓存协调器
pub struct CacheCoordinator {
    config: CoordinatorConfig,
    mode: CacheMode,
    strategy: RwLock<CacheStrategy>,
    local: Option<Arc<LocalStore>>,
    remote: Option<Arc<dyn CacheStore>>,
    pool: WorkerPool,
    metrics: CacheMetrics,
    closed: AtomicBool,
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("mode", &self.mode)
            .field("configured_mode", &self.config.mode)
            .field("has_local", &self.local.is_some())
            .field("has_remote", &self.remote.is_some())
            .finish()
    }
}

impl CacheCoordinator {
    /// 创建协调器
    ///
    /// 构造永远不会失败：远程层缺失或不可达时按模式降级并记录告警
    pub async fn new(
        config: CoordinatorConfig,
        clock: SharedClock,
        remote: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        let configured = config.mode;
        let mut mode = configured;

        let mut remote = if configured.uses_remote() {
            remote
        } else {
            if remote.is_some() {
                debug!("Remote store ignored in local mode");
            }
            None
        };

        if configured.uses_remote() {
            let reachable = match &remote {
                Some(store) => Some(store.ping().await),
                None => None,
            };

            match (configured, reachable) {
                (_, None) => {
                    warn!(
                        mode = configured.as_str(),
                        "Remote cache not configured, falling back to local cache"
                    );
                    mode = CacheMode::Local;
                }
                (CacheMode::Remote, Some(false)) => {
                    warn!("Remote cache unreachable at startup, falling back to local cache");
                    if let Some(store) = remote.take() {
                        store.close().await;
                    }
                    mode = CacheMode::Local;
                }
                (_, Some(false)) => {
                    warn!("Remote cache unreachable at startup, hybrid mode keeps it attached");
                }
                (_, Some(true)) => {
                    info!("Remote cache reachable");
                }
            }
        }

        let local = mode
            .uses_local()
            .then(|| Arc::new(LocalStore::new(config.local.clone(), clock)));

        let strategy = CacheStrategy::new(config.default_ttl()).with_namespace(config.namespace.clone());
        let pool = WorkerPool::new(config.worker_count);
        let metrics = CacheMetrics::new("coordinator").with_enabled(config.enable_stats);

        info!(
            mode = mode.as_str(),
            configured_mode = configured.as_str(),
            workers = pool.workers(),
            "Cache coordinator initialized"
        );

        Self {
            config,
            mode,
            strategy: RwLock::new(strategy),
            local,
            remote,
            pool,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    /// 实际生效的模式
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn configured_mode(&self) -> CacheMode {
        self.config.mode
    }

    pub fn local(&self) -> Option<&Arc<LocalStore>> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&Arc<dyn CacheStore>> {
        self.remote.as_ref()
    }

    /// 工作池中尚未完成的任务数
    pub fn pending_tasks(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 注册或覆盖某个数据类型的策略
    pub fn register_policy(&self, data_type: impl Into<String>, policy: CachePolicy) {
        let data_type = data_type.into();
        debug!(data_type = %data_type, ttl = policy.ttl, "Cache policy registered");
        self.strategy.write().register(data_type, policy);
    }

    pub fn policy_for(&self, data_type: &str) -> CachePolicy {
        self.strategy.read().resolve(data_type)
    }

    /// 业务键对应的完整缓存键
    pub fn full_key(&self, key: &str, data_type: &str) -> String {
        self.strategy.read().key_for(data_type, key)
    }

    fn observe(&self, op: &'static str, key: &str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > self.config.slow_access_threshold {
            warn!(
                op,
                key,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow cache access"
            );
        }
    }

    /// 读取
    pub async fn get(&self, key: &str, data_type: &str) -> Option<Vec<u8>> {
        if self.is_closed() {
            return None;
        }
        let started = Instant::now();
        let full_key = self.full_key(key, data_type);

        let value = match self.mode {
            CacheMode::Local => self.local.as_ref().and_then(|l| l.get(&full_key, Some(data_type))),
            CacheMode::Remote => match &self.remote {
                Some(remote) => remote.get(&full_key, Some(data_type)).await,
                None => None,
            },
            CacheMode::Hybrid => self.get_hybrid(&full_key, data_type).await,
        };

        if value.is_some() {
            self.metrics.record_hit(Some(data_type));
        } else {
            self.metrics.record_miss(Some(data_type));
        }
        self.observe("get", key, started);
        value
    }

    async fn get_hybrid(&self, full_key: &str, data_type: &str) -> Option<Vec<u8>> {
        if let Some(value) = self.local.as_ref().and_then(|l| l.get(full_key, Some(data_type))) {
            return Some(value);
        }

        let value = self.remote.as_ref()?.get(full_key, Some(data_type)).await?;
        if let Some(local) = &self.local {
            self.backfill(Arc::clone(local), full_key, value.clone(), data_type);
        }
        Some(value)
    }

    /// 远程命中后回填本地，不等待结果
    fn backfill(&self, local: Arc<LocalStore>, full_key: &str, value: Vec<u8>, data_type: &str) {
        let ttl = self.strategy.read().ttl_for(data_type);
        let key = full_key.to_string();
        let data_type = data_type.to_string();

        let spawned = self.pool.spawn(async move {
            if !local.set(&key, &value, Some(ttl), Some(&data_type)) {
                debug!(key = %key, "Local backfill failed");
            }
        });
        if spawned.is_none() {
            debug!(key = full_key, "Local backfill skipped, worker pool closed");
        }
    }

    /// 写入；`ttl` 为空时使用数据类型策略的 TTL
    pub async fn set(&self, key: &str, value: &[u8], data_type: &str, ttl: Option<i64>) -> bool {
        if self.is_closed() {
            return false;
        }
        let started = Instant::now();

        let (full_key, ttl) = {
            let strategy = self.strategy.read();
            if !strategy.should_cache(data_type, value.len()) {
                debug!(key, data_type, size = value.len(), "Value not cacheable under policy");
                return false;
            }
            (
                strategy.key_for(data_type, key),
                ttl.unwrap_or_else(|| strategy.ttl_for(data_type)),
            )
        };

        let ok = match self.mode {
            CacheMode::Local => self
                .local
                .as_ref()
                .is_some_and(|l| l.set(&full_key, value, Some(ttl), Some(data_type))),
            CacheMode::Remote => match &self.remote {
                Some(remote) => remote.set(&full_key, value, Some(ttl), Some(data_type)).await,
                None => false,
            },
            CacheMode::Hybrid => self.set_hybrid(&full_key, value, ttl, data_type).await,
        };

        if ok {
            self.metrics.record_set(Some(data_type));
        } else {
            self.metrics.record_error(Some(data_type));
        }
        self.observe("set", key, started);
        ok
    }

    /// 两层并发写入，结果取与；任一层失败不会回滚另一层
    async fn set_hybrid(&self, full_key: &str, value: &[u8], ttl: i64, data_type: &str) -> bool {
        let mut tasks: Vec<(CacheTier, Option<JoinHandle<bool>>)> = Vec::with_capacity(2);

        if let Some(local) = &self.local {
            let local = Arc::clone(local);
            let (key, value, data_type) = (full_key.to_string(), value.to_vec(), data_type.to_string());
            tasks.push((
                CacheTier::Local,
                self.pool
                    .spawn(async move { local.set(&key, &value, Some(ttl), Some(&data_type)) }),
            ));
        }

        if let Some(remote) = &self.remote {
            let remote = Arc::clone(remote);
            let (key, value, data_type) = (full_key.to_string(), value.to_vec(), data_type.to_string());
            tasks.push((
                CacheTier::Remote,
                self.pool.spawn(async move {
                    remote.set(&key, &value, Some(ttl), Some(&data_type)).await
                }),
            ));
        }

        let deadline = tokio::time::Instant::now() + self.config.write_timeout;
        let mut ok = !tasks.is_empty();

        for (tier, task) in tasks {
            let Some(task) = task else {
                warn!(tier = tier.as_str(), key = full_key, "Worker pool closed, write skipped");
                ok = false;
                continue;
            };

            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    warn!(tier = tier.as_str(), key = full_key, "Hybrid write failed on one tier");
                    ok = false;
                }
                Ok(Err(e)) => {
                    error!(tier = tier.as_str(), key = full_key, error = %e, "Hybrid write task failed");
                    ok = false;
                }
                Err(_) => {
                    warn!(
                        tier = tier.as_str(),
                        key = full_key,
                        timeout_ms = self.config.write_timeout.as_millis() as u64,
                        "Hybrid write did not complete in time"
                    );
                    ok = false;
                }
            }
        }
        ok
    }

    /// 读取并反序列化 JSON
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str, data_type: &str) -> Option<T> {
        let bytes = self.get(key, data_type).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, data_type, error = %e, "Failed to deserialize cached value");
                self.metrics.record_error(Some(data_type));
                None
            }
        }
    }

    /// 序列化为 JSON 后写入
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        data_type: &str,
        ttl: Option<i64>,
    ) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, &bytes, data_type, ttl).await,
            Err(e) => {
                error!(key, data_type, error = %e, "Failed to serialize value for cache");
                self.metrics.record_error(Some(data_type));
                false
            }
        }
    }

    /// 从所有层删除，任一层删除成功即返回 true
    pub async fn delete(&self, key: &str, data_type: &str) -> bool {
        let full_key = self.full_key(key, data_type);

        let mut removed = false;
        if let Some(local) = &self.local {
            removed |= local.delete(&full_key, Some(data_type));
        }
        if let Some(remote) = &self.remote {
            removed |= remote.delete(&full_key, Some(data_type)).await;
        }

        if removed {
            self.metrics.record_delete(Some(data_type));
        }
        removed
    }

    /// 任一层存在即返回 true
    pub async fn exists(&self, key: &str, data_type: &str) -> bool {
        let full_key = self.full_key(key, data_type);

        if self.local.as_ref().is_some_and(|l| l.exists(&full_key)) {
            return true;
        }
        match &self.remote {
            Some(remote) => remote.exists(&full_key).await,
            None => false,
        }
    }

    /// 清空；给定数据类型时只清空该类型
    pub async fn clear(&self, data_type: Option<&str>) {
        let prefix = data_type.map(|dt| self.strategy.read().type_prefix(dt));

        if let Some(local) = &self.local {
            local.clear(prefix.as_deref());
        }
        if let Some(remote) = &self.remote {
            remote.clear(prefix.as_deref()).await;
        }
        info!(data_type = data_type.unwrap_or("*"), "Cache cleared");
    }

    /// 统计信息
    pub fn stats(&self) -> CoordinatorStats {
        let local = self.local.as_ref().map(|l| l.metrics());
        let remote = self.remote.as_ref().map(|r| r.metrics());
        let combined = MetricsSnapshot::merged(local.iter().chain(remote.iter()));

        CoordinatorStats {
            mode: self.mode,
            configured_mode: self.config.mode,
            strategy_count: self.strategy.read().strategy_count(),
            local_info: self.local.as_ref().map(|l| l.info()),
            local,
            remote,
            combined,
            coordinator: self.metrics.snapshot(),
            pending_tasks: self.pool.in_flight(),
        }
    }

    /// 对每一层做一次写 / 读 / 删探测
    pub async fn health_check(&self) -> HealthReport {
        let mut result = AggregatedHealthResult::new();

        if let Some(local) = &self.local {
            result.add_component(CacheTier::Local.as_str(), self.probe(&**local).await);
        }
        if let Some(remote) = &self.remote {
            result.add_component(CacheTier::Remote.as_str(), self.probe(&**remote).await);
        }

        let report = HealthReport::from(result);
        if report.overall != HealthState::Healthy {
            warn!(overall = %report.overall, "Cache health check not healthy");
        }
        report
    }

    async fn probe(&self, store: &dyn CacheStore) -> BaseHealthResult {
        let started = Instant::now();
        let key = format!("health_check_{}", store.tier().as_str());

        let check = async {
            if !store.ping().await {
                return Err("ping failed");
            }
            if !store.set(&key, PROBE_VALUE, Some(PROBE_TTL), None).await {
                return Err("probe write failed");
            }
            let read = store.get(&key, None).await;
            store.delete(&key, None).await;
            if read.as_deref() == Some(PROBE_VALUE) {
                Ok(())
            } else {
                Err("probe read mismatch")
            }
        };

        match tokio::time::timeout(self.config.write_timeout, check).await {
            Ok(Ok(())) => BaseHealthResult::healthy(started.elapsed().as_millis() as u64),
            Ok(Err(reason)) => BaseHealthResult::unhealthy(reason),
            Err(_) => BaseHealthResult::timeout(),
        }
    }

    /// 关闭：等待工作池排空后释放两层资源，可重复调用
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.pool.shutdown(self.config.write_timeout).await;
        if let Some(local) = &self.local {
            local.close();
        }
        if let Some(remote) = &self.remote {
            remote.close().await;
        }
        info!("Cache coordinator closed");
    }
}
