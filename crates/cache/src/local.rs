//! 进程内缓存存储
//!
//! 所有对淘汰引擎的访问都由同一把互斥锁串行化（读操作也会修改新近度 / 频率），
//! 压缩与解压在锁外完成。后台清理任务由存储实例持有，构造时启动，`close()` 时停止

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdcache_common::{CacheMetrics, MetricsSnapshot, SharedClock, decode};
use mdcache_ports::{CacheStore, CacheTier, EvictionPolicy};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LocalStoreConfig;
use crate::engine::{EvictionEngine, build_engine};
use crate::entry::CacheEntry;

enum Lookup {
    Missing,
    Expired,
    Found(Vec<u8>, bool),
}

#[derive(Debug)]
struct LocalInner {
    engine: Mutex<Box<dyn EvictionEngine>>,
    config: LocalStoreConfig,
    metrics: CacheMetrics,
    clock: SharedClock,
}

impl LocalInner {
    fn sweep_expired(&self) -> usize {
        let now = self.clock.unix_seconds();
        let removed = {
            let mut engine = self.engine.lock();
            let expired: Vec<String> = engine
                .keys()
                .into_iter()
                .filter(|key| engine.peek(key).is_some_and(|e| e.is_expired(now)))
                .collect();
            for key in &expired {
                engine.remove(key);
            }
            expired.len()
        };

        for _ in 0..removed {
            self.metrics.record_eviction(None);
        }
        if removed > 0 {
            debug!(removed, "Swept expired local cache entries");
        }
        removed
    }
}

/// 进程内缓存存储的描述信息
#[derive(Debug, Clone, Serialize)]
pub struct LocalStoreInfo {
    pub eviction_policy: EvictionPolicy,
    pub max_size: usize,
    pub current_size: usize,
    pub default_ttl: i64,
    pub compression_enabled: bool,
}

/// 进程内缓存存储
#[derive(Debug)]
pub struct LocalStore {
    inner: Arc<LocalInner>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl LocalStore {
    /// 创建存储；`default_ttl > 0` 且处于 tokio 运行时中时启动后台清理
    pub fn new(config: LocalStoreConfig, clock: SharedClock) -> Self {
        let engine = build_engine(config.eviction_policy, config.max_size);
        let metrics = CacheMetrics::new(CacheTier::Local.as_str()).with_enabled(config.enable_stats);
        let inner = Arc::new(LocalInner {
            engine: Mutex::new(engine),
            config,
            metrics,
            clock,
        });

        let store = Self {
            inner,
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        };

        if store.inner.config.default_ttl > 0 {
            store.start_sweeper();
        }

        info!(
            policy = store.inner.config.eviction_policy.as_str(),
            max_size = store.inner.config.max_size,
            default_ttl = store.inner.config.default_ttl,
            "Local cache store created"
        );
        store
    }

    fn start_sweeper(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, local cache sweep disabled");
            return;
        };

        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.clone();
        let period = self.inner.config.sweep_interval.max(Duration::from_millis(1));

        let task = handle.spawn(async move {
            debug!(interval_ms = period.as_millis() as u64, "Local cache sweep started");
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即返回
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.sweep_expired();
                    }
                    _ = shutdown.cancelled() => {
                        break;
                    }
                }
            }
            debug!("Local cache sweep stopped");
        });

        *self.sweeper.lock() = Some(task);
    }

    /// 后台清理是否在运行
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn config(&self) -> &LocalStoreConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.inner.config.eviction_policy
    }

    fn now(&self) -> f64 {
        self.inner.clock.unix_seconds()
    }

    /// 读取；过期条目在此处被删除并记为未命中
    pub fn get(&self, key: &str, data_type: Option<&str>) -> Option<Vec<u8>> {
        let now = self.now();
        let lookup = {
            let mut engine = self.inner.engine.lock();
            let expired = engine.peek(key).map(|e| e.is_expired(now));
            match expired {
                None => Lookup::Missing,
                Some(true) => {
                    engine.remove(key);
                    Lookup::Expired
                }
                Some(false) => match engine.get(key) {
                    Some(entry) => {
                        entry.touch(now);
                        Lookup::Found(entry.value.clone(), entry.compressed)
                    }
                    None => Lookup::Missing,
                },
            }
        };

        match lookup {
            Lookup::Missing => {
                self.inner.metrics.record_miss(data_type);
                None
            }
            Lookup::Expired => {
                debug!(key, "Local cache entry expired");
                self.inner.metrics.record_miss(data_type);
                None
            }
            Lookup::Found(bytes, compressed) => match decode(&bytes, compressed) {
                Ok(value) => {
                    self.inner.metrics.record_hit(data_type);
                    Some(value)
                }
                Err(e) => {
                    error!(key, error = %e, "Failed to decode local cache entry");
                    self.inner.metrics.record_error(data_type);
                    None
                }
            },
        }
    }

    /// 写入；`ttl` 为空时使用默认 TTL
    pub fn set(&self, key: &str, value: &[u8], ttl: Option<i64>, data_type: Option<&str>) -> bool {
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        let encoded = match self.inner.config.compression.encode(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(key, error = %e, "Failed to encode local cache value");
                self.inner.metrics.record_error(data_type);
                return false;
            }
        };

        let entry = CacheEntry::new(key, encoded.bytes, encoded.compressed, ttl, self.now());
        let victim = self.inner.engine.lock().insert(entry);

        if let Some(victim) = victim {
            debug!(key = %victim.key, "Local cache entry evicted");
            self.inner.metrics.record_eviction(data_type);
        }
        self.inner.metrics.record_set(data_type);
        true
    }

    pub fn delete(&self, key: &str, data_type: Option<&str>) -> bool {
        let removed = self.inner.engine.lock().remove(key).is_some();
        if removed {
            self.inner.metrics.record_delete(data_type);
        }
        removed
    }

    pub fn exists(&self, key: &str) -> bool {
        let now = self.now();
        let mut engine = self.inner.engine.lock();
        let expired = engine.peek(key).map(|e| e.is_expired(now));
        match expired {
            None => false,
            Some(true) => {
                engine.remove(key);
                false
            }
            Some(false) => true,
        }
    }

    /// 清空；给定前缀时只删除匹配的键
    pub fn clear(&self, prefix: Option<&str>) {
        let mut engine = self.inner.engine.lock();
        match prefix {
            None => {
                engine.clear();
                info!("Local cache cleared");
            }
            Some(prefix) => {
                let matched: Vec<String> = engine
                    .keys()
                    .into_iter()
                    .filter(|key| key.starts_with(prefix))
                    .collect();
                for key in &matched {
                    engine.remove(key);
                }
                info!(prefix, removed = matched.len(), "Local cache cleared by prefix");
            }
        }
    }

    pub fn size(&self) -> usize {
        self.inner.engine.lock().len()
    }

    /// 立即清理所有已过期条目，返回删除数量
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    pub fn info(&self) -> LocalStoreInfo {
        LocalStoreInfo {
            eviction_policy: self.inner.config.eviction_policy,
            max_size: self.inner.config.max_size,
            current_size: self.size(),
            default_ttl: self.inner.config.default_ttl,
            compression_enabled: self.inner.config.compression.enabled,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }

    /// 停止后台清理
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        // 任务会在下一次调度时退出
        self.sweeper.lock().take();
        info!("Local cache store closed");
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    fn tier(&self) -> CacheTier {
        CacheTier::Local
    }

    async fn get(&self, key: &str, data_type: Option<&str>) -> Option<Vec<u8>> {
        LocalStore::get(self, key, data_type)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<i64>, data_type: Option<&str>) -> bool {
        LocalStore::set(self, key, value, ttl, data_type)
    }

    async fn delete(&self, key: &str, data_type: Option<&str>) -> bool {
        LocalStore::delete(self, key, data_type)
    }

    async fn exists(&self, key: &str) -> bool {
        LocalStore::exists(self, key)
    }

    async fn clear(&self, prefix: Option<&str>) {
        LocalStore::clear(self, prefix)
    }

    async fn size(&self) -> usize {
        LocalStore::size(self)
    }

    fn metrics(&self) -> MetricsSnapshot {
        LocalStore::metrics(self)
    }

    async fn close(&self) {
        LocalStore::close(self)
    }
}
