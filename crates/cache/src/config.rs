//! 缓存配置
//!
//! 进程内存储与协调器的类型化配置，原始配置文件到这些结构体的转换在 bootstrap 中完成

use std::time::Duration;

use mdcache_common::CompressionConfig;
use mdcache_ports::{CacheMode, EvictionPolicy};

use crate::strategy::DEFAULT_NAMESPACE;

/// 默认 TTL（秒）
pub const DEFAULT_TTL_SECONDS: i64 = 300;
/// 默认容量
pub const DEFAULT_MAX_SIZE: usize = 1000;
/// 默认后台清理间隔
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// 默认工作池大小
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// 进程内存储配置
#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    /// 最大条目数
    pub max_size: usize,
    /// 默认 TTL（秒），<= 0 表示永不过期
    pub default_ttl: i64,
    /// 淘汰策略
    pub eviction_policy: EvictionPolicy,
    /// 压缩配置
    pub compression: CompressionConfig,
    /// 后台清理间隔
    pub sweep_interval: Duration,
    /// 是否记录统计
    pub enable_stats: bool,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_ttl: DEFAULT_TTL_SECONDS,
            eviction_policy: EvictionPolicy::default(),
            compression: CompressionConfig::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            enable_stats: true,
        }
    }
}

impl LocalStoreConfig {
    pub fn new(max_size: usize, default_ttl: i64) -> Self {
        Self {
            max_size,
            default_ttl,
            ..Default::default()
        }
    }

    /// 设置淘汰策略
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// 设置压缩
    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// 设置清理间隔
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.enable_stats = enabled;
        self
    }
}

/// 协调器配置
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// 缓存模式
    pub mode: CacheMode,
    /// 键命名空间
    pub namespace: String,
    /// 本地层配置
    pub local: LocalStoreConfig,
    /// 后台工作池大小
    pub worker_count: usize,
    /// 混合模式双写的等待上限
    pub write_timeout: Duration,
    /// 超过该耗时的访问记为慢访问
    pub slow_access_threshold: Duration,
    /// 是否记录统计
    pub enable_stats: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            local: LocalStoreConfig::default(),
            worker_count: DEFAULT_WORKER_COUNT,
            write_timeout: Duration::from_secs(5),
            slow_access_threshold: Duration::from_millis(100),
            enable_stats: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(mode: CacheMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// 设置本地层配置
    pub fn with_local(mut self, local: LocalStoreConfig) -> Self {
        self.local = local;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.enable_stats = enabled;
        self
    }

    /// 默认 TTL 取自本地层配置
    pub fn default_ttl(&self) -> i64 {
        self.local.default_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.mode, CacheMode::Local);
        assert_eq!(config.namespace, "easyxt");
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.write_timeout, Duration::from_secs(5));
        assert_eq!(config.default_ttl(), 300);
        assert_eq!(config.local.sweep_interval, Duration::from_secs(30));
        assert!(!config.local.compression.enabled);
    }

    #[test]
    fn test_builders() {
        let local = LocalStoreConfig::new(10, 60)
            .with_eviction_policy(EvictionPolicy::Fifo)
            .with_compression(CompressionConfig::enabled(512));
        let config = CoordinatorConfig::new(CacheMode::Hybrid)
            .with_local(local)
            .with_worker_count(2);

        assert_eq!(config.local.max_size, 10);
        assert_eq!(config.local.eviction_policy, EvictionPolicy::Fifo);
        assert_eq!(config.local.compression.threshold_bytes, 512);
        assert_eq!(config.worker_count, 2);
    }
}
