//! Cache trait 定义

use async_trait::async_trait;
use mdcache_common::MetricsSnapshot;
use serde::{Deserialize, Serialize};

/// 缓存层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Local,
    Remote,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// 缓存存储 trait
///
/// 所有操作都不向调用方抛出错误：内部故障只体现为 `None` / `false`，
/// 并计入该层的错误指标
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// 所属层级
    fn tier(&self) -> CacheTier;

    /// 获取缓存值（已解压）
    async fn get(&self, key: &str, data_type: Option<&str>) -> Option<Vec<u8>>;

    /// 设置缓存值；`ttl = None` 使用默认 TTL，`ttl <= 0` 表示永不过期
    async fn set(&self, key: &str, value: &[u8], ttl: Option<i64>, data_type: Option<&str>)
    -> bool;

    /// 删除缓存，键存在时返回 true
    async fn delete(&self, key: &str, data_type: Option<&str>) -> bool;

    /// 检查是否存在（过期视为不存在）
    async fn exists(&self, key: &str) -> bool;

    /// 清空缓存；`prefix` 为 None 时清空全部
    async fn clear(&self, prefix: Option<&str>);

    /// 当前条目数
    async fn size(&self) -> usize;

    /// 连通性检查
    async fn ping(&self) -> bool {
        true
    }

    /// 指标快照
    fn metrics(&self) -> MetricsSnapshot;

    /// 释放资源
    async fn close(&self);
}

/// 缓存模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// 仅进程内缓存
    #[default]
    #[serde(alias = "memory")]
    Local,
    /// 仅远程缓存
    #[serde(alias = "redis")]
    Remote,
    /// 进程内 + 远程
    Hybrid,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn uses_local(&self) -> bool {
        matches!(self, Self::Local | Self::Hybrid)
    }

    pub fn uses_remote(&self) -> bool {
        matches!(self, Self::Remote | Self::Hybrid)
    }
}

/// 淘汰策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// 最近最少使用
    #[default]
    Lru,
    /// 最少使用频率
    Lfu,
    /// 先进先出
    Fifo,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Fifo => "fifo",
        }
    }
}
