//! 服务端信息

use redis::InfoDict;
use serde::Serialize;

use mdcache_common::MetricsSnapshot;

/// INFO 命令中关心的字段
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoteServerInfo {
    pub redis_version: Option<String>,
    pub used_memory: Option<u64>,
    pub used_memory_human: Option<String>,
    pub connected_clients: Option<u64>,
    pub total_commands_processed: Option<u64>,
    pub keyspace_hits: Option<u64>,
    pub keyspace_misses: Option<u64>,
    pub uptime_in_seconds: Option<u64>,
}

impl RemoteServerInfo {
    pub fn from_dict(info: &InfoDict) -> Self {
        Self {
            redis_version: info.get("redis_version"),
            used_memory: info.get("used_memory"),
            used_memory_human: info.get("used_memory_human"),
            connected_clients: info.get("connected_clients"),
            total_commands_processed: info.get("total_commands_processed"),
            keyspace_hits: info.get("keyspace_hits"),
            keyspace_misses: info.get("keyspace_misses"),
            uptime_in_seconds: info.get("uptime_in_seconds"),
        }
    }

    /// 服务端命中率
    pub fn keyspace_hit_rate(&self) -> Option<f64> {
        let hits = self.keyspace_hits?;
        let total = hits + self.keyspace_misses?;
        (total > 0).then(|| hits as f64 / total as f64)
    }
}

/// 远程存储统计
#[derive(Debug, Clone, Serialize)]
pub struct RemoteStats {
    pub endpoint: String,
    pub default_ttl: i64,
    pub compression_enabled: bool,
    pub connected: bool,
    pub metrics: MetricsSnapshot,
    pub server: Option<RemoteServerInfo>,
}
