//! 健康检查结果聚合

use std::fmt;

use serde::{Deserialize, Serialize};

/// 整体健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// 单次探测结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseHealthResult {
    /// 是否健康
    pub healthy: bool,
    /// 延迟（毫秒）
    pub latency_ms: Option<u64>,
    /// 错误信息
    pub error: Option<String>,
}

impl BaseHealthResult {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms: None,
            error: Some(error.into()),
        }
    }

    pub fn timeout() -> Self {
        Self::unhealthy("Health check timed out")
    }
}

/// 组件健康状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// 多组件聚合结果
///
/// 全部组件失败为 unhealthy，部分失败为 degraded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedHealthResult {
    pub components: Vec<ComponentHealth>,
}

impl AggregatedHealthResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(&mut self, name: impl Into<String>, result: BaseHealthResult) {
        self.components.push(ComponentHealth {
            name: name.into(),
            healthy: result.healthy,
            latency_ms: result.latency_ms,
            error: result.error,
        });
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn healthy_count(&self) -> usize {
        self.components.iter().filter(|c| c.healthy).count()
    }

    pub fn total_count(&self) -> usize {
        self.components.len()
    }

    /// 整体状态；没有任何组件时视为 unhealthy
    pub fn overall(&self) -> HealthState {
        let healthy = self.healthy_count();
        if healthy == 0 {
            HealthState::Unhealthy
        } else if healthy < self.total_count() {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }
}
