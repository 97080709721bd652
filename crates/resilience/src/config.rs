//! 容错层配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::record::DEFAULT_MAX_RECOVERY_ATTEMPTS;

/// 容错配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultToleranceConfig {
    /// 连续失败多少次后断开
    pub failure_threshold: u32,
    /// 断开后多久允许半开探测
    pub recovery_timeout: Duration,
    /// 半开状态下连续成功多少次后闭合
    pub success_threshold: u32,
    /// 错误历史最大条数
    pub max_error_history: usize,
    /// 错误历史保留时长
    pub error_retention: Duration,
    /// 每条错误记录允许的最大恢复次数
    pub max_recovery_attempts: u32,
    /// 是否记录恢复过程日志
    pub recovery_logging: bool,
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            max_error_history: 1000,
            error_retention: Duration::from_secs(24 * 3600),
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            recovery_logging: true,
        }
    }
}

impl FaultToleranceConfig {
    pub fn with_breaker(
        mut self,
        failure_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        self.failure_threshold = failure_threshold;
        self.recovery_timeout = recovery_timeout;
        self.success_threshold = success_threshold;
        self
    }

    pub fn with_history(mut self, max_error_history: usize, error_retention: Duration) -> Self {
        self.max_error_history = max_error_history;
        self.error_retention = error_retention;
        self
    }

    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = attempts;
        self
    }

    pub fn with_recovery_logging(mut self, enabled: bool) -> Self {
        self.recovery_logging = enabled;
        self
    }

    /// 断路器参数
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            recovery_timeout: self.recovery_timeout,
            success_threshold: self.success_threshold.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FaultToleranceConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.success_threshold, 3);
        assert_eq!(config.max_error_history, 1000);
        assert_eq!(config.error_retention, Duration::from_secs(86_400));
    }

    #[test]
    fn test_breaker_thresholds_never_zero() {
        let config = FaultToleranceConfig::default().with_breaker(0, Duration::from_secs(1), 0);
        let breaker = config.breaker();
        assert_eq!(breaker.failure_threshold, 1);
        assert_eq!(breaker.success_threshold, 1);
    }
}
