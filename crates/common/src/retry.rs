//! 指数退避重试
//!
//! `BackoffPolicy` 同时服务于连接重试和容错层的恢复动作

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 退避策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// 最大尝试次数（含第一次）
    pub max_attempts: u32,
    /// 初始延迟
    pub initial_delay: Duration,
    /// 单次延迟上限
    pub max_delay: Duration,
    /// 退避乘数
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// 不等待、只尝试一次
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// 第 `attempt` 次失败后（从 0 开始）应等待的时间，受 `max_delay` 限制
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// 常见的瞬时网络错误特征
pub const RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "connection aborted",
    "broken pipe",
    "temporarily unavailable",
    "too many connections",
    "server is busy",
    "network",
    "econnrefused",
    "econnreset",
    "no route to host",
    "eof",
];

/// 超时类错误特征
pub const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout", "etimedout", "deadline"];

/// 判断错误信息是否属于可重试的网络错误
pub fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();
    RETRYABLE_PATTERNS
        .iter()
        .chain(TIMEOUT_PATTERNS)
        .any(|pattern| error_lower.contains(pattern))
}

/// 判断错误信息是否属于超时
pub fn is_timeout_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();
    TIMEOUT_PATTERNS
        .iter()
        .any(|pattern| error_lower.contains(pattern))
}

/// 按退避策略重试，直到成功或次数耗尽
pub async fn with_retry<F, Fut, T, E>(
    policy: &BackoffPolicy,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(policy, operation_name, operation, |_| true).await
}

/// 只有 `should_retry` 返回 true 的错误才会重试
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &BackoffPolicy,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                let exhausted = attempt + 1 >= attempts;
                if exhausted || !should_retry(&e) {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        retryable = !exhausted,
                        error = %e,
                        "Operation failed, giving up"
                    );
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// 可选组件的重试：失败时返回 None 并继续
pub async fn with_retry_optional<F, Fut, T, E>(
    policy: &BackoffPolicy,
    operation_name: &str,
    operation: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match with_retry(policy, operation_name, operation).await {
        Ok(result) => Some(result),
        Err(e) => {
            warn!(
                operation = operation_name,
                error = %e,
                "Optional component unavailable after retries, continuing without it"
            );
            None
        }
    }
}
