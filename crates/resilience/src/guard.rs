//! 组合式保护
//!
//! 断路器准入 -> 调用 -> 记录成功 / 交给恢复引擎

use std::error::Error;
use std::fmt;
use std::future::Future;

use mdcache_common::{BackoffPolicy, retry_if};
use mdcache_errors::{AppError, AppResult};
use tracing::debug;

use crate::breaker::FailureOutcome;
use crate::classifier::FaultContext;
use crate::recovery::{BREAKER_RECORDED, Escalation, RecoveryEngine};

/// 受保护调用的失败
#[derive(Debug)]
pub enum GuardError<E> {
    /// 来源的断路器处于打开状态，调用未发出
    CircuitOpen(String),
    /// 未能恢复的严重故障
    Escalated(Escalation<E>),
}

impl<E> GuardError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }
}

impl<E: fmt::Display> fmt::Display for GuardError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen(source) => write!(f, "circuit open for source '{source}'"),
            Self::Escalated(escalation) => fmt::Display::fmt(escalation, f),
        }
    }
}

impl<E> Error for GuardError<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CircuitOpen(_) => None,
            Self::Escalated(escalation) => Some(escalation),
        }
    }
}

impl From<GuardError<AppError>> for AppError {
    fn from(err: GuardError<AppError>) -> Self {
        match err {
            GuardError::CircuitOpen(source) => AppError::circuit_open(source),
            GuardError::Escalated(escalation) => escalation.into_fault(),
        }
    }
}

/// 在断路器保护下调用某个来源
///
/// 成功返回 `Ok(Some(v))`；失败计入断路器并交给恢复引擎，
/// 被吞掉的故障返回 `Ok(None)`，需要上抛的返回 `GuardError::Escalated`
pub async fn call_guarded<F, Fut, T, E>(
    engine: &RecoveryEngine,
    source: &str,
    ctx: FaultContext,
    operation: F,
) -> Result<Option<T>, GuardError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + Send + Sync + 'static,
{
    let breakers = engine.breakers();
    if !breakers.allow(source) {
        debug!(source, "Call refused by open circuit breaker");
        metrics::counter!("mdcache_guard_refused_total", "source" => source.to_string())
            .increment(1);
        return Err(GuardError::CircuitOpen(source.to_string()));
    }

    match operation().await {
        Ok(value) => {
            engine.record_success(source);
            Ok(Some(value))
        }
        Err(fault) => {
            let outcome = breakers.record_failure(source);
            debug!(source, ?outcome, "Guarded call failed");
            let ctx = ctx
                .with_source(source)
                .with_context(BREAKER_RECORDED, matches!(outcome, FailureOutcome::Recorded(_)));
            match engine.handle(fault, ctx).await {
                Ok(_) => Ok(None),
                Err(escalation) => Err(GuardError::Escalated(escalation)),
            }
        }
    }
}

/// 只重试瞬时错误（连接、超时、资源不足）
pub async fn retry_transient<F, Fut, T>(
    policy: &BackoffPolicy,
    operation_name: &str,
    operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    retry_if(policy, operation_name, operation, AppError::is_transient).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use crate::config::FaultToleranceConfig;
    use crate::record::Severity;
    use mdcache_common::ManualClock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn engine(clock: Arc<ManualClock>) -> RecoveryEngine {
        let config = FaultToleranceConfig::default().with_breaker(3, Duration::from_secs(10), 2);
        RecoveryEngine::new(config, clock)
    }

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let engine = engine(ManualClock::starting_now());
        let value = call_guarded(&engine, "tdx", FaultContext::new(), || async {
            Ok::<_, AppError>(42)
        })
        .await
        .unwrap();
        assert_eq!(value, Some(42));
    }

    #[tokio::test]
    async fn test_breaker_opens_and_refuses_without_calling() {
        let clock = ManualClock::starting_now();
        let engine = engine(clock.clone());
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result = call_guarded(&engine, "tdx", FaultContext::new(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(AppError::timeout("quote request"))
            })
            .await;
            assert!(matches!(result, Ok(None)));
        }
        assert_eq!(engine.breakers().state("tdx"), Some(CircuitState::Open));
        // 超时已由守卫计入，不会再被断路规则重复计数
        assert_eq!(engine.breakers().snapshot("tdx").unwrap().failure_count, 3);

        let refused = {
            let calls = calls.clone();
            call_guarded(&engine, "tdx", FaultContext::new(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, AppError>(1)
            })
            .await
        };
        assert!(refused.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        clock.advance(Duration::from_secs(10));
        for _ in 0..2 {
            let value = call_guarded(&engine, "tdx", FaultContext::new(), || async {
                Ok::<u32, AppError>(7)
            })
            .await
            .unwrap();
            assert_eq!(value, Some(7));
        }
        assert_eq!(engine.breakers().state("tdx"), Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn test_high_severity_failure_escalates() {
        let engine = engine(ManualClock::starting_now());
        let err = call_guarded(
            &engine,
            "eastmoney",
            FaultContext::new().with_severity(Severity::High),
            || async { Err::<(), _>(AppError::storage("corrupt snapshot")) },
        )
        .await
        .unwrap_err();

        let GuardError::Escalated(escalation) = err else {
            panic!("expected escalation");
        };
        assert_eq!(escalation.record.source, "eastmoney");
        assert_eq!(escalation.record.context[BREAKER_RECORDED], true);
        assert!(matches!(AppError::from(GuardError::Escalated(escalation)), AppError::Storage(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_only_retries_transient_errors() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100));

        let calls = AtomicU32::new(0);
        let result = retry_transient(&policy, "load", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::connection("refused"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);

        let calls = AtomicU32::new(0);
        let result: AppResult<()> = retry_transient(&policy, "load", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::validation("bad symbol")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
