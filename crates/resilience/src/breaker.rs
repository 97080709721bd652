//! 按来源划分的断路器
//!
//! Closed -> Open -> HalfOpen 状态转换，每个来源一把锁

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mdcache_common::SharedClock;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 断路器状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

/// 单个来源的断路器状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
}

/// `record_failure` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// 断路器处于打开状态且未到探测时间，请求被拒绝
    Refused,
    /// 失败已记录，附带记录后的状态
    Recorded(CircuitState),
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn cooled_down(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_time.is_none_or(|at| now >= at)
    }

    fn half_open(&mut self, source: &str) {
        self.state = CircuitState::HalfOpen;
        self.success_count = 0;
        info!(source, "Circuit breaker transitioned to HALF_OPEN");
    }

    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_time: self.last_failure_time,
            next_attempt_time: self.next_attempt_time,
        }
    }
}

/// 断路器注册表，按来源懒创建
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    clock: SharedClock,
    breakers: RwLock<HashMap<String, Arc<Mutex<BreakerState>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn existing(&self, source: &str) -> Option<Arc<Mutex<BreakerState>>> {
        self.breakers.read().get(source).cloned()
    }

    fn get_or_create(&self, source: &str) -> Arc<Mutex<BreakerState>> {
        if let Some(breaker) = self.existing(source) {
            return breaker;
        }
        self.breakers
            .write()
            .entry(source.to_string())
            .or_default()
            .clone()
    }

    fn recovery_timeout(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.recovery_timeout).unwrap_or(TimeDelta::MAX)
    }

    /// 是否允许调用该来源
    ///
    /// 打开状态下冷却时间已过则转为半开并放行
    pub fn allow(&self, source: &str) -> bool {
        let Some(breaker) = self.existing(source) else {
            return true;
        };
        let mut state = breaker.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if state.cooled_down(self.clock.now()) {
                    state.half_open(source);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// 记录一次失败
    pub fn record_failure(&self, source: &str) -> FailureOutcome {
        let breaker = self.get_or_create(source);
        let now = self.clock.now();
        let mut state = breaker.lock();

        if state.state == CircuitState::Open {
            if !state.cooled_down(now) {
                return FailureOutcome::Refused;
            }
            state.half_open(source);
        }

        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_time = Some(now);

        let trip = state.state == CircuitState::HalfOpen
            || state.failure_count >= self.config.failure_threshold;
        if trip {
            let from = state.state;
            state.state = CircuitState::Open;
            state.success_count = 0;
            state.next_attempt_time = now.checked_add_signed(self.recovery_timeout());
            warn!(
                source,
                from = from.as_str(),
                failure_count = state.failure_count,
                "Circuit breaker transitioned to OPEN"
            );
        }

        FailureOutcome::Recorded(state.state)
    }

    /// 记录一次成功，只作用于已存在的断路器
    pub fn record_success(&self, source: &str) {
        let Some(breaker) = self.existing(source) else {
            return;
        };
        let mut state = breaker.lock();

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.next_attempt_time = None;
                    info!(source, "Circuit breaker transitioned to CLOSED");
                }
            }
            CircuitState::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self, source: &str) -> Option<CircuitState> {
        self.existing(source).map(|b| b.lock().state)
    }

    pub fn snapshot(&self, source: &str) -> Option<BreakerSnapshot> {
        self.existing(source).map(|b| b.lock().snapshot())
    }

    /// 所有来源的当前状态
    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        self.breakers
            .read()
            .iter()
            .map(|(source, breaker)| (source.clone(), breaker.lock().state))
            .collect()
    }

    /// 重置（删除）某个来源的断路器
    pub fn reset(&self, source: &str) -> bool {
        self.breakers.write().remove(source).is_some()
    }
}
