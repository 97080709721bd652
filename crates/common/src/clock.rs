//! 时钟抽象
//!
//! 所有 TTL、断路器超时和错误保留窗口都通过 `Clock` 读取时间，
//! 测试中用 `ManualClock` 模拟时间推进

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// 时钟 trait
pub trait Clock: Send + Sync + fmt::Debug {
    /// 当前时间
    fn now(&self) -> DateTime<Utc>;

    /// 当前 Unix 时间戳（秒，带小数）
    fn unix_seconds(&self) -> f64 {
        self.now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// 共享时钟
pub type SharedClock = Arc<dyn Clock>;

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 创建系统时钟
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// 手动推进的时钟
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// 从当前系统时间开始
    pub fn starting_now() -> Arc<Self> {
        Arc::new(Self::new(Utc::now()))
    }

    /// 推进时间
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    /// 设置绝对时间
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::starting_now();
        let before = clock.unix_seconds();
        clock.advance(Duration::from_millis(1500));
        let after = clock.unix_seconds();
        assert!((after - before - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = system_clock();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
