//! mdcache-resilience - 容错层
//!
//! 故障分类、按来源的断路器、可插拔的恢复规则

pub mod breaker;
pub mod classifier;
pub mod config;
pub mod guard;
pub mod record;
pub mod recovery;

pub use breaker::*;
pub use classifier::*;
pub use config::*;
pub use guard::*;
pub use record::*;
pub use recovery::*;
