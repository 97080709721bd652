//! mdcache-common - 通用类型和工具库

pub mod clock;
pub mod codec;
pub mod health;
pub mod retry;
pub mod stats;
pub mod types;

pub use clock::*;
pub use codec::*;
pub use health::*;
pub use retry::*;
pub use stats::*;
pub use types::*;
