//! mdcache-bootstrap - 服务上下文
//!
//! 配置加载、遥测初始化和组件装配

mod context;
mod settings;

pub use context::*;
pub use settings::*;
