//! ports - 抽象 trait 层
//!
//! 定义缓存层级的统一接口

mod cache;

pub use cache::*;
