//! mdcache-cache - 多级缓存
//!
//! 进程内存储（LRU / LFU / FIFO 淘汰）、缓存策略与多级协调器

mod config;
mod coordinator;
mod entry;
pub mod engine;
mod local;
mod pool;
mod strategy;

pub use config::*;
pub use coordinator::*;
pub use entry::*;
pub use local::*;
pub use pool::*;
pub use strategy::*;

pub use mdcache_ports::{CacheMode, CacheStore, CacheTier, EvictionPolicy};
