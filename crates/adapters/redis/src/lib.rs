//! mdcache-adapter-redis - Redis 远程缓存适配器

mod config;
mod connection;
mod info;
mod record;
mod store;

pub use config::*;
pub use connection::*;
pub use info::*;
pub use record::*;
pub use store::*;
