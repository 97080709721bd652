//! Redis 连接管理

use std::time::Duration;

use mdcache_errors::{AppError, AppResult};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};

/// 创建 Redis 连接管理器，超过 `connect_timeout` 视为失败
pub async fn create_connection_manager(
    url: &str,
    connect_timeout: Duration,
) -> AppResult<ConnectionManager> {
    let client = Client::open(url)
        .map_err(|e| AppError::config(format!("Failed to create Redis client: {}", e)))?;

    match tokio::time::timeout(connect_timeout, ConnectionManager::new(client)).await {
        Ok(Ok(manager)) => Ok(manager),
        Ok(Err(e)) => Err(classify("connect", e)),
        Err(_) => Err(AppError::timeout(format!(
            "Redis connect timed out after {}ms",
            connect_timeout.as_millis()
        ))),
    }
}

/// 把 Redis 错误归入应用错误类别；连接类与超时类错误会触发重连
pub fn classify(op: &str, e: RedisError) -> AppError {
    if e.is_timeout() {
        AppError::timeout(format!("Redis {} timed out: {}", op, e))
    } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        AppError::connection(format!("Redis {} failed: {}", op, e))
    } else {
        AppError::storage(format!("Redis {} failed: {}", op, e))
    }
}
