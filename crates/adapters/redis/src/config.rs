//! 远程缓存配置

use std::time::Duration;

use mdcache_common::CompressionConfig;
use secrecy::{ExposeSecret, Secret};

/// 物理过期时间相对逻辑 TTL 的余量（秒）
pub const DEFAULT_GRACE_SECONDS: i64 = 60;

/// 远程缓存配置
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub host: String,
    pub port: u16,
    /// 数据库索引
    pub db: i64,
    pub password: Option<Secret<String>>,
    /// 默认 TTL（秒）
    pub default_ttl: i64,
    pub compression: CompressionConfig,
    /// 物理过期余量（秒）
    pub grace_seconds: i64,
    /// 单次操作超时
    pub operation_timeout: Duration,
    /// 建立连接超时
    pub connect_timeout: Duration,
    pub enable_stats: bool,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
            default_ttl: 300,
            compression: CompressionConfig::default(),
            grace_seconds: DEFAULT_GRACE_SECONDS,
            operation_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            enable_stats: true,
        }
    }
}

impl RemoteStoreConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// 设置数据库索引
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// 设置密码
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    pub fn with_default_ttl(mut self, ttl: i64) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// 设置操作超时
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.enable_stats = enabled;
        self
    }

    /// 连接 URL，密码经过 URL 编码
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) if !password.expose_secret().is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                urlencoding::encode(password.expose_secret()),
                self.host,
                self.port,
                self.db
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// 用于日志的地址，不含密码
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }

    /// 远程存储自身的过期时间；ttl <= 0 时不设置
    pub fn physical_ttl(&self, ttl: i64) -> Option<i64> {
        (ttl > 0).then(|| ttl.saturating_add(self.grace_seconds))
    }
}
