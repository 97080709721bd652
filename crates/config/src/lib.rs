//! mdcache-config - 配置加载库
//!
//! 合并 `default.toml`、`<APP_ENV>.toml` 和 `MDCACHE_` 前缀的环境变量，
//! 加载后统一校验一次

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use mdcache_ports::{CacheMode, EvictionPolicy};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 环境变量前缀，嵌套字段用 `__` 分隔，例如 `MDCACHE_CACHE__MAX_SIZE`
pub const ENV_PREFIX: &str = "MDCACHE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 远程缓存（Redis）配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<Secret<String>>,
    pub operation_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// 启动时连接重试次数
    pub connect_attempts: u32,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
            operation_timeout_secs: 5,
            connect_timeout_secs: 5,
            connect_attempts: 3,
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub mode: CacheMode,
    pub namespace: String,
    pub max_size: usize,
    /// 默认 TTL（秒），≤ 0 表示不过期
    pub default_ttl: i64,
    pub eviction_policy: EvictionPolicy,
    pub enable_compression: bool,
    pub compression_threshold_bytes: usize,
    pub enable_stats: bool,
    pub sweep_interval_secs: u64,
    pub worker_count: usize,
    pub write_timeout_secs: u64,
    pub remote: RemoteSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            mode: CacheMode::Hybrid,
            namespace: "easyxt".to_string(),
            max_size: 1000,
            default_ttl: 300,
            eviction_policy: EvictionPolicy::Lru,
            enable_compression: false,
            compression_threshold_bytes: 1024,
            enable_stats: true,
            sweep_interval_secs: 30,
            worker_count: 4,
            write_timeout_secs: 5,
            remote: RemoteSettings::default(),
        }
    }
}

/// 容错配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultToleranceSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: u32,
    pub max_error_history: usize,
    pub error_retention_hours: u64,
    pub max_recovery_attempts: u32,
    pub recovery_logging: bool,
}

impl Default for FaultToleranceSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            success_threshold: 3,
            max_error_history: 1000,
            error_retention_hours: 24,
            max_recovery_attempts: 3,
            recovery_logging: true,
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// 输出 JSON 格式日志
    pub json_logs: bool,
    /// 安装 Prometheus 指标记录器
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub fault_tolerance: FaultToleranceSettings,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_app_name() -> String {
    "mdcache".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 配置来源：目录下的 TOML 文件加环境变量，缺失的文件会被忽略
    pub fn figment(config_dir: &str) -> Figment {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        Figment::new()
            .merge(Serialized::default("app_env", &env))
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(config_dir))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cache = &self.cache;
        let ft = &self.fault_tolerance;

        let checks = [
            (cache.max_size > 0, "cache.max_size must be greater than 0"),
            (!cache.namespace.is_empty(), "cache.namespace must not be empty"),
            (
                !cache.enable_compression || cache.compression_threshold_bytes > 0,
                "cache.compression_threshold_bytes must be greater than 0",
            ),
            (cache.worker_count > 0, "cache.worker_count must be greater than 0"),
            (cache.write_timeout_secs > 0, "cache.write_timeout_secs must be greater than 0"),
            (
                cache.default_ttl <= 0 || cache.sweep_interval_secs > 0,
                "cache.sweep_interval_secs must be greater than 0",
            ),
            (!cache.remote.host.is_empty(), "cache.remote.host must not be empty"),
            (cache.remote.db >= 0, "cache.remote.db must not be negative"),
            (
                cache.remote.operation_timeout_secs > 0,
                "cache.remote.operation_timeout_secs must be greater than 0",
            ),
            (ft.failure_threshold >= 1, "fault_tolerance.failure_threshold must be at least 1"),
            (ft.success_threshold >= 1, "fault_tolerance.success_threshold must be at least 1"),
            (
                ft.max_error_history > 0,
                "fault_tolerance.max_error_history must be greater than 0",
            ),
        ];

        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, reason)) => Err(ConfigError::Invalid((*reason).to_string())),
            None => Ok(()),
        }
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults_without_files() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let config = AppConfig::load(".").expect("defaults");
            assert_eq!(config.app_name, "mdcache");
            assert!(config.is_development());
            assert_eq!(config.cache.mode, CacheMode::Hybrid);
            assert_eq!(config.cache.max_size, 1000);
            assert_eq!(config.cache.default_ttl, 300);
            assert_eq!(config.cache.remote.port, 6379);
            assert_eq!(config.fault_tolerance, FaultToleranceSettings::default());
            Ok(())
        });
    }

    #[test]
    fn test_env_file_overrides_default_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "default.toml",
                r#"
                app_name = "quotes"

                [cache]
                mode = "memory"
                max_size = 200
                eviction_policy = "lfu"
                "#,
            )?;
            jail.create_file(
                "production.toml",
                r#"
                [cache]
                max_size = 5000

                [cache.remote]
                host = "redis.internal"
                password = "s3cret"
                "#,
            )?;
            jail.set_env("APP_ENV", "production");

            let config = AppConfig::load(".").expect("config");
            assert_eq!(config.app_name, "quotes");
            assert!(config.is_production());
            assert_eq!(config.cache.mode, CacheMode::Local);
            assert_eq!(config.cache.eviction_policy, EvictionPolicy::Lfu);
            assert_eq!(config.cache.max_size, 5000);
            assert_eq!(config.cache.remote.host, "redis.internal");
            let password = config.cache.remote.password.as_ref().expect("password");
            assert_eq!(password.expose_secret(), "s3cret");
            assert!(!format!("{:?}", config.cache.remote).contains("s3cret"));
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_overrides_files() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("default.toml", "[fault_tolerance]\nfailure_threshold = 5\n")?;
            jail.set_env("MDCACHE_FAULT_TOLERANCE__FAILURE_THRESHOLD", "2");
            jail.set_env("MDCACHE_CACHE__MODE", "redis");
            jail.set_env("MDCACHE_CACHE__REMOTE__PORT", "6380");

            let config = AppConfig::load(".").expect("config");
            assert_eq!(config.fault_tolerance.failure_threshold, 2);
            assert_eq!(config.cache.mode, CacheMode::Remote);
            assert_eq!(config.cache.remote.port, 6380);
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("default.toml", "[cache]\nmax_size = 0\n")?;
            let err = AppConfig::load(".").unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("max_size")));

            jail.create_file("default.toml", "[fault_tolerance]\nsuccess_threshold = 0\n")?;
            let err = AppConfig::load(".").unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("success_threshold")));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_eviction_policy_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("default.toml", "[cache]\neviction_policy = \"random\"\n")?;
            assert!(matches!(AppConfig::load("."), Err(ConfigError::Load(_))));
            Ok(())
        });
    }
}
