//! 缓存策略
//!
//! 数据类型到策略（TTL、容量、优先级）的映射，以及规范化缓存键的构造

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// 默认键命名空间
pub const DEFAULT_NAMESPACE: &str = "easyxt";

/// 默认单值大小上限（1 MiB）
pub const DEFAULT_MAX_DATA_SIZE: usize = 1024 * 1024;

/// 缓存优先级，`None` 表示不缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
    None,
}

/// 单个数据类型的缓存策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// TTL（秒）
    pub ttl: i64,
    /// 建议容量
    pub max_size: usize,
    pub priority: Priority,
    /// 单值大小上限（字节）
    #[serde(default = "default_max_data_size")]
    pub max_data_size: usize,
}

fn default_max_data_size() -> usize {
    DEFAULT_MAX_DATA_SIZE
}

impl CachePolicy {
    pub fn new(ttl: i64, max_size: usize, priority: Priority) -> Self {
        Self {
            ttl,
            max_size,
            priority,
            max_data_size: DEFAULT_MAX_DATA_SIZE,
        }
    }

    pub fn with_max_data_size(mut self, bytes: usize) -> Self {
        self.max_data_size = bytes;
        self
    }
}

/// 内置策略
fn builtin_policy(data_type: &str) -> Option<CachePolicy> {
    let policy = match data_type {
        // 实时行情
        "realtime_quotes" => CachePolicy::new(5, 500, Priority::High),
        // 热门股票
        "hot_stocks" => CachePolicy::new(60, 100, Priority::Medium),
        // 概念板块
        "concept_data" => CachePolicy::new(300, 200, Priority::Medium),
        // 市场状态
        "market_status" => CachePolicy::new(10, 10, Priority::Low),
        // 数据源状态
        "source_status" => CachePolicy::new(30, 50, Priority::Low),
        // 历史数据
        "historical_data" => CachePolicy::new(3600, 1000, Priority::Low),
        _ => return None,
    };
    Some(policy)
}

const BUILTIN_COUNT: usize = 6;

/// 缓存策略管理器
#[derive(Debug, Clone)]
pub struct CacheStrategy {
    namespace: String,
    default_ttl: i64,
    custom: HashMap<String, CachePolicy>,
}

impl CacheStrategy {
    pub fn new(default_ttl: i64) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_ttl,
            custom: HashMap::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 解析数据类型的策略：自定义 > 内置 > 默认
    pub fn resolve(&self, data_type: &str) -> CachePolicy {
        self.custom
            .get(data_type)
            .cloned()
            .or_else(|| builtin_policy(data_type))
            .unwrap_or_else(|| CachePolicy::new(self.default_ttl, 100, Priority::Medium))
    }

    /// 注册自定义策略，覆盖同名内置策略
    pub fn register(&mut self, data_type: impl Into<String>, policy: CachePolicy) {
        self.custom.insert(data_type.into(), policy);
    }

    pub fn ttl_for(&self, data_type: &str) -> i64 {
        self.resolve(data_type).ttl
    }

    pub fn priority_for(&self, data_type: &str) -> Priority {
        self.resolve(data_type).priority
    }

    /// 已知数据类型的数量，覆盖内置策略的自定义策略不重复计数
    pub fn strategy_count(&self) -> usize {
        let added = self
            .custom
            .keys()
            .filter(|data_type| builtin_policy(data_type).is_none())
            .count();
        BUILTIN_COUNT + added
    }

    /// 构造缓存键：`<namespace>:<data_type>:<hash8>`
    ///
    /// 参数先按键排序序列化，因此与参数的插入顺序无关
    pub fn build_key(&self, data_type: &str, params: &Value) -> String {
        let mut canonical = String::new();
        write_canonical(params, &mut canonical);
        let digest = Sha256::digest(canonical.as_bytes());
        let hash = hex::encode(digest);
        format!("{}:{}:{}", self.namespace, data_type, &hash[..8])
    }

    /// 协调器使用的单键形式 `{"key": key}`
    pub fn key_for(&self, data_type: &str, key: &str) -> String {
        self.build_key(data_type, &serde_json::json!({ "key": key }))
    }

    /// 某数据类型所有键的公共前缀
    pub fn type_prefix(&self, data_type: &str) -> String {
        format!("{}:{}:", self.namespace, data_type)
    }

    /// 判断是否应该缓存
    pub fn should_cache(&self, data_type: &str, value_size_bytes: usize) -> bool {
        let policy = self.resolve(data_type);
        value_size_bytes <= policy.max_data_size && policy.priority != Priority::None
    }
}

impl Default for CacheStrategy {
    fn default() -> Self {
        Self::new(300)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
