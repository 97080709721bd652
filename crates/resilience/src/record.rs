//! 错误记录

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use mdcache_common::ErrorId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 默认最大恢复次数
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// 严重程度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// high / critical 且未解决的故障需要上抛
    pub fn escalates(&self) -> bool {
        *self >= Self::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 故障类别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Network,
    Storage,
    Api,
    System,
    Data,
    Auth,
    Permission,
    Validation,
    Timeout,
    Resource,
    #[default]
    Unknown,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Self::Network,
        Self::Storage,
        Self::Api,
        Self::System,
        Self::Data,
        Self::Auth,
        Self::Permission,
        Self::Validation,
        Self::Timeout,
        Self::Resource,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Api => "api",
            Self::System => "system",
            Self::Data => "data",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Resource => "resource",
            Self::Unknown => "unknown",
        }
    }

    /// 从字符串解析，未知的值归为 Unknown
    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 错误记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: ErrorId,
    pub timestamp: DateTime<Utc>,
    /// 故障类型名
    pub fault_type: String,
    pub message: String,
    pub severity: Severity,
    pub category: Category,
    pub context: BTreeMap<String, Value>,
    /// 故障来源（上游数据源名等）
    pub source: String,
    pub resolved: bool,
    pub resolution_time: Option<DateTime<Utc>>,
    pub recovery_attempts: u32,
    pub max_recovery_attempts: u32,
}

impl ErrorRecord {
    pub fn new(fault_type: impl Into<String>, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: ErrorId::new(),
            timestamp: at,
            fault_type: fault_type.into(),
            message: message.into(),
            severity: Severity::default(),
            category: Category::default(),
            context: BTreeMap::new(),
            source: String::new(),
            resolved: false,
            resolution_time: None,
            recovery_attempts: 0,
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
        }
    }

    /// 标记为已解决
    pub fn resolve(&mut self, at: DateTime<Utc>) {
        self.resolved = true;
        self.resolution_time = Some(at);
    }

    /// 需要向调用方上抛
    pub fn should_escalate(&self) -> bool {
        self.severity.escalates() && !self.resolved
    }

    /// 断路器使用的来源名，为空时归入 default
    pub fn breaker_source(&self) -> &str {
        if self.source.is_empty() {
            "default"
        } else {
            &self.source
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_and_escalation() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(!Severity::Medium.escalates());
        assert!(Severity::High.escalates());
    }

    #[test]
    fn test_category_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), category);
        }
        assert_eq!(Category::parse("database"), Category::Unknown);
        assert_eq!(serde_json::to_string(&Category::Api).unwrap(), "\"api\"");
    }

    #[test]
    fn test_record_defaults() {
        let mut record = ErrorRecord::new("Timeout", "upstream timed out", Utc::now());
        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(record.category, Category::Unknown);
        assert_eq!(record.max_recovery_attempts, 3);
        assert_eq!(record.breaker_source(), "default");

        record.severity = Severity::High;
        assert!(record.should_escalate());
        record.resolve(Utc::now());
        assert!(!record.should_escalate());
        assert!(record.resolution_time.is_some());
    }
}
