//! 故障分类
//!
//! 调用方未给出类别时，先看是否为 `AppError`，再按错误信息推断

use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error;

use mdcache_common::{SharedClock, is_retryable_error, is_timeout_error};
use mdcache_errors::AppError;
use serde_json::Value;

use crate::record::{Category, ErrorRecord, Severity};

/// 处理故障时附带的上下文
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultContext {
    pub severity: Option<Severity>,
    pub category: Option<Category>,
    pub source: Option<String>,
    pub context: BTreeMap<String, Value>,
    pub max_recovery_attempts: Option<u32>,
}

impl FaultContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = Some(attempts);
        self
    }
}

const AUTH_PATTERNS: &[&str] = &["unauthorized", "authentication", "invalid token", "credential"];
const PERMISSION_PATTERNS: &[&str] = &["permission", "forbidden", "access denied"];
const DATA_PATTERNS: &[&str] = &["parse", "decode", "deserializ", "serializ", "malformed", "json"];
const RESOURCE_PATTERNS: &[&str] = &["out of memory", "disk full", "quota", "exhausted"];
const VALIDATION_PATTERNS: &[&str] = &["invalid", "validation", "out of range"];
const API_PATTERNS: &[&str] = &["status code", "http", "api", "rate limit"];

/// 按错误信息推断类别
pub fn infer_category(message: &str) -> Category {
    let lower = message.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if is_timeout_error(&lower) {
        Category::Timeout
    } else if matches(AUTH_PATTERNS) {
        Category::Auth
    } else if matches(PERMISSION_PATTERNS) {
        Category::Permission
    } else if is_retryable_error(&lower) {
        Category::Network
    } else if matches(DATA_PATTERNS) {
        Category::Data
    } else if matches(RESOURCE_PATTERNS) {
        Category::Resource
    } else if matches(VALIDATION_PATTERNS) {
        Category::Validation
    } else if matches(API_PATTERNS) {
        Category::Api
    } else {
        Category::Unknown
    }
}

/// 类型名的最后一段，去掉泛型参数
pub fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// 故障分类器
#[derive(Debug, Clone)]
pub struct FaultClassifier {
    clock: SharedClock,
    max_recovery_attempts: u32,
}

impl FaultClassifier {
    pub fn new(clock: SharedClock, max_recovery_attempts: u32) -> Self {
        Self {
            clock,
            max_recovery_attempts,
        }
    }

    /// 推断类别：`AppError` 使用自身的分类，其它错误按信息匹配
    pub fn category_of<E>(&self, fault: &E) -> Category
    where
        E: Error + 'static,
    {
        if let Some(app) = (fault as &dyn Any).downcast_ref::<AppError>() {
            return match Category::parse(app.kind()) {
                Category::Unknown => infer_category(&app.to_string()),
                category => category,
            };
        }
        infer_category(&fault.to_string())
    }

    /// 生成错误记录
    pub fn classify<E>(&self, fault: &E, ctx: FaultContext) -> ErrorRecord
    where
        E: Error + 'static,
    {
        let category = ctx.category.unwrap_or_else(|| self.category_of(fault));
        let mut record = ErrorRecord::new(
            short_type_name::<E>(),
            fault.to_string(),
            self.clock.now(),
        );
        record.severity = ctx.severity.unwrap_or_default();
        record.category = category;
        record.context = ctx.context;
        record.source = ctx.source.unwrap_or_default();
        record.max_recovery_attempts = ctx
            .max_recovery_attempts
            .unwrap_or(self.max_recovery_attempts);
        record
    }
}
