//! 恢复引擎
//!
//! 按顺序匹配恢复规则，带指数退避地执行动作；首个成功的动作标记记录已解决。
//! 未解决的 high / critical 故障通过 `Escalation` 交还调用方

use std::collections::{BTreeMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mdcache_common::{BackoffPolicy, SharedClock};
use mdcache_errors::{AppError, AppResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::breaker::{CircuitBreakerRegistry, CircuitState, FailureOutcome};
use crate::classifier::{FaultClassifier, FaultContext};
use crate::config::FaultToleranceConfig;
use crate::record::{Category, ErrorRecord, Severity};

/// 上下文中的标记：该故障已经计入来源的断路器
pub const BREAKER_RECORDED: &str = "breaker_recorded";

/// 恢复策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    CircuitBreaker,
    GracefulDegradation,
    Restart,
    Ignore,
    Escalate,
}

/// 恢复动作
///
/// `Ok(Some(_))` 表示恢复成功，`Ok(None)` 表示本次未能恢复，`Err` 表示动作本身失败
#[async_trait]
pub trait RecoveryAction: Send + Sync {
    async fn run(&self, record: &ErrorRecord) -> AppResult<Option<Value>>;
}

/// 由同步闭包实现的恢复动作
pub struct FnAction<F>(F);

#[async_trait]
impl<F> RecoveryAction for FnAction<F>
where
    F: Fn(&ErrorRecord) -> AppResult<Option<Value>> + Send + Sync,
{
    async fn run(&self, record: &ErrorRecord) -> AppResult<Option<Value>> {
        (self.0)(record)
    }
}

pub fn action_fn<F>(f: F) -> Arc<dyn RecoveryAction>
where
    F: Fn(&ErrorRecord) -> AppResult<Option<Value>> + Send + Sync + 'static,
{
    Arc::new(FnAction(f))
}

pub type RulePredicate = Arc<dyn Fn(&ErrorRecord) -> bool + Send + Sync>;
pub type ErrorListener = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;
pub type RecoveryListener = Arc<dyn Fn(&ErrorRecord, &Value) + Send + Sync>;

/// 恢复规则
#[derive(Clone)]
pub struct RecoveryRule {
    pub name: String,
    pub strategy: RecoveryStrategy,
    pub predicate: RulePredicate,
    pub action: Arc<dyn RecoveryAction>,
    pub backoff: BackoffPolicy,
    pub enabled: bool,
}

impl fmt::Debug for RecoveryRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryRule")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("backoff", &self.backoff)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl RecoveryRule {
    pub fn new<P>(
        name: impl Into<String>,
        strategy: RecoveryStrategy,
        predicate: P,
        action: Arc<dyn RecoveryAction>,
    ) -> Self
    where
        P: Fn(&ErrorRecord) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            strategy,
            predicate: Arc::new(predicate),
            action,
            backoff: BackoffPolicy::default(),
            enabled: true,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn matches(&self, record: &ErrorRecord) -> bool {
        self.enabled && (self.predicate)(record)
    }
}

/// 断路器恢复动作：把故障计入来源的断路器，本身从不解决故障
struct BreakerAction {
    breakers: Arc<CircuitBreakerRegistry>,
}

#[async_trait]
impl RecoveryAction for BreakerAction {
    async fn run(&self, record: &ErrorRecord) -> AppResult<Option<Value>> {
        let source = record.breaker_source();
        match self.breakers.record_failure(source) {
            FailureOutcome::Refused => Err(AppError::circuit_open(source)),
            FailureOutcome::Recorded(state) => {
                debug!(source, state = state.as_str(), "Timeout recorded on circuit breaker");
                Ok(None)
            }
        }
    }
}

/// 内置规则：网络重试、API 降级、超时断路
pub fn builtin_rules(breakers: Arc<CircuitBreakerRegistry>) -> Vec<RecoveryRule> {
    vec![
        RecoveryRule::new(
            "network_retry",
            RecoveryStrategy::Retry,
            |r| r.category == Category::Network,
            action_fn(|_| Ok(Some(Value::Bool(true)))),
        )
        .with_backoff(BackoffPolicy::new(
            3,
            Duration::from_secs(1),
            Duration::from_secs(30),
        )),
        RecoveryRule::new(
            "api_fallback",
            RecoveryStrategy::Fallback,
            |r| r.category == Category::Api && r.severity >= Severity::High,
            action_fn(|_| Ok(Some(json!({ "fallback": true, "message": "degraded response" })))),
        )
        .with_backoff(BackoffPolicy::once()),
        RecoveryRule::new(
            "timeout_circuit_breaker",
            RecoveryStrategy::CircuitBreaker,
            |r| r.category == Category::Timeout && !r.context.contains_key(BREAKER_RECORDED),
            Arc::new(BreakerAction { breakers }),
        )
        .with_backoff(BackoffPolicy::once()),
    ]
}

/// 未解决的严重故障，携带记录和原始错误
#[derive(Debug)]
pub struct Escalation<E> {
    pub record: ErrorRecord,
    pub fault: E,
}

impl<E> Escalation<E> {
    pub fn into_fault(self) -> E {
        self.fault
    }
}

impl<E: fmt::Display> fmt::Display for Escalation<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unresolved {} {} fault from '{}': {}",
            self.record.severity,
            self.record.category,
            self.record.breaker_source(),
            self.fault
        )
    }
}

impl<E> Error for Escalation<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.fault)
    }
}

/// 错误列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct ErrorFilter {
    pub severity: Option<Severity>,
    pub category: Option<Category>,
    pub resolved: Option<bool>,
    pub within: Option<Duration>,
}

impl ErrorFilter {
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
        self
    }

    pub fn within(mut self, window: Duration) -> Self {
        self.within = Some(window);
        self
    }

    fn accepts(&self, record: &ErrorRecord, cutoff: Option<DateTime<Utc>>) -> bool {
        self.severity.is_none_or(|s| record.severity == s)
            && self.category.is_none_or(|c| record.category == c)
            && self.resolved.is_none_or(|r| record.resolved == r)
            && cutoff.is_none_or(|at| record.timestamp >= at)
    }
}

/// 错误统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub resolved_errors: usize,
    pub unresolved_errors: usize,
    pub resolution_rate: f64,
    pub severity_distribution: BTreeMap<String, usize>,
    pub category_distribution: BTreeMap<String, usize>,
    pub recent_24h_errors: usize,
    pub circuit_breakers: BTreeMap<String, CircuitState>,
}

/// 导出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// 带缩进的 JSON 数组
    Json,
    /// 每行一条记录
    JsonLines,
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonl" | "jsonlines" => Ok(Self::JsonLines),
            other => Err(AppError::validation(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

/// `now - duration`，溢出时返回 None（不设下限）
fn cutoff(now: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
}

/// 恢复引擎
pub struct RecoveryEngine {
    config: FaultToleranceConfig,
    clock: SharedClock,
    classifier: FaultClassifier,
    breakers: Arc<CircuitBreakerRegistry>,
    rules: RwLock<Vec<RecoveryRule>>,
    history: Mutex<VecDeque<ErrorRecord>>,
    error_listeners: RwLock<Vec<ErrorListener>>,
    recovery_listeners: RwLock<Vec<RecoveryListener>>,
}

impl fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("config", &self.config)
            .field("rules", &self.rule_names())
            .field("history", &self.history.lock().len())
            .finish_non_exhaustive()
    }
}

impl RecoveryEngine {
    /// 创建引擎并装入内置规则
    pub fn new(config: FaultToleranceConfig, clock: SharedClock) -> Self {
        let engine = Self::without_builtin_rules(config, clock);
        *engine.rules.write() = builtin_rules(engine.breakers.clone());
        engine
    }

    /// 创建不带任何规则的引擎
    pub fn without_builtin_rules(config: FaultToleranceConfig, clock: SharedClock) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker(), clock.clone()));
        let classifier = FaultClassifier::new(clock.clone(), config.max_recovery_attempts);
        Self {
            config,
            clock,
            classifier,
            breakers,
            rules: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            error_listeners: RwLock::new(Vec::new()),
            recovery_listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &FaultToleranceConfig {
        &self.config
    }

    pub fn classifier(&self) -> &FaultClassifier {
        &self.classifier
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// 追加规则，排在已有规则之后
    pub fn add_rule(&self, rule: RecoveryRule) {
        info!(rule = %rule.name, strategy = ?rule.strategy, "Recovery rule added");
        self.rules.write().push(rule);
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.name != name);
        before != rules.len()
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.read().iter().map(|r| r.name.clone()).collect()
    }

    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&ErrorRecord) + Send + Sync + 'static,
    {
        self.error_listeners.write().push(Arc::new(listener));
    }

    pub fn on_recovery<F>(&self, listener: F)
    where
        F: Fn(&ErrorRecord, &Value) + Send + Sync + 'static,
    {
        self.recovery_listeners.write().push(Arc::new(listener));
    }

    /// 处理故障
    ///
    /// 生成记录、按严重程度记日志、通知监听器、尝试恢复并写入历史。
    /// 严重程度 ≥ high 且未解决时返回 `Escalation`
    pub async fn handle<E>(&self, fault: E, ctx: FaultContext) -> Result<ErrorRecord, Escalation<E>>
    where
        E: Error + Send + Sync + 'static,
    {
        let mut record = self.classifier.classify(&fault, ctx);
        self.log_fault(&record);
        metrics::counter!(
            "mdcache_faults_total",
            "category" => record.category.as_str(),
            "severity" => record.severity.as_str()
        )
        .increment(1);

        let listeners = self.error_listeners.read().clone();
        for listener in &listeners {
            listener(&record);
        }

        self.attempt_recovery(&mut record).await;
        self.remember(record.clone());

        if record.should_escalate() {
            Err(Escalation { record, fault })
        } else {
            Ok(record)
        }
    }

    /// 记录来源的一次成功调用
    pub fn record_success(&self, source: &str) {
        self.breakers.record_success(source);
    }

    fn log_fault(&self, record: &ErrorRecord) {
        let source = record.breaker_source();
        match record.severity {
            Severity::Low => info!(
                id = %record.id, source, category = %record.category,
                fault_type = %record.fault_type, "{}", record.message
            ),
            Severity::Medium => warn!(
                id = %record.id, source, category = %record.category,
                fault_type = %record.fault_type, "{}", record.message
            ),
            Severity::High => error!(
                id = %record.id, source, category = %record.category,
                fault_type = %record.fault_type, "{}", record.message
            ),
            Severity::Critical => error!(
                id = %record.id, source, category = %record.category,
                fault_type = %record.fault_type, critical = true, "{}", record.message
            ),
        }
    }

    async fn attempt_recovery(&self, record: &mut ErrorRecord) {
        let rules: Vec<RecoveryRule> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.matches(record))
            .cloned()
            .collect();

        for rule in rules {
            if let Some(result) = self.run_rule(&rule, record).await {
                record.resolve(self.clock.now());
                metrics::counter!("mdcache_recoveries_total", "rule" => rule.name.clone())
                    .increment(1);
                let listeners = self.recovery_listeners.read().clone();
                for listener in &listeners {
                    listener(record, &result);
                }
                return;
            }
        }
    }

    async fn run_rule(&self, rule: &RecoveryRule, record: &mut ErrorRecord) -> Option<Value> {
        let attempts = rule.backoff.max_attempts.min(record.max_recovery_attempts);

        for attempt in 0..attempts {
            record.recovery_attempts += 1;
            if self.config.recovery_logging {
                info!(
                    rule = %rule.name,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    "Running recovery action"
                );
            }

            match rule.action.run(record).await {
                Ok(Some(result)) => {
                    info!(rule = %rule.name, id = %record.id, "Recovery action succeeded");
                    return Some(result);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    rule = %rule.name,
                    attempt = attempt + 1,
                    error = %e,
                    "Recovery action failed"
                ),
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(rule.backoff.delay_for_attempt(attempt)).await;
            }
        }
        None
    }

    /// 写入历史，按条数和保留时长裁剪
    fn remember(&self, record: ErrorRecord) {
        let oldest = cutoff(self.clock.now(), self.config.error_retention);
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.config.max_error_history {
            history.pop_front();
        }
        if let Some(oldest) = oldest {
            history.retain(|r| r.timestamp >= oldest);
        }
    }

    pub fn list_errors(&self, filter: &ErrorFilter) -> Vec<ErrorRecord> {
        let since = filter.within.and_then(|w| cutoff(self.clock.now(), w));
        self.history
            .lock()
            .iter()
            .filter(|r| filter.accepts(r, since))
            .cloned()
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.history.lock().len()
    }

    pub fn statistics(&self) -> ErrorStatistics {
        let recent_cutoff = self.clock.now() - TimeDelta::hours(24);
        let history = self.history.lock();

        let total = history.len();
        let resolved = history.iter().filter(|r| r.resolved).count();
        let severity_distribution = Severity::ALL
            .iter()
            .map(|s| {
                let n = history.iter().filter(|r| r.severity == *s).count();
                (s.as_str().to_string(), n)
            })
            .collect();
        let category_distribution = Category::ALL
            .iter()
            .map(|c| {
                let n = history.iter().filter(|r| r.category == *c).count();
                (c.as_str().to_string(), n)
            })
            .collect();
        let recent = history
            .iter()
            .filter(|r| r.timestamp >= recent_cutoff)
            .count();
        drop(history);

        ErrorStatistics {
            total_errors: total,
            resolved_errors: resolved,
            unresolved_errors: total - resolved,
            resolution_rate: if total == 0 {
                0.0
            } else {
                resolved as f64 / total as f64
            },
            severity_distribution,
            category_distribution,
            recent_24h_errors: recent,
            circuit_breakers: self.breakers.states(),
        }
    }

    /// 清理历史；`resolved_only` 时只移除已解决的记录
    pub fn clear_errors(&self, resolved_only: bool) -> usize {
        let mut history = self.history.lock();
        let before = history.len();
        if resolved_only {
            history.retain(|r| !r.resolved);
        } else {
            history.clear();
        }
        before - history.len()
    }

    /// 导出错误历史，返回导出条数
    pub fn export(&self, path: impl AsRef<Path>, format: ExportFormat) -> AppResult<usize> {
        let records: Vec<ErrorRecord> = self.history.lock().iter().cloned().collect();
        let mut writer = BufWriter::new(File::create(path.as_ref())?);

        match format {
            ExportFormat::Json => serde_json::to_writer_pretty(&mut writer, &records)?,
            ExportFormat::JsonLines => {
                for record in &records {
                    serde_json::to_writer(&mut writer, record)?;
                    writer.write_all(b"\n")?;
                }
            }
        }
        writer.flush()?;

        info!(
            path = %path.as_ref().display(),
            count = records.len(),
            "Error history exported"
        );
        Ok(records.len())
    }
}
