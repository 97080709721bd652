//! 缓存指标统计
//!
//! 计数器均为原子操作，可被多个调用方和后台清理任务并发更新

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// 缓存事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEvent {
    Hit,
    Miss,
    Set,
    Delete,
    Eviction,
    Error,
}

impl CacheEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Eviction => "eviction",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn slot(&self, event: CacheEvent) -> &AtomicU64 {
        match event {
            CacheEvent::Hit => &self.hits,
            CacheEvent::Miss => &self.misses,
            CacheEvent::Set => &self.sets,
            CacheEvent::Delete => &self.deletes,
            CacheEvent::Eviction => &self.evictions,
            CacheEvent::Error => &self.errors,
        }
    }

    fn incr(&self, event: CacheEvent) {
        self.slot(event).fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for slot in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.evictions,
            &self.errors,
        ] {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub errors: u64,
}

impl CounterSnapshot {
    /// 命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// 累加另一个快照
    pub fn absorb(&mut self, other: &CounterSnapshot) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.sets += other.sets;
        self.deletes += other.deletes;
        self.evictions += other.evictions;
        self.errors += other.errors;
    }
}

/// 指标快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total: CounterSnapshot,
    pub hit_rate: f64,
    pub by_type: BTreeMap<String, CounterSnapshot>,
}

impl MetricsSnapshot {
    /// 合并多个快照
    pub fn merged<'a>(snapshots: impl IntoIterator<Item = &'a MetricsSnapshot>) -> Self {
        let mut merged = MetricsSnapshot::default();
        for snapshot in snapshots {
            merged.total.absorb(&snapshot.total);
            for (data_type, counters) in &snapshot.by_type {
                merged
                    .by_type
                    .entry(data_type.clone())
                    .or_default()
                    .absorb(counters);
            }
        }
        merged.hit_rate = merged.total.hit_rate();
        merged
    }
}

/// 缓存指标
///
/// 全局计数和按数据类型计数同时维护；`enabled = false` 时所有记录都是空操作
#[derive(Debug)]
pub struct CacheMetrics {
    tier: &'static str,
    enabled: bool,
    total: Counters,
    by_type: RwLock<HashMap<String, Arc<Counters>>>,
}

impl CacheMetrics {
    pub fn new(tier: &'static str) -> Self {
        Self {
            tier,
            enabled: true,
            total: Counters::default(),
            by_type: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn tier(&self) -> &'static str {
        self.tier
    }

    /// 记录一次事件
    pub fn record(&self, event: CacheEvent, data_type: Option<&str>) {
        if !self.enabled {
            return;
        }

        self.total.incr(event);
        if let Some(data_type) = data_type {
            self.type_counters(data_type).incr(event);
        }

        ::metrics::counter!(
            "mdcache_cache_events_total",
            "tier" => self.tier,
            "event" => event.as_str()
        )
        .increment(1);
    }

    pub fn record_hit(&self, data_type: Option<&str>) {
        self.record(CacheEvent::Hit, data_type);
    }

    pub fn record_miss(&self, data_type: Option<&str>) {
        self.record(CacheEvent::Miss, data_type);
    }

    pub fn record_set(&self, data_type: Option<&str>) {
        self.record(CacheEvent::Set, data_type);
    }

    pub fn record_delete(&self, data_type: Option<&str>) {
        self.record(CacheEvent::Delete, data_type);
    }

    pub fn record_eviction(&self, data_type: Option<&str>) {
        self.record(CacheEvent::Eviction, data_type);
    }

    pub fn record_error(&self, data_type: Option<&str>) {
        self.record(CacheEvent::Error, data_type);
    }

    fn type_counters(&self, data_type: &str) -> Arc<Counters> {
        if let Some(counters) = self.by_type.read().get(data_type) {
            return Arc::clone(counters);
        }
        let mut by_type = self.by_type.write();
        Arc::clone(by_type.entry(data_type.to_string()).or_default())
    }

    /// 获取快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.snapshot();
        let by_type = self
            .by_type
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect();
        MetricsSnapshot {
            hit_rate: total.hit_rate(),
            total,
            by_type,
        }
    }

    /// 重置所有计数
    pub fn reset(&self) {
        self.total.reset();
        self.by_type.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_global_and_per_type() {
        let metrics = CacheMetrics::new("local");
        metrics.record_hit(Some("realtime_quotes"));
        metrics.record_hit(Some("realtime_quotes"));
        metrics.record_miss(Some("hot_stocks"));
        metrics.record_eviction(None);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total.hits, 2);
        assert_eq!(snapshot.total.misses, 1);
        assert_eq!(snapshot.total.evictions, 1);
        assert_eq!(snapshot.by_type["realtime_quotes"].hits, 2);
        assert_eq!(snapshot.by_type["hot_stocks"].misses, 1);
        assert!((snapshot.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_metrics_record_nothing() {
        let metrics = CacheMetrics::new("local").with_enabled(false);
        metrics.record_set(Some("x"));
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_reset_is_explicit() {
        let metrics = CacheMetrics::new("remote");
        metrics.record_error(Some("x"));
        assert_eq!(metrics.snapshot().total.errors, 1);
        metrics.reset();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total.errors, 0);
        assert!(snapshot.by_type.is_empty());
    }

    #[test]
    fn test_merge_snapshots() {
        let local = CacheMetrics::new("local");
        let remote = CacheMetrics::new("remote");
        local.record_hit(Some("a"));
        remote.record_miss(Some("a"));
        remote.record_hit(Some("b"));

        let merged = MetricsSnapshot::merged([&local.snapshot(), &remote.snapshot()]);
        assert_eq!(merged.total.hits, 2);
        assert_eq!(merged.total.misses, 1);
        assert_eq!(merged.by_type["a"].hits, 1);
        assert_eq!(merged.by_type["a"].misses, 1);
        assert_eq!(merged.by_type["b"].hits, 1);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(CacheMetrics::new("local"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_set(Some("t"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().total.sets, 8000);
        assert_eq!(metrics.snapshot().by_type["t"].sets, 8000);
    }
}
