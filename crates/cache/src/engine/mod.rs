//! 淘汰引擎
//!
//! 三种策略实现同一个 `EvictionEngine` trait，由 `LocalStore` 在构造时选定。
//! 引擎本身不做并发控制，调用方负责加锁

mod fifo;
mod lfu;
mod lru;

pub use fifo::FifoEngine;
pub use lfu::LfuEngine;
pub use lru::LruEngine;

use std::fmt;

use mdcache_ports::EvictionPolicy;

use crate::entry::CacheEntry;

/// 淘汰引擎 trait
pub trait EvictionEngine: Send + fmt::Debug {
    /// 引擎对应的策略
    fn policy(&self) -> EvictionPolicy;

    /// 读取条目，并按策略更新其新近度 / 频率
    fn get(&mut self, key: &str) -> Option<&mut CacheEntry>;

    /// 只读查看，不影响淘汰顺序
    fn peek(&self, key: &str) -> Option<&CacheEntry>;

    /// 插入或替换条目；超出容量时返回被淘汰的那一个
    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry>;

    /// 删除条目
    fn remove(&mut self, key: &str) -> Option<CacheEntry>;

    fn clear(&mut self);

    fn keys(&self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}

/// 按策略创建引擎
pub fn build_engine(policy: EvictionPolicy, capacity: usize) -> Box<dyn EvictionEngine> {
    let capacity = capacity.max(1);
    match policy {
        EvictionPolicy::Lru => Box::new(LruEngine::new(capacity)),
        EvictionPolicy::Lfu => Box::new(LfuEngine::new(capacity)),
        EvictionPolicy::Fifo => Box::new(FifoEngine::new(capacity)),
    }
}

#[cfg(test)]
pub(crate) fn entry(key: &str) -> CacheEntry {
    CacheEntry::new(key, key.as_bytes().to_vec(), false, 0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [EvictionPolicy; 3] = [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Fifo];

    #[test]
    fn test_shared_contract() {
        for policy in ALL {
            let mut engine = build_engine(policy, 3);
            assert_eq!(engine.policy(), policy);
            assert!(engine.is_empty());

            assert!(engine.insert(entry("a")).is_none());
            assert!(engine.insert(entry("b")).is_none());
            assert_eq!(engine.len(), 2);
            assert_eq!(engine.get("a").map(|e| e.value.clone()), Some(b"a".to_vec()));
            assert!(engine.get("zzz").is_none());

            // 替换不会触发淘汰
            let mut replacement = entry("a");
            replacement.value = b"a2".to_vec();
            assert!(engine.insert(replacement).is_none());
            assert_eq!(engine.len(), 2);
            assert_eq!(engine.peek("a").map(|e| e.value.clone()), Some(b"a2".to_vec()));

            assert!(engine.remove("a").is_some());
            assert!(engine.remove("a").is_none());
            assert_eq!(engine.len(), 1);

            engine.clear();
            assert!(engine.is_empty());
            assert!(engine.keys().is_empty());
        }
    }

    #[test]
    fn test_never_exceeds_capacity() {
        for policy in ALL {
            let mut engine = build_engine(policy, 4);
            let mut evicted = 0;
            for i in 0..50 {
                if engine.insert(entry(&format!("k{i}"))).is_some() {
                    evicted += 1;
                }
                if i % 3 == 0 {
                    engine.get(&format!("k{}", i / 2));
                }
                assert!(engine.len() <= 4);
            }
            assert_eq!(evicted, 46);
            assert_eq!(engine.capacity(), 4);
        }
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut engine = build_engine(EvictionPolicy::Lru, 0);
        assert_eq!(engine.capacity(), 1);
        engine.insert(entry("a"));
        let victim = engine.insert(entry("b")).unwrap();
        assert_eq!(victim.key, "a");
    }
}
