//! LRU 引擎
//!
//! 每次访问分配一个递增序号，`order` 按序号排列，最小序号即最久未使用

use std::collections::{BTreeMap, HashMap};

use mdcache_ports::EvictionPolicy;

use super::EvictionEngine;
use crate::entry::CacheEntry;

#[derive(Debug)]
pub struct LruEngine {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (CacheEntry, u64)>,
    order: BTreeMap<u64, String>,
}

impl LruEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) -> Option<CacheEntry> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key).map(|(entry, _)| entry)
    }
}

impl EvictionEngine for LruEngine {
    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::Lru
    }

    fn get(&mut self, key: &str) -> Option<&mut CacheEntry> {
        let tick = self.next_tick();
        let (entry, stamp) = self.entries.get_mut(key)?;
        self.order.remove(&*stamp);
        *stamp = tick;
        self.order.insert(tick, key.to_string());
        Some(entry)
    }

    fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key).map(|(entry, _)| entry)
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let tick = self.next_tick();
        let key = entry.key.clone();

        if let Some((_, old_stamp)) = self.entries.remove(&key) {
            self.order.remove(&old_stamp);
            self.order.insert(tick, key.clone());
            self.entries.insert(key, (entry, tick));
            return None;
        }

        let victim = if self.entries.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };

        self.order.insert(tick, key.clone());
        self.entries.insert(key, (entry, tick));
        victim
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let (entry, stamp) = self.entries.remove(key)?;
        self.order.remove(&stamp);
        Some(entry)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn keys(&self) -> Vec<String> {
        self.order.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry;

    #[test]
    fn test_evicts_least_recently_touched() {
        let mut lru = LruEngine::new(3);
        lru.insert(entry("a"));
        lru.insert(entry("b"));
        lru.insert(entry("c"));

        // 访问顺序：a 最新，b 最旧
        lru.get("c");
        lru.get("a");

        let victim = lru.insert(entry("d")).unwrap();
        assert_eq!(victim.key, "b");
        assert_eq!(lru.keys(), vec!["c", "a", "d"]);
    }

    #[test]
    fn test_update_refreshes_recency() {
        let mut lru = LruEngine::new(2);
        lru.insert(entry("a"));
        lru.insert(entry("b"));
        lru.insert(entry("a"));

        let victim = lru.insert(entry("c")).unwrap();
        assert_eq!(victim.key, "b");
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let mut lru = LruEngine::new(2);
        lru.insert(entry("a"));
        lru.insert(entry("b"));
        assert!(lru.peek("a").is_some());

        let victim = lru.insert(entry("c")).unwrap();
        assert_eq!(victim.key, "a");
    }

    #[test]
    fn test_scripted_access_pattern() {
        let mut lru = LruEngine::new(4);
        for key in ["q1", "q2", "q3", "q4"] {
            lru.insert(entry(key));
        }
        for key in ["q1", "q3", "q2", "q1"] {
            lru.get(key);
        }
        // q4 从未被访问
        assert_eq!(lru.insert(entry("q5")).unwrap().key, "q4");
        // 其余顺序：q3, q2, q1, q5
        assert_eq!(lru.insert(entry("q6")).unwrap().key, "q3");
        assert_eq!(lru.insert(entry("q7")).unwrap().key, "q2");
    }
}
