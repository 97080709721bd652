//! LFU 引擎
//!
//! 频率分桶：`buckets[f]` 保存访问频率为 f 的所有键，`min_freq` 随访问增量维护。
//! 同一桶内的淘汰顺序不作保证

use std::collections::{BTreeMap, HashMap, HashSet};

use mdcache_ports::EvictionPolicy;

use super::EvictionEngine;
use crate::entry::CacheEntry;

#[derive(Debug)]
pub struct LfuEngine {
    capacity: usize,
    entries: HashMap<String, (CacheEntry, u64)>,
    buckets: BTreeMap<u64, HashSet<String>>,
    min_freq: u64,
}

impl LfuEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            buckets: BTreeMap::new(),
            min_freq: 0,
        }
    }

    /// 某个键当前的访问频率
    pub fn frequency(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|(_, freq)| *freq)
    }

    /// 当前最小频率
    pub fn min_frequency(&self) -> Option<u64> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.min_freq)
        }
    }

    /// 当前最小频率桶中的键
    pub fn min_frequency_keys(&self) -> HashSet<String> {
        self.buckets.get(&self.min_freq).cloned().unwrap_or_default()
    }

    /// 从桶中摘除键，桶空时删除；返回该桶是否被清空
    fn detach(&mut self, key: &str, freq: u64) -> bool {
        let Some(bucket) = self.buckets.get_mut(&freq) else {
            return false;
        };
        bucket.remove(key);
        if bucket.is_empty() {
            self.buckets.remove(&freq);
            true
        } else {
            false
        }
    }

    fn bump(&mut self, key: &str) {
        let Some((_, freq)) = self.entries.get_mut(key) else {
            return;
        };
        let old = *freq;
        *freq = old + 1;

        if self.detach(key, old) && old == self.min_freq {
            self.min_freq = old + 1;
        }
        self.buckets.entry(old + 1).or_default().insert(key.to_string());
    }

    fn evict_min(&mut self) -> Option<CacheEntry> {
        if !self.buckets.contains_key(&self.min_freq) {
            self.min_freq = *self.buckets.keys().next()?;
        }
        let freq = self.min_freq;
        let victim = self.buckets.get(&freq)?.iter().next().cloned()?;
        self.detach(&victim, freq);
        self.entries.remove(&victim).map(|(entry, _)| entry)
    }
}

impl EvictionEngine for LfuEngine {
    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::Lfu
    }

    fn get(&mut self, key: &str) -> Option<&mut CacheEntry> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.bump(key);
        self.entries.get_mut(key).map(|(entry, _)| entry)
    }

    fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key).map(|(entry, _)| entry)
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let key = entry.key.clone();

        if let Some((slot, _)) = self.entries.get_mut(&key) {
            *slot = entry;
            self.bump(&key);
            return None;
        }

        let victim = if self.entries.len() >= self.capacity {
            self.evict_min()
        } else {
            None
        };

        self.entries.insert(key.clone(), (entry, 1));
        self.buckets.entry(1).or_default().insert(key);
        self.min_freq = 1;
        victim
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let (entry, freq) = self.entries.remove(key)?;
        if self.detach(key, freq) && freq == self.min_freq {
            self.min_freq = self.buckets.keys().next().copied().unwrap_or(0);
        }
        Some(entry)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.buckets.clear();
        self.min_freq = 0;
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
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
    fn test_evicts_lowest_frequency() {
        let mut lfu = LfuEngine::new(3);
        lfu.insert(entry("a"));
        lfu.insert(entry("b"));
        lfu.insert(entry("c"));
        lfu.get("a");
        lfu.get("a");
        lfu.get("b");

        assert_eq!(lfu.frequency("a"), Some(3));
        assert_eq!(lfu.frequency("b"), Some(2));
        assert_eq!(lfu.min_frequency(), Some(1));

        assert_eq!(lfu.insert(entry("d")).unwrap().key, "c");
        // d 是唯一频率为 1 的键
        assert_eq!(lfu.insert(entry("e")).unwrap().key, "d");
    }

    #[test]
    fn test_victim_is_drawn_from_min_bucket() {
        let mut lfu = LfuEngine::new(4);
        for key in ["a", "b", "c", "d"] {
            lfu.insert(entry(key));
        }
        lfu.get("c");
        lfu.get("d");

        let candidates = lfu.min_frequency_keys();
        assert_eq!(candidates.len(), 2);
        let victim = lfu.insert(entry("e")).unwrap();
        assert!(candidates.contains(&victim.key));
    }

    #[test]
    fn test_min_freq_moves_with_access() {
        let mut lfu = LfuEngine::new(2);
        lfu.insert(entry("a"));
        lfu.insert(entry("b"));
        lfu.get("a");
        lfu.get("b");
        assert_eq!(lfu.min_frequency(), Some(2));
        lfu.get("b");
        assert_eq!(lfu.min_frequency(), Some(2));
        assert_eq!(lfu.insert(entry("c")).unwrap().key, "a");
        assert_eq!(lfu.min_frequency(), Some(1));
    }

    #[test]
    fn test_remove_from_min_bucket_keeps_eviction_valid() {
        let mut lfu = LfuEngine::new(3);
        lfu.insert(entry("a"));
        lfu.insert(entry("b"));
        lfu.insert(entry("c"));
        for _ in 0..3 {
            lfu.get("b");
            lfu.get("c");
        }
        lfu.get("c");

        // 唯一的频率 1 桶被删空
        lfu.remove("a");
        assert_eq!(lfu.min_frequency(), Some(4));

        lfu.insert(entry("d"));
        lfu.get("d");
        lfu.get("d");
        lfu.get("d");
        lfu.get("d");
        lfu.get("d");
        // 频率：b=4, c=5, d=6
        assert_eq!(lfu.insert(entry("e")).unwrap().key, "b");
    }

    #[test]
    fn test_update_counts_as_access() {
        let mut lfu = LfuEngine::new(2);
        lfu.insert(entry("a"));
        lfu.insert(entry("b"));
        lfu.insert(entry("a"));
        assert_eq!(lfu.frequency("a"), Some(2));
        assert_eq!(lfu.insert(entry("c")).unwrap().key, "b");
    }
}
