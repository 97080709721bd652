//! FIFO 引擎：按插入顺序淘汰，读取和替换都不改变位置

use std::collections::{BTreeMap, HashMap};

use mdcache_ports::EvictionPolicy;

use super::EvictionEngine;
use crate::entry::CacheEntry;

#[derive(Debug)]
pub struct FifoEngine {
    capacity: usize,
    seq: u64,
    entries: HashMap<String, (CacheEntry, u64)>,
    queue: BTreeMap<u64, String>,
}

impl FifoEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seq: 0,
            entries: HashMap::with_capacity(capacity),
            queue: BTreeMap::new(),
        }
    }

    /// 最早插入、仍然存在的键
    pub fn oldest(&self) -> Option<&str> {
        self.queue.first_key_value().map(|(_, key)| key.as_str())
    }
}

impl EvictionEngine for FifoEngine {
    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::Fifo
    }

    fn get(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key).map(|(entry, _)| entry)
    }

    fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key).map(|(entry, _)| entry)
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        if let Some((slot, _)) = self.entries.get_mut(&entry.key) {
            *slot = entry;
            return None;
        }

        let victim = if self.entries.len() >= self.capacity {
            self.queue
                .pop_first()
                .and_then(|(_, key)| self.entries.remove(&key))
                .map(|(entry, _)| entry)
        } else {
            None
        };

        self.seq += 1;
        self.queue.insert(self.seq, entry.key.clone());
        self.entries.insert(entry.key.clone(), (entry, self.seq));
        victim
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let (entry, seq) = self.entries.remove(key)?;
        self.queue.remove(&seq);
        Some(entry)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.queue.clear();
    }

    fn keys(&self) -> Vec<String> {
        self.queue.values().cloned().collect()
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
    fn test_evicts_earliest_regardless_of_access() {
        let mut fifo = FifoEngine::new(3);
        fifo.insert(entry("a"));
        fifo.insert(entry("b"));
        fifo.insert(entry("c"));
        for _ in 0..5 {
            fifo.get("a");
        }

        assert_eq!(fifo.insert(entry("d")).unwrap().key, "a");
        assert_eq!(fifo.insert(entry("e")).unwrap().key, "b");
        assert_eq!(fifo.keys(), vec!["c", "d", "e"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut fifo = FifoEngine::new(2);
        fifo.insert(entry("a"));
        fifo.insert(entry("b"));
        fifo.insert(entry("a"));
        assert_eq!(fifo.oldest(), Some("a"));
        assert_eq!(fifo.insert(entry("c")).unwrap().key, "a");
    }

    #[test]
    fn test_removed_keys_leave_the_queue() {
        let mut fifo = FifoEngine::new(2);
        fifo.insert(entry("a"));
        fifo.insert(entry("b"));
        fifo.remove("a");
        fifo.insert(entry("c"));
        // b 是仍然存在的最早插入
        assert_eq!(fifo.insert(entry("d")).unwrap().key, "b");
    }
}
