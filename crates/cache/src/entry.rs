//! 缓存条目

/// 缓存条目
///
/// 值以编码后的字节保存，`compressed` 标记是否经过 gzip
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub compressed: bool,
    /// 创建时间（Unix 秒）
    pub created_time: f64,
    /// 最后访问时间（Unix 秒）
    pub last_access_time: f64,
    pub access_count: u64,
    /// TTL（秒），<= 0 表示永不过期
    pub ttl: i64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Vec<u8>, compressed: bool, ttl: i64, now: f64) -> Self {
        Self {
            key: key.into(),
            value,
            compressed,
            created_time: now,
            last_access_time: now,
            access_count: 0,
            ttl,
        }
    }

    /// 是否已过期
    pub fn is_expired(&self, now: f64) -> bool {
        self.ttl > 0 && now - self.created_time > self.ttl as f64
    }

    /// 更新访问时间和次数
    pub fn touch(&mut self, now: f64) {
        self.last_access_time = now;
        self.access_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new("k", vec![1], false, 5, 100.0);
        assert!(!entry.is_expired(100.0));
        assert!(!entry.is_expired(105.0));
        assert!(entry.is_expired(105.001));
    }

    #[test]
    fn test_non_positive_ttl_never_expires() {
        let zero = CacheEntry::new("k", vec![], false, 0, 0.0);
        let negative = CacheEntry::new("k", vec![], false, -1, 0.0);
        assert!(!zero.is_expired(1e12));
        assert!(!negative.is_expired(1e12));
    }

    #[test]
    fn test_touch() {
        let mut entry = CacheEntry::new("k", vec![], false, 5, 1.0);
        entry.touch(2.0);
        entry.touch(3.0);
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_access_time, 3.0);
        assert_eq!(entry.created_time, 1.0);
    }
}
