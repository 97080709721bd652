//! 远程缓存记录
//!
//! 每个缓存项是一个哈希，字段为 data / compressed / created_time /
//! last_access_time / access_count / ttl，读取时不需要反序列化值即可判断过期

use std::str::FromStr;

use mdcache_errors::{AppError, AppResult};

pub const FIELD_DATA: &str = "data";
pub const FIELD_COMPRESSED: &str = "compressed";
pub const FIELD_CREATED_TIME: &str = "created_time";
pub const FIELD_LAST_ACCESS_TIME: &str = "last_access_time";
pub const FIELD_ACCESS_COUNT: &str = "access_count";
pub const FIELD_TTL: &str = "ttl";

/// 读取时取回的字段顺序
pub const FETCH_FIELDS: [&str; 6] = [
    FIELD_DATA,
    FIELD_COMPRESSED,
    FIELD_CREATED_TIME,
    FIELD_LAST_ACCESS_TIME,
    FIELD_ACCESS_COUNT,
    FIELD_TTL,
];

/// 判断过期所需的字段
pub const META_FIELDS: [&str; 2] = [FIELD_CREATED_TIME, FIELD_TTL];

/// 读取脚本：键存在时更新访问计数与时间并返回全部字段，不存在时返回 nil，
/// 不会创建空哈希
pub const GET_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return nil
end
redis.call('HINCRBY', KEYS[1], 'access_count', 1)
redis.call('HSET', KEYS[1], 'last_access_time', ARGV[1])
return redis.call('HMGET', KEYS[1], 'data', 'compressed', 'created_time', 'last_access_time', 'access_count', 'ttl')
";

/// 远程缓存记录
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub data: Vec<u8>,
    pub compressed: bool,
    pub created_time: f64,
    pub last_access_time: f64,
    pub access_count: u64,
    pub ttl: i64,
}

impl RemoteRecord {
    pub fn new(data: Vec<u8>, compressed: bool, ttl: i64, now: f64) -> Self {
        Self {
            data,
            compressed,
            created_time: now,
            last_access_time: now,
            access_count: 0,
            ttl,
        }
    }

    /// 写入用的字段列表
    pub fn fields(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            (FIELD_DATA, self.data.clone()),
            (FIELD_COMPRESSED, flag(self.compressed).as_bytes().to_vec()),
            (FIELD_CREATED_TIME, self.created_time.to_string().into_bytes()),
            (FIELD_LAST_ACCESS_TIME, self.last_access_time.to_string().into_bytes()),
            (FIELD_ACCESS_COUNT, self.access_count.to_string().into_bytes()),
            (FIELD_TTL, self.ttl.to_string().into_bytes()),
        ]
    }

    /// 从读取脚本的结果还原；键不存在或没有 data 字段时返回 None
    pub fn from_fetched(fetched: Option<Vec<Option<Vec<u8>>>>) -> AppResult<Option<Self>> {
        let Some(values) = fetched else {
            return Ok(None);
        };
        if values.len() != FETCH_FIELDS.len() {
            return Err(AppError::serialization(format!(
                "Unexpected remote record shape: {} fields",
                values.len()
            )));
        }

        let mut values = values.into_iter();
        let Some(data) = values.next().flatten() else {
            return Ok(None);
        };
        let compressed = values.next().flatten().is_some_and(|v| v == b"1");
        let created_time = parse_field(FIELD_CREATED_TIME, values.next().flatten())?.unwrap_or(0.0);
        let last_access_time =
            parse_field(FIELD_LAST_ACCESS_TIME, values.next().flatten())?.unwrap_or(created_time);
        let access_count = parse_field(FIELD_ACCESS_COUNT, values.next().flatten())?.unwrap_or(0);
        let ttl = parse_field(FIELD_TTL, values.next().flatten())?.unwrap_or(0);

        Ok(Some(Self {
            data,
            compressed,
            created_time,
            last_access_time,
            access_count,
            ttl,
        }))
    }

    pub fn is_expired(&self, now: f64) -> bool {
        is_expired(self.created_time, self.ttl, now)
    }
}

/// 逻辑过期判断
pub fn is_expired(created_time: f64, ttl: i64, now: f64) -> bool {
    ttl > 0 && now - created_time > ttl as f64
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

/// 解析数值字段；字段缺失返回 None，格式错误返回错误
pub fn parse_field<T: FromStr>(name: &str, raw: Option<Vec<u8>>) -> AppResult<Option<T>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .map(Some)
        .ok_or_else(|| AppError::serialization(format!("Malformed remote field '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(record: &RemoteRecord) -> Option<Vec<Option<Vec<u8>>>> {
        Some(record.fields().into_iter().map(|(_, v)| Some(v)).collect())
    }

    #[test]
    fn test_field_layout() {
        let record = RemoteRecord::new(b"{}".to_vec(), true, 5, 1_700_000_000.5);
        let fields = record.fields();
        let names: Vec<_> = fields.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, FETCH_FIELDS);
        assert_eq!(fields[1].1, b"1");
        assert_eq!(fields[2].1, b"1700000000.5");
        assert_eq!(fields[5].1, b"5");
    }

    #[test]
    fn test_restore_from_script_result() {
        let mut record = RemoteRecord::new(b"payload".to_vec(), false, 60, 100.0);
        record.access_count = 3;
        record.last_access_time = 120.25;

        let restored = RemoteRecord::from_fetched(fetched(&record)).unwrap().unwrap();
        assert_eq!(restored, record);
        assert!(!restored.is_expired(160.0));
        assert!(restored.is_expired(160.5));
    }

    #[test]
    fn test_missing_key_or_data_is_none() {
        assert!(RemoteRecord::from_fetched(None).unwrap().is_none());
        let no_data = Some(vec![None, Some(b"0".to_vec()), None, None, None, None]);
        assert!(RemoteRecord::from_fetched(no_data).unwrap().is_none());
    }

    #[test]
    fn test_missing_metadata_never_expires() {
        let partial = Some(vec![Some(b"v".to_vec()), None, None, None, None, None]);
        let record = RemoteRecord::from_fetched(partial).unwrap().unwrap();
        assert_eq!(record.ttl, 0);
        assert!(!record.compressed);
        assert!(!record.is_expired(f64::MAX));
    }

    #[test]
    fn test_malformed_field_is_error() {
        let bad = Some(vec![
            Some(b"v".to_vec()),
            Some(b"0".to_vec()),
            Some(b"yesterday".to_vec()),
            None,
            None,
            None,
        ]);
        let err = RemoteRecord::from_fetched(bad).unwrap_err();
        assert_eq!(err.kind(), "data");
    }

    #[test]
    fn test_wrong_shape_is_error() {
        assert!(RemoteRecord::from_fetched(Some(vec![Some(b"v".to_vec())])).is_err());
    }
}
