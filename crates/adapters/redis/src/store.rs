//! Redis 远程缓存存储
//!
//! 所有操作都有超时上限；遇到连接类错误时重建连接并重试一次。
//! 对调用方永不报错：失败表现为 None / false，并计入错误指标

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mdcache_common::{CacheMetrics, MetricsSnapshot, SharedClock, decode};
use mdcache_errors::{AppError, AppResult};
use mdcache_ports::{CacheStore, CacheTier};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, InfoDict, RedisResult, Script};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::RemoteStoreConfig;
use crate::connection::{classify, create_connection_manager};
use crate::info::{RemoteServerInfo, RemoteStats};
use crate::record::{GET_SCRIPT, META_FIELDS, RemoteRecord, is_expired, parse_field};

/// SCAN 每批的数量
const SCAN_BATCH: usize = 500;

/// 转义 SCAN MATCH 的通配字符，使前缀按字面匹配
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Redis 远程缓存存储
pub struct RedisStore {
    config: RemoteStoreConfig,
    conn: RwLock<Option<ConnectionManager>>,
    metrics: CacheMetrics,
    clock: SharedClock,
    get_script: Script,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoint", &self.config.endpoint())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl RedisStore {
    /// 创建存储并立即建立连接
    pub async fn connect(config: RemoteStoreConfig, clock: SharedClock) -> AppResult<Self> {
        let store = Self::lazy(config, clock);
        store.reconnect().await?;
        info!(endpoint = %store.config.endpoint(), "Redis cache store connected");
        Ok(store)
    }

    /// 创建存储，首次使用时再连接
    pub fn lazy(config: RemoteStoreConfig, clock: SharedClock) -> Self {
        let metrics = CacheMetrics::new(CacheTier::Remote.as_str()).with_enabled(config.enable_stats);
        Self {
            config,
            conn: RwLock::new(None),
            metrics,
            clock,
            get_script: Script::new(GET_SCRIPT),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RemoteStoreConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }

    async fn connection(&self) -> AppResult<ConnectionManager> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Ok(conn.clone());
        }
        self.reconnect().await
    }

    async fn reconnect(&self) -> AppResult<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::connection("Redis cache store is closed"));
        }

        let mut slot = self.conn.write().await;
        match create_connection_manager(&self.config.url(), self.config.connect_timeout).await {
            Ok(conn) => {
                *slot = Some(conn.clone());
                Ok(conn)
            }
            Err(e) => {
                *slot = None;
                Err(e)
            }
        }
    }

    async fn bounded<T>(&self, op: &'static str, fut: impl Future<Output = RedisResult<T>>) -> AppResult<T> {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(op, e)),
            Err(_) => Err(AppError::timeout(format!(
                "Redis {} timed out after {}ms",
                op,
                self.config.operation_timeout.as_millis()
            ))),
        }
    }

    /// 执行一次操作；连接类错误时重连并重试一次
    async fn execute<T, F, Fut>(&self, op: &'static str, f: F) -> AppResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match self.bounded(op, f(conn)).await {
            Err(e) if e.is_transient() => {
                warn!(op, error = %e, "Redis operation failed, reconnecting");
                let conn = self.reconnect().await?;
                self.bounded(op, f(conn)).await
            }
            other => other,
        }
    }

    fn now(&self) -> f64 {
        self.clock.unix_seconds()
    }

    async fn fetch(&self, key: &str) -> AppResult<Option<RemoteRecord>> {
        let mut invocation = self.get_script.prepare_invoke();
        invocation.key(key).arg(self.now());
        let invocation = &invocation;

        let fetched: Option<Vec<Option<Vec<u8>>>> = self
            .execute("get", |mut conn| async move { invocation.invoke_async(&mut conn).await })
            .await?;
        RemoteRecord::from_fetched(fetched)
    }

    async fn remove(&self, key: &str) -> AppResult<bool> {
        let removed: i64 = self
            .execute("delete", |mut conn| async move { conn.del(key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &str) -> AppResult<Vec<String>> {
        self.execute("scan", |mut conn| async move {
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, redis::RedisError>(keys)
        })
        .await
    }

    pub async fn get(&self, key: &str, data_type: Option<&str>) -> Option<Vec<u8>> {
        let record = match self.fetch(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.metrics.record_miss(data_type);
                return None;
            }
            Err(e) => {
                error!(key, error = %e, "Redis cache get failed");
                self.metrics.record_error(data_type);
                return None;
            }
        };

        if record.is_expired(self.now()) {
            debug!(key, "Remote cache entry expired");
            if let Err(e) = self.remove(key).await {
                warn!(key, error = %e, "Failed to delete expired remote entry");
            }
            self.metrics.record_miss(data_type);
            return None;
        }

        match decode(&record.data, record.compressed) {
            Ok(value) => {
                self.metrics.record_hit(data_type);
                Some(value)
            }
            Err(e) => {
                error!(key, error = %e, "Failed to decode remote cache entry");
                self.metrics.record_error(data_type);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<i64>, data_type: Option<&str>) -> bool {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let encoded = match self.config.compression.encode(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(key, error = %e, "Failed to encode remote cache value");
                self.metrics.record_error(data_type);
                return false;
            }
        };

        let record = RemoteRecord::new(encoded.bytes, encoded.compressed, ttl, self.now());
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore().hset_multiple(key, &record.fields()).ignore();
        if let Some(expire) = self.config.physical_ttl(ttl) {
            pipe.expire(key, expire).ignore();
        }
        let pipe = &pipe;

        let result: AppResult<()> = self
            .execute("set", |mut conn| async move { pipe.query_async(&mut conn).await })
            .await;

        match result {
            Ok(()) => {
                self.metrics.record_set(data_type);
                true
            }
            Err(e) => {
                error!(key, error = %e, "Redis cache set failed");
                self.metrics.record_error(data_type);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str, data_type: Option<&str>) -> bool {
        match self.remove(key).await {
            Ok(removed) => {
                if removed {
                    self.metrics.record_delete(data_type);
                }
                removed
            }
            Err(e) => {
                error!(key, error = %e, "Redis cache delete failed");
                self.metrics.record_error(data_type);
                false
            }
        }
    }

    /// 键存在且未逻辑过期；过期的键会被删除
    pub async fn exists(&self, key: &str) -> bool {
        let meta: AppResult<Vec<Option<Vec<u8>>>> = self
            .execute("exists", |mut conn| async move {
                conn.hget(key, &META_FIELDS[..]).await
            })
            .await;

        let meta = match meta {
            Ok(meta) => meta,
            Err(e) => {
                error!(key, error = %e, "Redis cache exists failed");
                self.metrics.record_error(None);
                return false;
            }
        };

        let mut meta = meta.into_iter();
        let (created, ttl) = (meta.next().flatten(), meta.next().flatten());
        if created.is_none() {
            return false;
        }

        let parsed = parse_field::<f64>("created_time", created)
            .and_then(|c| Ok((c, parse_field::<i64>("ttl", ttl)?)));
        match parsed {
            Ok((Some(created), Some(ttl))) if is_expired(created, ttl, self.now()) => {
                if let Err(e) = self.remove(key).await {
                    warn!(key, error = %e, "Failed to delete expired remote entry");
                }
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(key, error = %e, "Malformed remote cache metadata");
                false
            }
        }
    }

    /// 清空；给定前缀时用 SCAN + DEL 删除匹配的键，否则 FLUSHDB
    pub async fn clear(&self, prefix: Option<&str>) {
        let result = match prefix {
            None => self
                .execute("flushdb", |mut conn| async move {
                    redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await
                })
                .await
                .map(|_| 0),
            Some(prefix) => self.clear_prefix(prefix).await,
        };

        match result {
            Ok(removed) => info!(prefix = prefix.unwrap_or("*"), removed, "Redis cache cleared"),
            Err(e) => {
                error!(error = %e, "Redis cache clear failed");
                self.metrics.record_error(None);
            }
        }
    }

    async fn clear_prefix(&self, prefix: &str) -> AppResult<usize> {
        let keys = self.scan(&format!("{}*", escape_glob(prefix))).await?;
        let mut removed = 0;
        for chunk in keys.chunks(SCAN_BATCH) {
            let count: i64 = self
                .execute("delete", |mut conn| async move { conn.del(chunk).await })
                .await?;
            removed += count.max(0) as usize;
        }
        Ok(removed)
    }

    /// 匹配模式的键
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        match self.scan(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(pattern, error = %e, "Redis key scan failed");
                Vec::new()
            }
        }
    }

    /// 当前数据库的键数量
    pub async fn size(&self) -> usize {
        let result: AppResult<u64> = self
            .execute("dbsize", |mut conn| async move {
                redis::cmd("DBSIZE").query_async(&mut conn).await
            })
            .await;
        match result {
            Ok(size) => size as usize,
            Err(e) => {
                error!(error = %e, "Redis dbsize failed");
                0
            }
        }
    }

    pub async fn ping(&self) -> bool {
        let result: AppResult<String> = self
            .execute("ping", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await;
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(endpoint = %self.config.endpoint(), error = %e, "Redis ping failed");
                false
            }
        }
    }

    /// 服务端信息
    pub async fn server_info(&self) -> Option<RemoteServerInfo> {
        let result: AppResult<InfoDict> = self
            .execute("info", |mut conn| async move {
                redis::cmd("INFO").query_async(&mut conn).await
            })
            .await;
        match result {
            Ok(info) => Some(RemoteServerInfo::from_dict(&info)),
            Err(e) => {
                warn!(error = %e, "Redis info failed");
                None
            }
        }
    }

    pub async fn stats(&self) -> RemoteStats {
        let server = self.server_info().await;
        RemoteStats {
            endpoint: self.config.endpoint(),
            default_ttl: self.config.default_ttl,
            compression_enabled: self.config.compression.enabled,
            connected: server.is_some(),
            metrics: self.metrics.snapshot(),
            server,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 关闭连接；之后所有操作都会失败
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.conn.write().await.take();
        info!(endpoint = %self.config.endpoint(), "Redis cache store closed");
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn tier(&self) -> CacheTier {
        CacheTier::Remote
    }

    async fn get(&self, key: &str, data_type: Option<&str>) -> Option<Vec<u8>> {
        RedisStore::get(self, key, data_type).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<i64>, data_type: Option<&str>) -> bool {
        RedisStore::set(self, key, value, ttl, data_type).await
    }

    async fn delete(&self, key: &str, data_type: Option<&str>) -> bool {
        RedisStore::delete(self, key, data_type).await
    }

    async fn exists(&self, key: &str) -> bool {
        RedisStore::exists(self, key).await
    }

    async fn clear(&self, prefix: Option<&str>) {
        RedisStore::clear(self, prefix).await
    }

    async fn size(&self) -> usize {
        RedisStore::size(self).await
    }

    async fn ping(&self) -> bool {
        RedisStore::ping(self).await
    }

    fn metrics(&self) -> MetricsSnapshot {
        RedisStore::metrics(self)
    }

    async fn close(&self) {
        RedisStore::close(self).await
    }
}
