//! 搜索结果缓存
//!
//! 键为 `google-search:` + 规范化查询（小写、合并空白）；值为结果列表 JSON。
//! 过期时间在写入时计算，读取时过期即视为未命中。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use tokio::sync::RwLock;

use crate::search::{SearchClient, SearchError, SearchResult};

const CACHE_PREFIX: &str = "google-search";

/// 规范化查询文本，生成缓存键
pub fn cache_key(query: &str) -> String {
    let normalized = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    format!("{}:{}", CACHE_PREFIX, normalized)
}

/// 带 TTL 的键值缓存
#[async_trait]
pub trait SearchCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SearchError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SearchError>;
}

fn expires_at_millis(ttl: Duration) -> i64 {
    let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(ttl_millis)
}

/// 内存缓存
#[derive(Default)]
pub struct MemorySearchCache {
    entries: RwLock<HashMap<String, (String, i64)>>,
}

impl MemorySearchCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SearchCache for MemorySearchCache {
    async fn get(&self, key: &str) -> Result<Option<String>, SearchError> {
        let now = Utc::now().timestamp_millis();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SearchError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), expires_at_millis(ttl)));
        Ok(())
    }
}

/// SQLite 缓存（与 Step Store 共用连接池）
#[derive(Clone)]
pub struct SqliteSearchCache {
    pool: SqlitePool,
}

impl SqliteSearchCache {
    pub async fn new(pool: SqlitePool) -> Result<Self, SearchError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS search_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// 删除已过期条目，返回删除数量
    pub async fn purge_expired(&self) -> Result<u64, SearchError> {
        let result = sqlx::query("DELETE FROM search_cache WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SearchCache for SqliteSearchCache {
    async fn get(&self, key: &str) -> Result<Option<String>, SearchError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM search_cache WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(Utc::now().timestamp_millis())
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SearchError> {
        sqlx::query("INSERT OR REPLACE INTO search_cache (key, value, expires_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(value)
            .bind(expires_at_millis(ttl))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// 带缓存的搜索：命中直接返回，未命中时查询后端并写入缓存
pub struct CachedSearch<S> {
    inner: S,
    cache: Arc<dyn SearchCache>,
    ttl: Duration,
}

impl<S: SearchClient> CachedSearch<S> {
    pub fn new(inner: S, cache: Arc<dyn SearchCache>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl<S: SearchClient> SearchClient for CachedSearch<S> {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let key = cache_key(query);
        if let Some(cached) = self.cache.get(&key).await? {
            match serde_json::from_str::<Vec<SearchResult>>(&cached) {
                Ok(results) => {
                    tracing::debug!(key = %key, "search cache hit");
                    return Ok(results);
                }
                Err(e) => tracing::warn!(key = %key, "corrupt cache entry ignored: {}", e),
            }
        }

        tracing::debug!(key = %key, "search cache miss");
        let results = self.inner.search(query).await?;
        match serde_json::to_string(&results) {
            Ok(value) => self.cache.set(&key, &value, self.ttl).await?,
            Err(e) => tracing::warn!("search results not cached: {}", e),
        }
        Ok(results)
    }
}
