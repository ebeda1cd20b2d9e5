//! 搜索层：搜索后端抽象、Google Custom Search 实现与结果缓存
//!
//! 编排器只依赖 SearchClient；缓存对其透明（CachedSearch 包装任意后端）。

pub mod cache;
pub mod google;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;

pub use cache::{cache_key, CachedSearch, MemorySearchCache, SearchCache, SqliteSearchCache};
pub use google::GoogleSearch;

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Cache error: {0}")]
    Cache(#[from] sqlx::Error),
}

/// 搜索后端接口
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError>;
}

/// 根据配置创建带缓存的搜索后端；provider 为 none 或缺少凭据时返回 None
pub fn create_search_from_config(
    cfg: &AppConfig,
    cache: Arc<dyn SearchCache>,
) -> Option<Arc<dyn SearchClient>> {
    let search = &cfg.search;
    match search.provider.to_lowercase().as_str() {
        "google" => match search.google_credentials() {
            Some((api_key, engine_id)) => {
                tracing::info!("Using Google search (cache ttl {}s)", search.cache_ttl_secs);
                let google = GoogleSearch::new(api_key, engine_id, search.timeout_secs);
                Some(Arc::new(CachedSearch::new(
                    google,
                    cache,
                    Duration::from_secs(search.cache_ttl_secs),
                )))
            }
            None => {
                tracing::warn!(
                    "GOOGLE_SEARCH_API_KEY / GOOGLE_SEARCH_ID not set, web search disabled"
                );
                None
            }
        },
        "none" | "" => None,
        other => {
            tracing::warn!("Unknown search provider '{}', web search disabled", other);
            None
        }
    }
}
