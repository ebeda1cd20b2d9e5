//! Google Custom Search JSON API 客户端
//!
//! GET https://www.googleapis.com/customsearch/v1?key=..&cx=..&q=..；
//! 响应中无 items 时返回空列表。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::search::{SearchClient, SearchError, SearchResult};

const GOOGLE_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

impl From<SearchItem> for SearchResult {
    fn from(item: SearchItem) -> Self {
        Self {
            title: item.title,
            link: item.link,
            snippet: item.snippet,
        }
    }
}

/// 将 API 响应体解析为结果列表
fn parse_results(body: &str) -> Result<Vec<SearchResult>, SearchError> {
    let parsed: SearchResponse = serde_json::from_str(body)
        .map_err(|e| SearchError::Request(format!("Invalid response: {}", e)))?;
    Ok(parsed.items.into_iter().map(SearchResult::from).collect())
}

pub struct GoogleSearch {
    client: Client,
    api_key: String,
    engine_id: String,
}

impl GoogleSearch {
    pub fn new(api_key: String, engine_id: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("delve/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            engine_id,
        }
    }
}

#[async_trait]
impl SearchClient for GoogleSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        tracing::debug!(query = %query, "google search");
        let resp = self
            .client
            .get(GOOGLE_SEARCH_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
            ])
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SearchError::Request(format!("Read body: {}", e)))?;
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_results(&body)
    }
}
