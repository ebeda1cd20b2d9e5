//! 编排错误类型
//!
//! 与 ResearchService 配合：UnknownTool / Model 为致命错误，直接中止本次研究；
//! 解析失败不在此列（见 research::schema::StructuredOutput，降级为空计划）。

use thiserror::Error;

use crate::llm::LlmError;
use crate::search::SearchError;
use crate::store::StoreError;

/// 研究编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum ResearchError {
    /// Step 的 tool 既不是 LLM 也不是 WEB_SEARCH：配置错误，不重试
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 模型调用失败（非成功状态码 / 网络错误），本次运行中止
    #[error("Model call failed: {0}")]
    Model(#[from] LlmError),

    #[error("Search failed: {0}")]
    Search(#[from] SearchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Query not found: {0}")]
    QueryNotFound(String),

    /// 收尾时仍有未结束的步骤，Query 不能标记为 COMPLETED
    #[error("Query {query_id} has {remaining} unfinished steps")]
    Unfinished { query_id: String, remaining: usize },
}

impl ResearchError {
    /// 是否属于配置类错误（区别于外部服务失败）
    pub fn is_configuration(&self) -> bool {
        matches!(self, ResearchError::UnknownTool(_))
    }
}
