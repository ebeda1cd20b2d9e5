//! Step Store：Query / Step 的持久化抽象层
//!
//! 定义统一的存储接口，支持内存（测试、演示）和 SQLite（sqlx）两种实现。
//! 编排器只通过 StepStore 读写状态；每次状态迁移都先落库，再决定下一步。

pub mod memory;
pub mod model;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStepStore;
pub use model::{
    NewStep, Query, QueryId, QueryStatus, Step, StepFilter, StepId, StepOrder, StepStatus,
    StepType, StepUpdate, Tool,
};
pub use sqlite::SqliteStepStore;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// 同一 Query 内 step_number 重复
    #[error("Step number {step_number} already used in query {query_id}")]
    DuplicateStepNumber { query_id: String, step_number: i64 },

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Step Store 接口
#[async_trait]
pub trait StepStore: Send + Sync {
    /// 创建 Query（状态 PENDING，记录开始时间）
    async fn create_query(&self, value: &str) -> Result<Query, StoreError>;

    async fn get_query(&self, query_id: &str) -> Result<Option<Query>, StoreError>;

    /// 更新 Query 状态；COMPLETED 时写入结束时间
    async fn set_query_status(
        &self,
        query_id: &str,
        status: QueryStatus,
    ) -> Result<Query, StoreError>;

    /// 最近创建的 Query（按开始时间倒序）
    async fn list_queries(&self, limit: usize) -> Result<Vec<Query>, StoreError>;

    async fn create_step(&self, step: NewStep) -> Result<Step, StoreError>;

    async fn get_step(&self, step_id: &str) -> Result<Option<Step>, StoreError>;

    async fn update_step(&self, step_id: &str, update: StepUpdate) -> Result<Step, StoreError>;

    async fn find_steps(&self, filter: &StepFilter) -> Result<Vec<Step>, StoreError>;

    async fn count_steps(&self, query_id: &str) -> Result<i64, StoreError>;

    async fn find_first_step(&self, filter: &StepFilter) -> Result<Option<Step>, StoreError> {
        let filter = filter.clone().limit(1);
        Ok(self.find_steps(&filter).await?.into_iter().next())
    }

    /// 下一个可用的 step_number：当前最大值 + 1，空 Query 为 1
    async fn next_step_number(&self, query_id: &str) -> Result<i64, StoreError> {
        let filter = StepFilter::for_query(query_id).order(StepOrder::Descending);
        Ok(self
            .find_first_step(&filter)
            .await?
            .map(|s| s.step_number + 1)
            .unwrap_or(1))
    }
}
