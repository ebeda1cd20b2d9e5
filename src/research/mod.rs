//! 研究流水线：规划 → 工具选择 → 执行
//!
//! - **planner**: 创建并执行根规划步骤
//! - **classifier**: 由计划派生 TOOL_SELECTION 步骤
//! - **materialize**: 由工具选择结果派生执行步骤
//! - **executor**: 单步执行（模型 / 搜索）
//! - **service**: Query 级编排循环

pub mod classifier;
pub mod executor;
pub mod materialize;
pub mod planner;
pub mod prompts;
pub mod report;
pub mod schema;
pub mod service;

pub use classifier::{ClassificationOutcome, ToolClassifier};
pub use executor::StepExecutor;
pub use materialize::Materializer;
pub use planner::{Planner, PLANNING_STEP_NUMBER};
pub use report::QueryReport;
pub use schema::{ChosenTool, PlannedStep, StepList, StructuredOutput, ToolChoice};
pub use service::ResearchService;

use crate::store::{Query, QueryId};

/// 单次研究的只读上下文，在各阶段之间显式传递
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchContext {
    pub query_id: QueryId,
    pub query: String,
}

impl From<&Query> for ResearchContext {
    fn from(query: &Query) -> Self {
        Self {
            query_id: query.id.clone(),
            query: query.value.clone(),
        }
    }
}
