//! Planner：创建并立即执行根规划步骤
//!
//! 规划步骤固定为 step 1，输出约束为步骤列表 schema；回复是否可解析由 Tool Classifier 处理。

use std::sync::Arc;

use crate::core::ResearchError;
use crate::research::executor::StepExecutor;
use crate::research::prompts::planning_prompt;
use crate::research::schema::step_list_schema;
use crate::research::ResearchContext;
use crate::store::{NewStep, Step, StepStore, StepType, Tool};

/// 规划步骤的编号
pub const PLANNING_STEP_NUMBER: i64 = 1;

pub struct Planner {
    store: Arc<dyn StepStore>,
    executor: Arc<StepExecutor>,
}

impl Planner {
    pub fn new(store: Arc<dyn StepStore>, executor: Arc<StepExecutor>) -> Self {
        Self { store, executor }
    }

    /// 创建 PLANNING 步骤并执行，返回完成后的 Step
    pub async fn create_plan(&self, ctx: &ResearchContext) -> Result<Step, ResearchError> {
        let step = self
            .store
            .create_step(
                NewStep::new(
                    &ctx.query_id,
                    PLANNING_STEP_NUMBER,
                    StepType::Planning,
                    Tool::Llm,
                    planning_prompt(&ctx.query),
                )
                .with_output_schema(step_list_schema()),
            )
            .await?;
        tracing::info!(query_id = %ctx.query_id, "planning step created");
        self.executor.execute_step(&step).await
    }
}
