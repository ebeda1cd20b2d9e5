//! Step Executor：按 Step 的 tool 分派到模型或搜索后端，并记录结果
//!
//! 每次状态迁移（RUNNING、COMPLETED / FAILED）都先写入 Step Store，
//! 因此进程在任意时刻中断，库里的状态都与最后一次完成的迁移一致。

use std::sync::Arc;

use crate::core::ResearchError;
use crate::llm::LlmClient;
use crate::search::SearchClient;
use crate::store::{Step, StepStore, StepUpdate, Tool};

pub struct StepExecutor {
    store: Arc<dyn StepStore>,
    llm: Arc<dyn LlmClient>,
    search: Option<Arc<dyn SearchClient>>,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn StepStore>,
        llm: Arc<dyn LlmClient>,
        search: Option<Arc<dyn SearchClient>>,
    ) -> Self {
        Self { store, llm, search }
    }

    /// 执行单个 Step，返回落库后的最新状态
    pub async fn execute_step(&self, step: &Step) -> Result<Step, ResearchError> {
        let step = self.store.update_step(&step.id, StepUpdate::running()).await?;
        tracing::info!(
            step_number = step.step_number,
            step_type = step.step_type.as_str(),
            tool = %step.tool,
            "running step"
        );

        match &step.tool {
            Tool::Llm => self.run_llm(&step).await,
            Tool::WebSearch => self.run_web_search(&step).await,
            Tool::Unrecognized(tool) => {
                tracing::error!(step_number = step.step_number, "unknown tool: {}", tool);
                Err(ResearchError::UnknownTool(tool.clone()))
            }
        }
    }

    async fn run_llm(&self, step: &Step) -> Result<Step, ResearchError> {
        // 数组或其它非对象的 schema 不作为约束
        let format = step.output_schema.as_ref().filter(|s| s.is_object());
        let response = self.llm.complete(&step.description, format).await?;
        let step = self
            .store
            .update_step(&step.id, StepUpdate::completed(response))
            .await?;
        Ok(step)
    }

    async fn run_web_search(&self, step: &Step) -> Result<Step, ResearchError> {
        let Some(search) = &self.search else {
            tracing::error!(
                step_number = step.step_number,
                "web search backend not configured, marking step failed"
            );
            let step = self
                .store
                .update_step(
                    &step.id,
                    StepUpdate::failed("web search backend not configured"),
                )
                .await?;
            return Ok(step);
        };

        let query = step.instruction.as_deref().unwrap_or(&step.description);
        let results = search.search(query).await?;
        tracing::info!(
            step_number = step.step_number,
            results = results.len(),
            "web search finished"
        );
        let response = serde_json::to_string(&results).unwrap_or_else(|_| "[]".to_string());
        let step = self
            .store
            .update_step(&step.id, StepUpdate::completed(response))
            .await?;
        Ok(step)
    }
}
