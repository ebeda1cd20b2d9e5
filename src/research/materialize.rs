//! 执行步骤物化：由已完成的 TOOL_SELECTION 步骤派生 LLM / WEB_SEARCH 子步骤
//!
//! 只处理尚无子步骤的 TOOL_SELECTION（反连接），重复调用不会产生重复子步骤。
//! 新步骤编号取当前最大值 + 1，保证不会低于任何仍在 PENDING 的步骤。

use std::sync::Arc;

use crate::core::ResearchError;
use crate::research::prompts::execution_prompt;
use crate::research::schema::{parse_tool_choice, ChosenTool, StructuredOutput};
use crate::research::ResearchContext;
use crate::store::{NewStep, Step, StepFilter, StepStore, StepType, Tool};

pub struct Materializer {
    store: Arc<dyn StepStore>,
    /// 为 true 时 web_search 子步骤以 WEB_SEARCH 工具执行，否则统一交给 LLM
    route_web_search: bool,
}

impl Materializer {
    pub fn new(store: Arc<dyn StepStore>, route_web_search: bool) -> Self {
        Self {
            store,
            route_web_search,
        }
    }

    fn resolve_choice(selection: &Step) -> ChosenTool {
        match parse_tool_choice(selection.response.as_deref()) {
            StructuredOutput::Parsed(choice) => choice.tool,
            StructuredOutput::Missing => {
                tracing::warn!(step_number = selection.step_number, "tool selection has no response, using llm");
                ChosenTool::Llm
            }
            StructuredOutput::Malformed { error, .. } => {
                tracing::warn!(step_number = selection.step_number, "tool selection malformed ({}), using llm", error);
                ChosenTool::Llm
            }
        }
    }

    pub async fn materialize_execution_steps(
        &self,
        ctx: &ResearchContext,
    ) -> Result<Vec<Step>, ResearchError> {
        let selections = self
            .store
            .find_steps(
                &StepFilter::for_query(&ctx.query_id)
                    .step_type(StepType::ToolSelection)
                    .childless(),
            )
            .await?;
        tracing::info!(
            query_id = %ctx.query_id,
            pending_fan_out = selections.len(),
            "materializing execution steps"
        );

        let mut created = Vec::with_capacity(selections.len());
        for selection in &selections {
            let (step_type, tool) = match Self::resolve_choice(selection) {
                ChosenTool::Llm => (StepType::Llm, Tool::Llm),
                ChosenTool::WebSearch if self.route_web_search => {
                    (StepType::WebSearch, Tool::WebSearch)
                }
                ChosenTool::WebSearch => (StepType::WebSearch, Tool::Llm),
            };
            let step_number = self.store.next_step_number(&ctx.query_id).await?;
            let mut new_step = NewStep::new(
                &ctx.query_id,
                step_number,
                step_type,
                tool,
                execution_prompt(&selection.description, &ctx.query),
            )
            .with_parent(&selection.id);
            if let Some(instruction) = &selection.instruction {
                new_step = new_step.with_instruction(instruction);
            }
            created.push(self.store.create_step(new_step).await?);
        }

        tracing::info!(query_id = %ctx.query_id, created = created.len(), "execution steps created");
        Ok(created)
    }
}
