//! Tool Classifier：为计划中的每条指令创建一个 TOOL_SELECTION 步骤
//!
//! 只创建不执行，交给编排循环的 drain 阶段。规划回复缺失或无法解析时按零步骤处理，
//! 但解析状态会随 ClassificationOutcome 返回，便于观测。
//! 已有对应 TOOL_SELECTION 的指令会被跳过，中断后重复调用是安全的。

use std::sync::Arc;

use crate::core::ResearchError;
use crate::research::planner::PLANNING_STEP_NUMBER;
use crate::research::prompts::tool_selection_prompt;
use crate::research::schema::{parse_step_list, tool_choice_schema, StepList, StructuredOutput};
use crate::research::ResearchContext;
use crate::store::{NewStep, Step, StepFilter, StepStore, StepType, Tool};

/// 分类结果：规划回复的解析状态与新建的步骤
#[derive(Debug)]
pub struct ClassificationOutcome {
    pub plan: StructuredOutput<StepList>,
    pub created: Vec<Step>,
}

pub struct ToolClassifier {
    store: Arc<dyn StepStore>,
}

impl ToolClassifier {
    pub fn new(store: Arc<dyn StepStore>) -> Self {
        Self { store }
    }

    pub async fn create_tool_selection_steps(
        &self,
        ctx: &ResearchContext,
    ) -> Result<ClassificationOutcome, ResearchError> {
        let planning = self
            .store
            .find_first_step(
                &StepFilter::for_query(&ctx.query_id)
                    .step_type(StepType::Planning)
                    .step_number(PLANNING_STEP_NUMBER),
            )
            .await?;

        let plan = parse_step_list(planning.as_ref().and_then(|p| p.response.as_deref()));
        match &plan {
            StructuredOutput::Parsed(list) => {
                tracing::info!(query_id = %ctx.query_id, steps = list.steps.len(), "plan parsed");
            }
            StructuredOutput::Missing => {
                tracing::warn!(query_id = %ctx.query_id, "planning step has no response, plan is empty");
            }
            StructuredOutput::Malformed { error, .. } => {
                tracing::warn!(query_id = %ctx.query_id, "planning response malformed ({}), plan is empty", error);
            }
        }

        let mut created = Vec::new();
        if let StructuredOutput::Parsed(list) = &plan {
            // 已落库的 TOOL_SELECTION 按 instruction 计数，重复调用只补齐缺失的指令
            let mut covered: Vec<String> = self
                .store
                .find_steps(
                    &StepFilter::for_query(&ctx.query_id).step_type(StepType::ToolSelection),
                )
                .await?
                .into_iter()
                .filter_map(|s| s.instruction)
                .collect();
            for instruction in list.instructions() {
                if let Some(pos) = covered.iter().position(|c| c == instruction) {
                    covered.swap_remove(pos);
                    continue;
                }
                let step_number = self.store.next_step_number(&ctx.query_id).await?;
                let mut new_step = NewStep::new(
                    &ctx.query_id,
                    step_number,
                    StepType::ToolSelection,
                    Tool::Llm,
                    tool_selection_prompt(instruction, &ctx.query),
                )
                .with_instruction(instruction)
                .with_output_schema(tool_choice_schema());
                if let Some(planning) = &planning {
                    new_step = new_step.with_parent(&planning.id);
                }
                created.push(self.store.create_step(new_step).await?);
            }
        }

        tracing::info!(
            query_id = %ctx.query_id,
            created = created.len(),
            "tool selection steps created"
        );
        Ok(ClassificationOutcome { plan, created })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStepStore, StepStatus, StepUpdate};

    async fn with_plan_response(response: Option<&str>) -> (Arc<MemoryStepStore>, ResearchContext, Step) {
        let store = Arc::new(MemoryStepStore::new());
        let query = store.create_query("Why does water boil?").await.unwrap();
        let plan = store
            .create_step(NewStep::new(&query.id, 1, StepType::Planning, Tool::Llm, "plan"))
            .await
            .unwrap();
        let plan = match response {
            Some(r) => store.update_step(&plan.id, StepUpdate::completed(r)).await.unwrap(),
            None => plan,
        };
        (store, ResearchContext::from(&query), plan)
    }

    #[tokio::test]
    async fn test_two_instructions_become_steps_two_and_three() {
        let (store, ctx, plan) = with_plan_response(Some(
            r#"{"steps":[{"stepNumber":1,"stepInstruction":"Find the boiling point of water"},{"stepNumber":2,"stepInstruction":"Summarize why it matters"}]}"#,
        ))
        .await;
        let classifier = ToolClassifier::new(store.clone());

        let outcome = classifier.create_tool_selection_steps(&ctx).await.unwrap();
        assert_eq!(outcome.created.len(), 2);

        let numbers: Vec<i64> = outcome.created.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![2, 3]);
        for step in &outcome.created {
            assert_eq!(step.step_type, StepType::ToolSelection);
            assert_eq!(step.tool, Tool::Llm);
            assert_eq!(step.status, StepStatus::Pending);
            assert_eq!(step.parent_step_id.as_deref(), Some(plan.id.as_str()));
            assert!(step.description.contains("Why does water boil?"));
            assert!(step.output_schema.is_some());
        }
        assert_eq!(
            outcome.created[0].instruction.as_deref(),
            Some("Find the boiling point of water")
        );
        assert!(outcome.created[1].description.contains("Summarize why it matters"));
    }

    #[tokio::test]
    async fn test_repeated_classification_fills_only_missing_instructions() {
        let (store, ctx, plan) = with_plan_response(Some(
            r#"{"steps":[{"stepNumber":1,"stepInstruction":"A"},{"stepNumber":2,"stepInstruction":"B"}]}"#,
        ))
        .await;
        store
            .create_step(
                NewStep::new(&ctx.query_id, 2, StepType::ToolSelection, Tool::Llm, "choose A")
                    .with_parent(&plan.id)
                    .with_instruction("A"),
            )
            .await
            .unwrap();

        let classifier = ToolClassifier::new(store.clone());
        let outcome = classifier.create_tool_selection_steps(&ctx).await.unwrap();
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.created[0].instruction.as_deref(), Some("B"));
        assert_eq!(outcome.created[0].step_number, 3);

        let again = classifier.create_tool_selection_steps(&ctx).await.unwrap();
        assert!(again.created.is_empty());
        assert_eq!(store.count_steps(&ctx.query_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_malformed_plan_creates_nothing() {
        let (store, ctx, _) = with_plan_response(Some("not json")).await;
        let outcome = ToolClassifier::new(store.clone())
            .create_tool_selection_steps(&ctx)
            .await
            .unwrap();
        assert!(outcome.plan.is_malformed());
        assert!(outcome.created.is_empty());
        assert_eq!(store.count_steps(&ctx.query_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_response_creates_nothing() {
        let (store, ctx, _) = with_plan_response(None).await;
        let outcome = ToolClassifier::new(store)
            .create_tool_selection_steps(&ctx)
            .await
            .unwrap();
        assert_eq!(outcome.plan, StructuredOutput::Missing);
        assert!(outcome.created.is_empty());
    }
}
