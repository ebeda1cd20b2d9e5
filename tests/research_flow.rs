//! 研究流水线集成测试：规划 → 工具选择 → 物化 → 执行

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use delve::llm::mock::{wants_step_list, wants_tool_choice};
use delve::llm::{LlmError, ScriptedLlmClient};
use delve::research::ResearchContext;
use delve::search::{SearchClient, SearchError, SearchResult};
use delve::store::{
    MemoryStepStore, NewStep, QueryStatus, Step, StepFilter, StepStatus, StepStore, StepType,
    StepUpdate, SqliteStepStore, Tool,
};
use delve::{ResearchError, ResearchService};

const TWO_STEP_PLAN: &str = r#"{"steps":[{"stepNumber":1,"stepInstruction":"Look up the boiling point of water"},{"stepNumber":2,"stepInstruction":"Explain the result"}]}"#;

/// 计划固定两步；指令含 "Look up" 的选 web_search，其余选 llm
fn research_llm(plan: &'static str, fail_execution: Arc<AtomicBool>) -> Arc<ScriptedLlmClient> {
    Arc::new(ScriptedLlmClient::new(move |prompt, format| {
        if wants_step_list(format) {
            return Ok(plan.to_string());
        }
        if wants_tool_choice(format) {
            let tool = if prompt.contains("Look up") { "web_search" } else { "llm" };
            return Ok(format!(r#"{{"tool":"{}"}}"#, tool));
        }
        if fail_execution.load(Ordering::SeqCst) {
            return Err(LlmError::Transport("connection refused".into()));
        }
        Ok("Water boils at 100 C at sea level.".to_string())
    }))
}

struct FixedSearch;

#[async_trait]
impl SearchClient for FixedSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        Ok(vec![SearchResult {
            title: format!("Result for {}", query),
            link: "https://example.com/boiling".into(),
            snippet: "100 degrees Celsius".into(),
        }])
    }
}

async fn all_steps(store: &dyn StepStore, query_id: &str) -> Vec<Step> {
    store.find_steps(&StepFilter::for_query(query_id)).await.unwrap()
}

fn assert_tree_invariants(steps: &[Step]) {
    // 编号唯一且连续
    let numbers: Vec<i64> = steps.iter().map(|s| s.step_number).collect();
    let expected: Vec<i64> = (1..=steps.len() as i64).collect();
    assert_eq!(numbers, expected);

    let planning: Vec<&Step> = steps.iter().filter(|s| s.step_type == StepType::Planning).collect();
    assert_eq!(planning.len(), 1);
    assert_eq!(planning[0].step_number, 1);
    assert!(planning[0].parent_step_id.is_none());

    for step in steps {
        match step.step_type {
            StepType::Planning => {}
            StepType::ToolSelection => {
                assert_eq!(step.parent_step_id.as_deref(), Some(planning[0].id.as_str()));
            }
            StepType::Llm | StepType::WebSearch => {
                let parent = steps
                    .iter()
                    .find(|p| Some(p.id.as_str()) == step.parent_step_id.as_deref())
                    .expect("execution step has a parent");
                assert_eq!(parent.step_type, StepType::ToolSelection);
                assert!(parent.step_number < step.step_number);
            }
        }
    }
}

#[tokio::test]
async fn test_two_step_plan_end_to_end() {
    let store = Arc::new(MemoryStepStore::new());
    let llm = research_llm(TWO_STEP_PLAN, Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm.clone(), None, false);

    let query = service.start_research("At what temperature does water boil?").await.unwrap();
    assert_eq!(query.status, QueryStatus::Completed);
    assert!(query.ended_at.is_some());

    let steps = all_steps(store.as_ref(), &query.id).await;
    assert_eq!(steps.len(), 5);
    assert_tree_invariants(&steps);

    let types: Vec<StepType> = steps.iter().map(|s| s.step_type).collect();
    assert_eq!(
        types,
        vec![
            StepType::Planning,
            StepType::ToolSelection,
            StepType::ToolSelection,
            StepType::WebSearch,
            StepType::Llm,
        ]
    );
    // 默认不路由到搜索后端：web_search 子步骤仍由 LLM 执行
    assert_eq!(steps[3].tool, Tool::Llm);
    assert_eq!(steps[3].parent_step_id.as_deref(), Some(steps[1].id.as_str()));
    assert_eq!(steps[4].parent_step_id.as_deref(), Some(steps[2].id.as_str()));

    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(llm.call_count(), 5);
}

#[tokio::test]
async fn test_steps_execute_in_step_number_order() {
    let store = Arc::new(MemoryStepStore::new());
    let llm = research_llm(TWO_STEP_PLAN, Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm.clone(), None, false);

    let query = service.start_research("q").await.unwrap();
    let steps = all_steps(store.as_ref(), &query.id).await;

    // 每个步骤都走 LLM：调用顺序即执行顺序
    let prompts: Vec<String> = llm.calls().into_iter().map(|c| c.prompt).collect();
    let descriptions: Vec<String> = steps.iter().map(|s| s.description.clone()).collect();
    assert_eq!(prompts, descriptions);
}

#[tokio::test]
async fn test_routed_web_search_uses_search_backend() {
    let store = Arc::new(MemoryStepStore::new());
    let llm = research_llm(TWO_STEP_PLAN, Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm.clone(), Some(Arc::new(FixedSearch)), true);

    let query = service.start_research("boiling water").await.unwrap();
    let steps = all_steps(store.as_ref(), &query.id).await;
    let search_step = &steps[3];
    assert_eq!(search_step.step_type, StepType::WebSearch);
    assert_eq!(search_step.tool, Tool::WebSearch);
    assert_eq!(search_step.status, StepStatus::Completed);

    let results: Vec<SearchResult> =
        serde_json::from_str(search_step.response.as_deref().unwrap()).unwrap();
    assert_eq!(results[0].title, "Result for Look up the boiling point of water");
    // 规划 + 两次选择 + 一次 LLM 执行
    assert_eq!(llm.call_count(), 4);
}

#[tokio::test]
async fn test_routed_web_search_without_backend_fails_step_only() {
    let store = Arc::new(MemoryStepStore::new());
    let llm = research_llm(TWO_STEP_PLAN, Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm, None, true);

    let query = service.start_research("boiling water").await.unwrap();
    assert_eq!(query.status, QueryStatus::Completed);

    let steps = all_steps(store.as_ref(), &query.id).await;
    assert_eq!(steps[3].status, StepStatus::Failed);
    assert_eq!(steps[4].status, StepStatus::Completed);
}

#[tokio::test]
async fn test_unparseable_plan_completes_with_single_step() {
    let store = Arc::new(MemoryStepStore::new());
    let llm = research_llm("not json", Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm.clone(), None, false);

    let query = service.start_research("anything").await.unwrap();
    assert_eq!(query.status, QueryStatus::Completed);

    let steps = all_steps(store.as_ref(), &query.id).await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].response.as_deref(), Some("not json"));
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_fenced_plan_is_accepted() {
    let store = Arc::new(MemoryStepStore::new());
    let fenced: &'static str = "Here is the plan:\n```json\n{\"steps\":[{\"stepNumber\":1,\"stepInstruction\":\"Explain it\"}]}\n```";
    let llm = research_llm(fenced, Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm, None, false);

    let query = service.start_research("anything").await.unwrap();
    let steps = all_steps(store.as_ref(), &query.id).await;
    assert_eq!(steps.len(), 3);
    assert_tree_invariants(&steps);
}

#[tokio::test]
async fn test_unknown_tool_stops_drain() {
    let store = Arc::new(MemoryStepStore::new());
    let llm = research_llm(TWO_STEP_PLAN, Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm.clone(), None, false);

    let query = store.create_query("compute").await.unwrap();
    store
        .create_step(NewStep::new(
            &query.id,
            1,
            StepType::Llm,
            Tool::Unrecognized("CALCULATOR".into()),
            "2 + 2",
        ))
        .await
        .unwrap();
    let later = store
        .create_step(NewStep::new(&query.id, 2, StepType::Llm, Tool::Llm, "later"))
        .await
        .unwrap();

    let err = service.drain(&ResearchContext::from(&query)).await.unwrap_err();
    assert!(matches!(err, ResearchError::UnknownTool(ref t) if t == "CALCULATOR"));
    assert!(err.is_configuration());

    let later = store.get_step(&later.id).await.unwrap().unwrap();
    assert_eq!(later.status, StepStatus::Pending);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_model_failure_aborts_then_resume_completes() {
    let store = Arc::new(MemoryStepStore::new());
    let fail = Arc::new(AtomicBool::new(true));
    let llm = research_llm(TWO_STEP_PLAN, fail.clone());
    let service = ResearchService::new(store.clone(), llm, None, false);

    let err = service.start_research("water").await.unwrap_err();
    assert!(matches!(err, ResearchError::Model(LlmError::Transport(_))));

    let queries = store.list_queries(10).await.unwrap();
    let query_id = queries[0].id.clone();
    assert_eq!(queries[0].status, QueryStatus::Running);

    let steps = all_steps(store.as_ref(), &query_id).await;
    assert_eq!(steps.len(), 5);
    assert_eq!(steps[3].status, StepStatus::Running);
    assert_eq!(steps[4].status, StepStatus::Pending);

    fail.store(false, Ordering::SeqCst);
    let query = service.resume_research(&query_id).await.unwrap();
    assert_eq!(query.status, QueryStatus::Completed);

    let steps = all_steps(store.as_ref(), &query_id).await;
    assert_eq!(steps.len(), 5);
    assert_tree_invariants(&steps);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn test_resume_after_planning_only() {
    let store = Arc::new(MemoryStepStore::new());
    let llm = research_llm(TWO_STEP_PLAN, Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm, None, false);

    // 规划步骤已创建但进程在执行前退出
    let query = store.create_query("water").await.unwrap();
    store
        .create_step(
            NewStep::new(&query.id, 1, StepType::Planning, Tool::Llm, "plan the research")
                .with_output_schema(delve::research::schema::step_list_schema()),
        )
        .await
        .unwrap();

    let query = service.resume_research(&query.id).await.unwrap();
    assert_eq!(query.status, QueryStatus::Completed);
    let steps = all_steps(store.as_ref(), &query.id).await;
    assert_eq!(steps.len(), 5);
    assert_tree_invariants(&steps);
}

#[tokio::test]
async fn test_resume_after_partial_classification() {
    let store = Arc::new(MemoryStepStore::new());
    let llm = research_llm(TWO_STEP_PLAN, Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm, None, false);

    // 规划已完成，但只写入了第一条指令的 TOOL_SELECTION
    let query = store.create_query("water").await.unwrap();
    let plan = store
        .create_step(NewStep::new(&query.id, 1, StepType::Planning, Tool::Llm, "plan"))
        .await
        .unwrap();
    store
        .update_step(&plan.id, StepUpdate::completed(TWO_STEP_PLAN))
        .await
        .unwrap();
    store
        .create_step(
            NewStep::new(&query.id, 2, StepType::ToolSelection, Tool::Llm, "choose")
                .with_parent(&plan.id)
                .with_instruction("Look up the boiling point of water")
                .with_output_schema(delve::research::schema::tool_choice_schema()),
        )
        .await
        .unwrap();

    let query = service.resume_research(&query.id).await.unwrap();
    assert_eq!(query.status, QueryStatus::Completed);

    let steps = all_steps(store.as_ref(), &query.id).await;
    let instructions: Vec<&str> = steps
        .iter()
        .filter(|s| s.step_type == StepType::ToolSelection)
        .filter_map(|s| s.instruction.as_deref())
        .collect();
    assert_eq!(
        instructions,
        vec!["Look up the boiling point of water", "Explain the result"]
    );
    assert_eq!(steps.len(), 5);
    assert_tree_invariants(&steps);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn test_sqlite_end_to_end_and_report() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(SqliteStepStore::open(dir.path().join("delve.db")).await.unwrap());
    let llm = research_llm(TWO_STEP_PLAN, Arc::new(AtomicBool::new(false)));
    let service = ResearchService::new(store.clone(), llm, None, false);

    let query = service.start_research("At what temperature does water boil?").await.unwrap();
    assert_eq!(query.status, QueryStatus::Completed);

    let steps = all_steps(store.as_ref(), &query.id).await;
    assert_eq!(steps.len(), 5);
    assert_tree_invariants(&steps);
    assert!(steps[1].output_schema.is_some());
    assert_eq!(steps[1].instruction.as_deref(), Some("Look up the boiling point of water"));

    let pending = store
        .find_steps(&StepFilter::for_query(&query.id).status(StepStatus::Pending))
        .await
        .unwrap();
    assert!(pending.is_empty());

    let report = service.report(&query.id).await.unwrap();
    assert_eq!(report.findings().len(), 2);
    let text = report.to_string();
    assert!(text.contains("[COMPLETED]"));
    assert!(text.contains("#5 [LLM]"));

    // 再次物化不会产生新步骤
    let again = delve::research::Materializer::new(store.clone(), false)
        .materialize_execution_steps(&ResearchContext::from(&query))
        .await
        .unwrap();
    assert!(again.is_empty());
}
