//! 研究编排器：Query 级状态机
//!
//! PENDING →（规划 + 工具选择）→ RUNNING →（drain）→ COMPLETED
//!
//! 依赖关系不做显式图遍历：drain 每次取 step_number 最小的 PENDING 步骤。
//! 这依赖一个不变量：新步骤的编号永远不低于任何仍在 PENDING 的步骤
//! （创建顺序即 规划 → 工具选择 → 物化，编号均取 max + 1）。
//! 引入并行扇出时必须重新审视这一点，违反它会导致无声的乱序执行。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::ResearchError;
use crate::llm::LlmClient;
use crate::research::classifier::ToolClassifier;
use crate::research::executor::StepExecutor;
use crate::research::materialize::Materializer;
use crate::research::planner::Planner;
use crate::research::report::QueryReport;
use crate::research::ResearchContext;
use crate::search::SearchClient;
use crate::store::{Query, QueryStatus, StepFilter, StepStatus, StepStore, StepType, StepUpdate};

/// 编排服务；自身无可变状态，可在多个 Query 间并发使用
pub struct ResearchService {
    store: Arc<dyn StepStore>,
    executor: Arc<StepExecutor>,
    planner: Planner,
    classifier: ToolClassifier,
    materializer: Materializer,
}

impl ResearchService {
    pub fn new(
        store: Arc<dyn StepStore>,
        llm: Arc<dyn LlmClient>,
        search: Option<Arc<dyn SearchClient>>,
        route_web_search: bool,
    ) -> Self {
        let executor = Arc::new(StepExecutor::new(store.clone(), llm, search));
        Self {
            planner: Planner::new(store.clone(), executor.clone()),
            classifier: ToolClassifier::new(store.clone()),
            materializer: Materializer::new(store.clone(), route_web_search),
            executor,
            store,
        }
    }

    pub fn from_config(
        cfg: &AppConfig,
        store: Arc<dyn StepStore>,
        llm: Arc<dyn LlmClient>,
        search: Option<Arc<dyn SearchClient>>,
    ) -> Self {
        Self::new(store, llm, search, cfg.research.route_web_search)
    }

    /// 开始一次新的研究；每次调用都会创建新的 Query
    pub async fn start_research(&self, query: &str) -> Result<Query, ResearchError> {
        let record = self.store.create_query(query).await?;
        let ctx = ResearchContext::from(&record);
        tracing::info!(query_id = %ctx.query_id, "starting research");

        self.planner.create_plan(&ctx).await?;
        self.classifier.create_tool_selection_steps(&ctx).await?;
        self.run_to_completion(&ctx).await
    }

    /// 根据库中状态继续一次中断的研究
    pub async fn resume_research(&self, query_id: &str) -> Result<Query, ResearchError> {
        let record = self
            .store
            .get_query(query_id)
            .await?
            .ok_or_else(|| ResearchError::QueryNotFound(query_id.to_string()))?;
        if record.status == QueryStatus::Completed {
            tracing::info!(query_id = %query_id, "query already completed");
            return Ok(record);
        }
        let ctx = ResearchContext::from(&record);
        tracing::info!(query_id = %ctx.query_id, status = record.status.as_str(), "resuming research");

        // 中断时处于 RUNNING 的步骤没有结果，重新排队
        let interrupted = self
            .store
            .find_steps(&StepFilter::for_query(&ctx.query_id).status(StepStatus::Running))
            .await?;
        for step in &interrupted {
            tracing::warn!(step_number = step.step_number, "re-queueing interrupted step");
            self.store
                .update_step(&step.id, StepUpdate::status(StepStatus::Pending))
                .await?;
        }

        let planning = self
            .store
            .find_first_step(&StepFilter::for_query(&ctx.query_id).step_type(StepType::Planning))
            .await?;
        match planning {
            None => {
                self.planner.create_plan(&ctx).await?;
            }
            Some(step) if step.status == StepStatus::Pending => {
                self.executor.execute_step(&step).await?;
            }
            Some(_) => {}
        }
        // 分类可重复执行：只补齐中断前未创建的 TOOL_SELECTION
        self.classifier.create_tool_selection_steps(&ctx).await?;

        self.run_to_completion(&ctx).await
    }

    /// 阶段 4-7：RUNNING、drain、物化、再 drain、COMPLETED
    async fn run_to_completion(&self, ctx: &ResearchContext) -> Result<Query, ResearchError> {
        self.store
            .set_query_status(&ctx.query_id, QueryStatus::Running)
            .await?;

        let executed = self.drain(ctx).await?;
        tracing::info!(query_id = %ctx.query_id, executed, "tool selection drain finished");

        self.materializer.materialize_execution_steps(ctx).await?;

        let executed = self.drain(ctx).await?;
        tracing::info!(query_id = %ctx.query_id, executed, "execution drain finished");

        self.ensure_all_terminal(ctx).await?;
        let query = self
            .store
            .set_query_status(&ctx.query_id, QueryStatus::Completed)
            .await?;
        tracing::info!(query_id = %ctx.query_id, "research completed");
        Ok(query)
    }

    /// 反复执行编号最小的 PENDING 步骤直到没有剩余，返回执行数量
    pub async fn drain(&self, ctx: &ResearchContext) -> Result<usize, ResearchError> {
        let mut executed = 0;
        while let Some(step) = self.next_step(ctx).await? {
            let step = self.executor.execute_step(&step).await?;
            tracing::info!(
                query_id = %ctx.query_id,
                step_number = step.step_number,
                status = step.status.as_str(),
                "step finished"
            );
            executed += 1;
        }
        Ok(executed)
    }

    /// COMPLETED 的前提：所有步骤都已 COMPLETED 或 FAILED
    async fn ensure_all_terminal(&self, ctx: &ResearchContext) -> Result<(), ResearchError> {
        let remaining = self
            .store
            .find_steps(&StepFilter::for_query(&ctx.query_id))
            .await?
            .iter()
            .filter(|s| !s.status.is_terminal())
            .count();
        if remaining > 0 {
            return Err(ResearchError::Unfinished {
                query_id: ctx.query_id.clone(),
                remaining,
            });
        }
        Ok(())
    }

    async fn next_step(
        &self,
        ctx: &ResearchContext,
    ) -> Result<Option<crate::store::Step>, ResearchError> {
        let filter = StepFilter::for_query(&ctx.query_id).status(StepStatus::Pending);
        Ok(self.store.find_first_step(&filter).await?)
    }

    /// 读取 Query 及其全部步骤（按编号排序）
    pub async fn report(&self, query_id: &str) -> Result<QueryReport, ResearchError> {
        let query = self
            .store
            .get_query(query_id)
            .await?
            .ok_or_else(|| ResearchError::QueryNotFound(query_id.to_string()))?;
        let steps = self
            .store
            .find_steps(&StepFilter::for_query(query_id))
            .await?;
        Ok(QueryReport { query, steps })
    }

    pub async fn list_queries(&self, limit: usize) -> Result<Vec<Query>, ResearchError> {
        Ok(self.store.list_queries(limit).await?)
    }
}
