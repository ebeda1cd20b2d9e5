//! 内存 Step Store（用于测试与无数据库的演示运行）

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::model::{NewStep, Query, QueryStatus, Step, StepFilter, StepOrder, StepUpdate};
use super::{StepStore, StoreError};

#[derive(Default)]
struct MemoryState {
    queries: HashMap<String, Query>,
    /// 按创建顺序保存
    steps: Vec<Step>,
}

/// 内存存储：进程退出即丢失
#[derive(Default)]
pub struct MemoryStepStore {
    state: RwLock<MemoryState>,
}

impl MemoryStepStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepStore for MemoryStepStore {
    async fn create_query(&self, value: &str) -> Result<Query, StoreError> {
        let query = Query::new(value);
        self.state
            .write()
            .await
            .queries
            .insert(query.id.clone(), query.clone());
        Ok(query)
    }

    async fn get_query(&self, query_id: &str) -> Result<Option<Query>, StoreError> {
        Ok(self.state.read().await.queries.get(query_id).cloned())
    }

    async fn set_query_status(
        &self,
        query_id: &str,
        status: QueryStatus,
    ) -> Result<Query, StoreError> {
        let mut state = self.state.write().await;
        let query = state
            .queries
            .get_mut(query_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "Query",
                id: query_id.to_string(),
            })?;
        query.status = status;
        if status == QueryStatus::Completed {
            query.ended_at = Some(Utc::now());
        }
        Ok(query.clone())
    }

    async fn list_queries(&self, limit: usize) -> Result<Vec<Query>, StoreError> {
        let state = self.state.read().await;
        let mut queries: Vec<Query> = state.queries.values().cloned().collect();
        queries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        queries.truncate(limit);
        Ok(queries)
    }

    async fn create_step(&self, step: NewStep) -> Result<Step, StoreError> {
        let mut state = self.state.write().await;
        let duplicate = state
            .steps
            .iter()
            .any(|s| s.query_id == step.query_id && s.step_number == step.step_number);
        if duplicate {
            return Err(StoreError::DuplicateStepNumber {
                query_id: step.query_id,
                step_number: step.step_number,
            });
        }
        let step = step.into_step();
        state.steps.push(step.clone());
        Ok(step)
    }

    async fn get_step(&self, step_id: &str) -> Result<Option<Step>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .steps
            .iter()
            .find(|s| s.id == step_id)
            .cloned())
    }

    async fn update_step(&self, step_id: &str, update: StepUpdate) -> Result<Step, StoreError> {
        let mut state = self.state.write().await;
        let step = state
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "Step",
                id: step_id.to_string(),
            })?;
        update.apply(step);
        Ok(step.clone())
    }

    async fn find_steps(&self, filter: &StepFilter) -> Result<Vec<Step>, StoreError> {
        let state = self.state.read().await;
        let parents: HashSet<&str> = if filter.childless {
            state
                .steps
                .iter()
                .filter_map(|s| s.parent_step_id.as_deref())
                .collect()
        } else {
            HashSet::new()
        };

        let mut steps: Vec<Step> = state
            .steps
            .iter()
            .filter(|s| filter.matches(s))
            .filter(|s| !filter.childless || !parents.contains(s.id.as_str()))
            .cloned()
            .collect();

        match filter.order {
            StepOrder::Ascending => steps.sort_by_key(|s| s.step_number),
            StepOrder::Descending => steps.sort_by_key(|s| std::cmp::Reverse(s.step_number)),
        }
        if let Some(limit) = filter.limit {
            steps.truncate(limit);
        }
        Ok(steps)
    }

    async fn count_steps(&self, query_id: &str) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state.steps.iter().filter(|s| s.query_id == query_id).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StepStatus, StepType, Tool};

    async fn seed(store: &MemoryStepStore) -> (Query, Step, Step, Step) {
        let query = store.create_query("why is the sky blue").await.unwrap();
        let plan = store
            .create_step(NewStep::new(&query.id, 1, StepType::Planning, Tool::Llm, "plan"))
            .await
            .unwrap();
        let a = store
            .create_step(
                NewStep::new(&query.id, 2, StepType::ToolSelection, Tool::Llm, "a")
                    .with_parent(&plan.id),
            )
            .await
            .unwrap();
        let b = store
            .create_step(
                NewStep::new(&query.id, 3, StepType::ToolSelection, Tool::Llm, "b")
                    .with_parent(&plan.id),
            )
            .await
            .unwrap();
        (query, plan, a, b)
    }

    #[tokio::test]
    async fn test_query_lifecycle() {
        let store = MemoryStepStore::new();
        let query = store.create_query("q").await.unwrap();
        assert_eq!(query.status, QueryStatus::Pending);
        assert!(query.ended_at.is_none());

        let query = store
            .set_query_status(&query.id, QueryStatus::Completed)
            .await
            .unwrap();
        assert_eq!(query.status, QueryStatus::Completed);
        assert!(query.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_step_number_rejected() {
        let store = MemoryStepStore::new();
        let (query, ..) = seed(&store).await;
        let err = store
            .create_step(NewStep::new(&query.id, 2, StepType::Llm, Tool::Llm, "dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateStepNumber { step_number: 2, .. }));
    }

    #[tokio::test]
    async fn test_childless_anti_join() {
        let store = MemoryStepStore::new();
        let (query, _plan, a, b) = seed(&store).await;
        store
            .create_step(NewStep::new(&query.id, 4, StepType::Llm, Tool::Llm, "child").with_parent(&a.id))
            .await
            .unwrap();

        let filter = StepFilter::for_query(&query.id)
            .step_type(StepType::ToolSelection)
            .childless();
        let steps = store.find_steps(&filter).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].id, b.id);
    }

    #[tokio::test]
    async fn test_first_pending_and_next_number() {
        let store = MemoryStepStore::new();
        let (query, plan, a, _b) = seed(&store).await;
        store
            .update_step(&plan.id, StepUpdate::completed("{}"))
            .await
            .unwrap();

        let filter = StepFilter::for_query(&query.id).status(StepStatus::Pending);
        let next = store.find_first_step(&filter).await.unwrap().unwrap();
        assert_eq!(next.id, a.id);
        assert_eq!(store.next_step_number(&query.id).await.unwrap(), 4);
        assert_eq!(store.count_steps(&query.id).await.unwrap(), 3);
        assert_eq!(store.next_step_number("missing").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_step() {
        let store = MemoryStepStore::new();
        let err = store
            .update_step("nope", StepUpdate::running())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "Step", .. }));
    }
}
