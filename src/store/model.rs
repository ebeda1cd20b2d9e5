//! 持久化记录：Query、Step 及其状态 / 类型枚举
//!
//! 枚举以大写字符串落库（PENDING、TOOL_SELECTION、WEB_SEARCH ...），与审计工具直接可读。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query ID
pub type QueryId = String;
/// Step ID
pub type StepId = String;

/// Query 状态：PENDING → RUNNING → COMPLETED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Pending,
    Running,
    Completed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "PENDING",
            QueryStatus::Running => "RUNNING",
            QueryStatus::Completed => "COMPLETED",
        }
    }
}

impl FromStr for QueryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(QueryStatus::Pending),
            "RUNNING" => Ok(QueryStatus::Running),
            "COMPLETED" => Ok(QueryStatus::Completed),
            other => Err(format!("invalid query status: {}", other)),
        }
    }
}

/// Step 状态
///
/// 正常流转为 PENDING → RUNNING → COMPLETED；FAILED 仅用于无法执行的 WEB_SEARCH 步骤
/// （未配置搜索后端），属于终态，不会阻塞 drain。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StepStatus::Pending),
            "RUNNING" => Ok(StepStatus::Running),
            "COMPLETED" => Ok(StepStatus::Completed),
            "FAILED" => Ok(StepStatus::Failed),
            other => Err(format!("invalid step status: {}", other)),
        }
    }
}

/// Step 存在的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Planning,
    ToolSelection,
    Llm,
    WebSearch,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Planning => "PLANNING",
            StepType::ToolSelection => "TOOL_SELECTION",
            StepType::Llm => "LLM",
            StepType::WebSearch => "WEB_SEARCH",
        }
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLANNING" => Ok(StepType::Planning),
            "TOOL_SELECTION" => Ok(StepType::ToolSelection),
            "LLM" => Ok(StepType::Llm),
            "WEB_SEARCH" => Ok(StepType::WebSearch),
            other => Err(format!("invalid step type: {}", other)),
        }
    }
}

/// Step 的执行方式
///
/// 库中出现的其它取值解码为 Unrecognized，由执行器报 UnknownTool（致命配置错误），
/// 而不是在读取时丢弃该行。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    Llm,
    WebSearch,
    Unrecognized(String),
}

impl Tool {
    pub fn as_str(&self) -> &str {
        match self {
            Tool::Llm => "LLM",
            Tool::WebSearch => "WEB_SEARCH",
            Tool::Unrecognized(raw) => raw.as_str(),
        }
    }
}

impl From<&str> for Tool {
    fn from(s: &str) -> Self {
        match s {
            "LLM" => Tool::Llm,
            "WEB_SEARCH" => Tool::WebSearch,
            other => Tool::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次研究请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    /// 原始问题
    pub value: String,
    pub status: QueryStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Query {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            value: value.into(),
            status: QueryStatus::Pending,
            started_at: Some(Utc::now()),
            ended_at: None,
        }
    }
}

/// Query 下的一个工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub query_id: QueryId,
    /// 派生出本步骤的父步骤；形成森林而非平铺列表
    pub parent_step_id: Option<StepId>,
    /// 同一 Query 内唯一且单调递增，创建时分配，是唯一的执行排序键
    pub step_number: i64,
    pub step_type: StepType,
    pub tool: Tool,
    /// 本步骤源自的计划指令（TOOL_SELECTION 及其子步骤）
    pub instruction: Option<String>,
    /// 渲染后的完整 prompt
    pub description: String,
    pub output_schema: Option<Value>,
    pub response: Option<String>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// 创建 Step 的参数（id、状态由 store 分配）
#[derive(Debug, Clone)]
pub struct NewStep {
    pub query_id: QueryId,
    pub parent_step_id: Option<StepId>,
    pub step_number: i64,
    pub step_type: StepType,
    pub tool: Tool,
    pub instruction: Option<String>,
    pub description: String,
    pub output_schema: Option<Value>,
}

impl NewStep {
    pub fn new(
        query_id: impl Into<QueryId>,
        step_number: i64,
        step_type: StepType,
        tool: Tool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            parent_step_id: None,
            step_number,
            step_type,
            tool,
            instruction: None,
            description: description.into(),
            output_schema: None,
        }
    }

    pub fn with_parent(mut self, parent_step_id: impl Into<StepId>) -> Self {
        self.parent_step_id = Some(parent_step_id.into());
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub(crate) fn into_step(self) -> Step {
        Step {
            id: uuid::Uuid::new_v4().to_string(),
            query_id: self.query_id,
            parent_step_id: self.parent_step_id,
            step_number: self.step_number,
            step_type: self.step_type,
            tool: self.tool,
            instruction: self.instruction,
            description: self.description,
            output_schema: self.output_schema,
            response: None,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
        }
    }
}

/// Step 的部分更新；None 字段保持原值
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    pub status: Option<StepStatus>,
    pub response: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepUpdate {
    pub fn running() -> Self {
        Self {
            status: Some(StepStatus::Running),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn completed(response: impl Into<String>) -> Self {
        Self {
            status: Some(StepStatus::Completed),
            response: Some(response.into()),
            ended_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(StepStatus::Failed),
            response: Some(reason.into()),
            ended_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn status(status: StepStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub(crate) fn apply(self, step: &mut Step) {
        if let Some(status) = self.status {
            step.status = status;
        }
        if let Some(response) = self.response {
            step.response = Some(response);
        }
        if let Some(started_at) = self.started_at {
            step.started_at = Some(started_at);
        }
        if let Some(ended_at) = self.ended_at {
            step.ended_at = Some(ended_at);
        }
    }
}

/// 按 step_number 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepOrder {
    #[default]
    Ascending,
    Descending,
}

/// Step 查询条件
#[derive(Debug, Clone)]
pub struct StepFilter {
    pub query_id: QueryId,
    pub step_type: Option<StepType>,
    pub status: Option<StepStatus>,
    /// step_number 下界（含）
    pub min_step_number: Option<i64>,
    /// step_number 上界（含）
    pub max_step_number: Option<i64>,
    /// 仅返回没有子步骤的 Step（按 parent_step_id 反连接）
    pub childless: bool,
    pub order: StepOrder,
    pub limit: Option<usize>,
}

impl StepFilter {
    pub fn for_query(query_id: impl Into<QueryId>) -> Self {
        Self {
            query_id: query_id.into(),
            step_type: None,
            status: None,
            min_step_number: None,
            max_step_number: None,
            childless: false,
            order: StepOrder::Ascending,
            limit: None,
        }
    }

    pub fn step_type(mut self, step_type: StepType) -> Self {
        self.step_type = Some(step_type);
        self
    }

    pub fn status(mut self, status: StepStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn step_number(mut self, step_number: i64) -> Self {
        self.min_step_number = Some(step_number);
        self.max_step_number = Some(step_number);
        self
    }

    pub fn step_numbers(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min_step_number = min;
        self.max_step_number = max;
        self
    }

    pub fn childless(mut self) -> Self {
        self.childless = true;
        self
    }

    pub fn order(mut self, order: StepOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 除 childless 外的字段匹配（反连接需要整张表，由 store 处理）
    pub(crate) fn matches(&self, step: &Step) -> bool {
        step.query_id == self.query_id
            && self.step_type.map_or(true, |t| step.step_type == t)
            && self.status.map_or(true, |s| step.status == s)
            && self.min_step_number.map_or(true, |n| step.step_number >= n)
            && self.max_step_number.map_or(true, |n| step.step_number <= n)
    }
}
