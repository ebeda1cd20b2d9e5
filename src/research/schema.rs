//! 结构化输出契约：计划步骤列表与工具选择
//!
//! Schema 由 schemars 生成并随 Step 落库（outputSchema），作为提示交给模型；
//! 模型回复并不保证符合 schema，因此解析结果是 StructuredOutput，调用方可区分
//! 「没有回复」「解析失败」「解析成功但为空」。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 计划中的一个原子步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    pub step_number: i64,
    pub step_instruction: String,
}

/// 规划步骤的输出：`{"steps": [{"stepNumber": 1, "stepInstruction": "..."}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepList {
    pub steps: Vec<PlannedStep>,
}

impl StepList {
    /// 按计划顺序取出指令文本
    pub fn instructions(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.step_instruction.as_str())
    }
}

/// 可选工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChosenTool {
    Llm,
    WebSearch,
}

/// 工具选择步骤的输出：`{"tool": "llm" | "web_search"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ToolChoice {
    pub tool: ChosenTool,
}

/// 模型结构化输出的解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredOutput<T> {
    Parsed(T),
    /// 步骤没有 response
    Missing,
    /// response 无法按契约解析
    Malformed { raw: String, error: String },
}

impl<T> StructuredOutput<T> {
    pub fn parsed(self) -> Option<T> {
        match self {
            StructuredOutput::Parsed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, StructuredOutput::Malformed { .. })
    }
}

/// 生成内联（无 $ref）的 JSON Schema，便于本地模型的 format 参数直接使用
fn inline_schema<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();
    serde_json::to_value(&schema).unwrap_or(Value::Null)
}

/// 步骤列表契约的 JSON Schema
pub fn step_list_schema() -> Value {
    inline_schema::<StepList>()
}

/// 工具选择契约的 JSON Schema
pub fn tool_choice_schema() -> Value {
    inline_schema::<ToolChoice>()
}

/// 从回复中截取 JSON：```json 代码块优先，其次首个 `{` 到最后一个 `}`
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// 按契约解析模型回复
pub fn parse_structured<T: DeserializeOwned>(response: Option<&str>) -> StructuredOutput<T> {
    let raw = match response {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return StructuredOutput::Missing,
    };
    // 整段即合法 JSON 时不做截取，避免字符串内的 ```json 被当作代码块
    if let Ok(value) = serde_json::from_str::<T>(raw.trim()) {
        return StructuredOutput::Parsed(value);
    }
    match serde_json::from_str::<T>(extract_json(raw)) {
        Ok(value) => StructuredOutput::Parsed(value),
        Err(e) => StructuredOutput::Malformed {
            raw: raw.to_string(),
            error: e.to_string(),
        },
    }
}

pub fn parse_step_list(response: Option<&str>) -> StructuredOutput<StepList> {
    parse_structured(response)
}

pub fn parse_tool_choice(response: Option<&str>) -> StructuredOutput<ToolChoice> {
    parse_structured(response)
}
