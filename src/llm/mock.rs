//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! - MockLlmClient：按请求的 schema 返回固定回复（两步计划 / 选 llm / 回显）
//! - ScriptedLlmClient：由闭包决定回复，并记录每次调用，供测试断言

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError};

/// format 是否要求步骤列表
pub fn wants_step_list(format: Option<&Value>) -> bool {
    format
        .and_then(|f| f.get("properties"))
        .map_or(false, |p| p.get("steps").is_some())
}

/// format 是否要求工具选择
pub fn wants_tool_choice(format: Option<&Value>) -> bool {
    format
        .and_then(|f| f.get("properties"))
        .map_or(false, |p| p.get("tool").is_some())
}

/// Mock 客户端：计划固定两步，工具固定 llm，其余回显 prompt 首行
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str, format: Option<&Value>) -> Result<String, LlmError> {
        if wants_step_list(format) {
            return Ok(r#"{"steps":[{"stepNumber":1,"stepInstruction":"Collect background facts for the question"},{"stepNumber":2,"stepInstruction":"Summarize the findings"}]}"#.to_string());
        }
        if wants_tool_choice(format) {
            return Ok(r#"{"tool":"llm"}"#.to_string());
        }
        let first_line = prompt
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("(empty prompt)");
        Ok(format!("Echo from Mock: {}", first_line))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 一次调用记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub format: Option<Value>,
}

type Responder = dyn Fn(&str, Option<&Value>) -> Result<String, LlmError> + Send + Sync;

/// 脚本化客户端：回复由 responder 闭包生成
pub struct ScriptedLlmClient {
    responder: Box<Responder>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlmClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, Option<&Value>) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str, format: Option<&Value>) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                prompt: prompt.to_string(),
                format: format.cloned(),
            });
        }
        (self.responder)(prompt, format)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
