//! LLM 层：客户端抽象与实现（Ollama / OpenAI 兼容 / Mock）

pub mod mock;
pub mod ollama;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use mock::{MockLlmClient, RecordedCall, ScriptedLlmClient};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmError, TokenUsage};

/// 根据配置选择 LLM 后端；未知 provider 回退到 Mock 并告警
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let llm = &cfg.llm;
    match llm.provider.to_lowercase().as_str() {
        "ollama" => {
            tracing::info!("Using Ollama LLM ({})", llm.model);
            Arc::new(OllamaClient::new(
                llm.base_url.as_deref(),
                &llm.model,
                llm.timeouts.request,
            ))
        }
        "openai" => {
            tracing::info!("Using OpenAI-compatible LLM ({})", llm.model);
            Arc::new(OpenAiClient::new(
                llm.base_url.as_deref(),
                &llm.model,
                llm.api_key.as_deref(),
            ))
        }
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        other => {
            tracing::warn!("Unknown LLM provider '{}', using Mock LLM", other);
            Arc::new(MockLlmClient)
        }
    }
}
