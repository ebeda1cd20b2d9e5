//! Delve - 基于 LLM 的多步研究编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 顶层错误类型
//! - **llm**: 模型客户端抽象与实现（Ollama / OpenAI 兼容 / Mock）
//! - **observability**: 日志初始化
//! - **research**: 规划、工具选择、执行步骤物化与编排循环
//! - **search**: Web 搜索后端与结果缓存
//! - **store**: Query / Step 持久化（内存 / SQLite）

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod research;
pub mod search;
pub mod store;

pub use crate::core::ResearchError;
pub use research::{ResearchContext, ResearchService};
