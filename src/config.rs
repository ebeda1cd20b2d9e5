//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DELVE__*` 覆盖（双下划线表示嵌套，如 `DELVE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub database: DatabaseSection,
    pub llm: LlmSection,
    pub search: SearchSection,
    pub research: ResearchSection,
    pub logging: LoggingSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [database] 段：SQLite 连接
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://delve.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：ollama / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "llama3.1".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）；本地模型生成较慢
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// [search] 段：搜索后端与结果缓存
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    /// google / none
    #[serde(default = "default_search_provider")]
    pub provider: String,
    /// 未设置时读取 GOOGLE_SEARCH_API_KEY
    pub api_key: Option<String>,
    /// 未设置时读取 GOOGLE_SEARCH_ID
    pub engine_id: Option<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_search_provider() -> String {
    "google".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    60 * 60 * 48
}

fn default_search_timeout_secs() -> u64 {
    15
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            api_key: None,
            engine_id: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

impl SearchSection {
    /// 解析 Google 凭据：配置优先，其次环境变量；缺任一项返回 None
    pub fn google_credentials(&self) -> Option<(String, String)> {
        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("GOOGLE_SEARCH_API_KEY").ok())?;
        let engine_id = self
            .engine_id
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("GOOGLE_SEARCH_ID").ok())?;
        Some((api_key, engine_id))
    }
}

/// [research] 段：编排行为
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResearchSection {
    /// 为 true 时，选择 web_search 的步骤以 WEB_SEARCH 工具执行；默认仍交给 LLM
    #[serde(default)]
    pub route_web_search: bool,
}

/// [logging] 段
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// RUST_LOG 未设置时使用
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 DELVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DELVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DELVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.database.url, "sqlite://delve.db");
        assert_eq!(cfg.llm.provider, "ollama");
        assert_eq!(cfg.search.cache_ttl_secs, 172_800);
        assert!(!cfg.research.route_web_search);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[llm]\nprovider = \"mock\"\n\n[research]\nroute_web_search = true\n\n[search]\ncache_ttl_secs = 60"
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert!(cfg.research.route_web_search);
        assert_eq!(cfg.search.cache_ttl_secs, 60);
        // 未出现的键保持默认
        assert_eq!(cfg.llm.timeouts.request, 300);
    }

    #[test]
    fn test_google_credentials_from_config() {
        let section = SearchSection {
            api_key: Some("key".into()),
            engine_id: Some("cx".into()),
            ..SearchSection::default()
        };
        assert_eq!(
            section.google_credentials(),
            Some(("key".to_string(), "cx".to_string()))
        );
    }
}
