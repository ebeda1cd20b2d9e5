//! Delve - 基于 LLM 的多步研究编排器
//!
//! 入口：加载配置与日志，打开 SQLite，组装模型 / 搜索后端后执行子命令。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use delve::config::{load_config, AppConfig};
use delve::llm::create_llm_from_config;
use delve::search::{create_search_from_config, SearchCache, SearchClient, SqliteSearchCache};
use delve::store::{SqliteStepStore, StepStore};
use delve::{observability, ResearchService};

#[derive(Parser)]
#[command(name = "delve")]
#[command(about = "Multi-step LLM research orchestrator")]
#[command(version)]
struct Cli {
    /// 额外的 TOML 配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a question end to end
    Run {
        /// The question to research
        query: String,
    },

    /// Continue an interrupted query from its persisted state
    Resume {
        query_id: String,
    },

    /// Print the step tree of a query
    Show {
        query_id: String,
    },

    /// List recent queries
    List {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Run a single web search through the configured backend and cache
    Search {
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = match load_config(cli.config.clone()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config ({}), using defaults", e);
            AppConfig::default()
        }
    };
    observability::init(&cfg.logging.level);

    let store = SqliteStepStore::connect(&cfg.database.url, cfg.database.max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", cfg.database.url))?;
    let cache = SqliteSearchCache::new(store.pool().clone())
        .await
        .context("Failed to prepare search cache")?;
    match cache.purge_expired().await {
        Ok(0) => {}
        Ok(n) => tracing::debug!(purged = n, "expired search cache entries removed"),
        Err(e) => tracing::warn!("search cache purge failed: {}", e),
    }
    let cache: Arc<dyn SearchCache> = Arc::new(cache);
    let store: Arc<dyn StepStore> = Arc::new(store);

    let llm = create_llm_from_config(&cfg);
    let search = create_search_from_config(&cfg, cache);
    let service = ResearchService::from_config(&cfg, store, llm.clone(), search.clone());

    let query_id = match cli.command {
        Commands::Run { query } => {
            service
                .start_research(&query)
                .await
                .context("Research failed")?
                .id
        }
        Commands::Resume { query_id } => {
            service
                .resume_research(&query_id)
                .await
                .context("Resume failed")?
                .id
        }
        Commands::Show { query_id } => query_id,
        Commands::List { limit } => {
            let queries = service
                .list_queries(limit)
                .await
                .context("Failed to list queries")?;
            for q in queries {
                let started = q
                    .started_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("{}  {:<9}  {}  {}", q.id, q.status.as_str(), started, q.value);
            }
            return Ok(());
        }
        Commands::Search { query } => {
            let search = search.context("Web search is not configured")?;
            let results = search.search(&query).await.context("Search failed")?;
            for (i, r) in results.iter().enumerate() {
                println!("{}. {}\n   {}\n   {}", i + 1, r.title, r.link, r.snippet);
            }
            return Ok(());
        }
    };

    let report = service
        .report(&query_id)
        .await
        .context("Failed to load report")?;
    println!("{}", report);

    let (prompt, completion, total) = llm.token_usage();
    if total > 0 {
        tracing::info!(prompt, completion, total, model = llm.model_name(), "token usage");
    }

    Ok(())
}
