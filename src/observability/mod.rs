//! 可观测性：tracing 日志初始化
//!
//! RUST_LOG 优先；未设置时使用配置中的 [logging].level。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化（如测试中）时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
