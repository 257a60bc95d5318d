use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zhenpin_core::api;
use zhenpin_core::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ----------------------------------------------------------------
    // 0. 日志 (RUST_LOG 控制级别，默认 info)
    // ----------------------------------------------------------------
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ----------------------------------------------------------------
    // 1. 加载配置
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    tracing::info!(
        "⚙️  配置加载完成: Host={}:{}, workers={}, timeout={}ms, threshold={}",
        config.host,
        config.port,
        config.aggregation.worker_count(),
        config.aggregation.criterion_timeout_ms,
        config.analyzer.match_threshold
    );
    match &config.image_root {
        Some(root) => tracing::info!("🖼️  图片目录: {}", root.display()),
        None => tracing::warn!("⚠️ 未设置 ZHENPIN_IMAGE_ROOT：比对接口可读取任意路径，只适合本地开发"),
    }

    // ----------------------------------------------------------------
    // 2. 初始化各引擎（共享状态）
    // ----------------------------------------------------------------
    tracing::info!("🛡️ [真品 Zhenpin] 鉴定决策服务启动中...");
    let shared_state = Arc::new(api::AppState::from_config(&config));
    tracing::info!(
        "📚 已知可信域名 {} 个, 已知品牌 {} 个",
        shared_state.trust.trusted_domains().len(),
        shared_state.brands.table().entries().len()
    );

    // ----------------------------------------------------------------
    // 3. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let app = api::app(shared_state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("🚀 API 服务已运行在: http://{}", addr);
    tracing::info!("   - POST /trust/rank   : 搜索结果按来源可信度排序");
    tracing::info!("   - POST /brand        : 品牌识别");
    tracing::info!("   - POST /compare      : 两张图相似度比对");
    tracing::info!("   - POST /authenticate : 完整鉴定报告");

    axum::serve(listener, app).await?;

    Ok(())
}
