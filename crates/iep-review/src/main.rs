use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use iep_common::agent::AgentClient;
use iep_common::redis::RedisCache;
use iep_common::response_log::ResponseLog;
use iep_review::config::Config;
use iep_review::gateway::AgentService;
use iep_review::orchestrator::Orchestrator;
use iep_review::rate_limit::RateLimiter;
use iep_review::store::DocumentStore;
use iep_review::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting iep-review service");

    // 1. Load config from environment
    let config = Config::from_env()?;
    info!(
        base_url = %config.agent.base_url,
        mode = config.workflow.mode.as_str(),
        fallbacks = config.workflow.fallbacks,
        timeout_ms = config.agent.default_timeout.as_millis(),
        upload_timeout_ms = config.agent.upload_timeout.as_millis(),
        max_retries = config.agent.max_retries,
        redis = config.redis_url.is_some(),
        "configuration loaded"
    );

    // 2. Connect to Redis (optional, documents stay in memory without it)
    let redis_cache = RedisCache::new(config.redis_url.as_deref());
    if redis_cache.is_available().await {
        info!("redis connected");
    } else {
        info!("redis unavailable, keeping documents in memory only");
    }
    let store = Arc::new(DocumentStore::new(redis_cache));
    store.load().await;

    // 3. Build the agent gateway
    let client = AgentClient::new(config.agent.clone())?;
    let response_log = Arc::new(ResponseLog::new(config.response_log_path.clone()));
    info!(path = %response_log.path().display(), "agent response log ready");
    let limiter = RateLimiter::new(config.rate_limit_rps, config.rate_limit_max_wait);
    if let Some(limiter) = &limiter {
        info!(
            rps = limiter.rps(),
            max_wait_ms = limiter.max_wait().as_millis() as u64,
            "outbound rate limiting enabled"
        );
    }
    let gateway = Arc::new(AgentService::new(client, response_log, limiter));

    // 4. Build the router and serve
    let orchestrator = Arc::new(Orchestrator::new(gateway, config.workflow));
    let app = build_router(AppState::new(store, orchestrator));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server ready");
    axum::serve(listener, app).await.inspect_err(|e| {
        tracing::error!(error = %e, "HTTP server error");
    })?;

    info!("HTTP server shut down");
    Ok(())
}
