use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use server::config::Config;
use server::state::AppState;
use server::build_router;
use provider::http_client::HttpChatProviderConfig;
use provider::{ChatProvider, HttpChatProvider};
use sandbox::SandboxConfig;
use store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agentcore_server=info,tower_http=info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = Config::from_env();
    tracing::info!(
        bind_addr = %config.bind_addr,
        database_url = %config.database_url,
        sandbox_base_dir = %config.sandbox_base_dir,
        agent_loop = config.enable_agent_loop,
        "starting agentcore-server"
    );

    let store = SqliteStore::connect(&config.database_url)
        .await
        .context("failed to open sqlite store")?;

    let provider = HttpChatProvider::new(HttpChatProviderConfig {
        base_url: config.provider_base_url.clone(),
        api_key: config.provider_api_key.clone(),
        model: if config.enable_streaming_reasoning {
            config.reasoning_model.clone()
        } else {
            config.non_reasoning_model.clone()
        },
        request_timeout: Duration::from_secs(120),
    });

    let sandbox_config = SandboxConfig::new(config.sandbox_base_dir.clone())
        .with_max_file_size(config.max_file_size_mb * 1024 * 1024)
        .with_max_session_size(config.max_sandbox_size_mb * 1024 * 1024);

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        chat_history: Arc::new(store.clone()),
        steps: Arc::new(store.clone()),
        tasks: Arc::new(store.clone()),
        provider: Arc::new(provider) as Arc<dyn ChatProvider>,
        sandbox_config,
        config,
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}
