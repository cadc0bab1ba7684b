use anyhow::Context;
use dotenv::dotenv;
use realtime_chat_server::{AppState, Settings};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Load configuration
    let config = Settings::new().context("failed to load configuration")?;
    info!("Configuration loaded successfully ({} environment)", config.environment);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1) as usize)
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Settings) -> anyhow::Result<()> {
    let state = AppState::new(config).await.context("failed to open database")?;

    let listener = TcpListener::bind(state.config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", state.config.bind_address()))?;
    info!(
        "Chat server ready to accept connections at ws://{}{}",
        listener.local_addr()?,
        state.config.server.path
    );

    let server = state.websocket_server();
    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    state.shutdown().await?;
    info!("Server stopped");
    Ok(())
}
