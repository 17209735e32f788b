use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use explorer_query_backend::api::handlers::AppState;
use explorer_query_backend::api::routes::create_router_with_state;
use explorer_query_backend::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(config.logging.style != "never")
        .init();

    if config.explorer.api_key.is_none() {
        error!("EXPLORER_API_KEY is not set; queries will fail until it is configured");
    }

    info!(
        "Explorer at {} (poll every {:?}, deadline {:?})",
        config.explorer.base_url,
        config.explorer.poll_interval(),
        config.explorer.deadline()
    );

    let shutdown = CancellationToken::new();
    let addr: SocketAddr = config.server_address().parse()?;
    let state = AppState::from_config(config, shutdown.clone())?;
    let app = create_router_with_state(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

/// Wait for Ctrl-C, then tell in-flight pipelines to stop polling
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, abandoning in-flight queries");
    shutdown.cancel();
}
