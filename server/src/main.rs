//! tvh-gateway Server - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use tvh_gateway::{api, clock::SystemClock, config, db};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tvh_gateway=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        forward_auth = config.forward_auth.enabled,
        "Starting tvh-gateway"
    );

    // Initialize database
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    let repos = db::Repositories::from_store(Arc::new(db::PgStore::new(db_pool)));
    let bind_address = config.bind_address.clone();

    // Build application state
    let state = api::AppState::new(config, repos, Arc::new(SystemClock));

    // Expired session sweeper
    let cleaner = state.sessions.cleaner().start();

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    cleaner.stop().await;
    info!("Server shutdown complete");

    Ok(())
}
