use anyhow::{Context, Result};
use notenest::config::Config;
use notenest::logging::init_logging;
use notenest::server::{router, AppState};
use notenest::storage::NoteStorage;
use notenest::user_storage::UserStorage;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info");

    let config = Config::load()?;
    let state = Arc::new(AppState {
        notes: NoteStorage::open(&config.data_dir)?,
        users: UserStorage::open(&config.data_dir)?,
        public_url: config.api_url.clone(),
        password_cost: bcrypt::DEFAULT_COST,
    });

    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;

    info!("NoteNest backend running on http://{address}");
    info!("Data directory: {}", config.data_dir.display());

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}
