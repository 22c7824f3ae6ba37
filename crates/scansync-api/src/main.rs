mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;
mod seed;

use std::sync::Arc;

use config::AppConfig;
use routes::{app_router, AppState};
use scansync_core::services::SyncService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scansync_api=info".parse()?)
                .add_directive("scansync_core=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting scansync-api with config: {:?}", config);

    let service = SyncService::open_path(&config.database_path)?;
    if let Some(seed_path) = config.seed_path.as_deref() {
        let summary = seed::load_seed(&service, seed_path).await?;
        tracing::info!(
            records = summary.records,
            grants = summary.grants,
            "Applied seed file"
        );
    }

    let state = AppState::new(&config, service);
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("scansync-api listening on {}", config.bind_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
