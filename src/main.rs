use std::sync::Arc;

use bidcast::{
    api::{self, AppState},
    broker::{Broker, RoundConfig},
    config::AppConfig,
    journal::Journal,
    logger::init_tracing,
    metrics::counters::Counters,
    registry::Registry,
    storage::{SqliteStorage, Storage},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting bidcast broker...");

    let cfg = AppConfig::from_env();
    if cfg.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN is not set; admin endpoints are disabled");
    }

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::connect(&cfg.database_url).await?);

    let registry = Arc::new(Registry::new(storage.clone(), cfg.start_balance));
    let journal = Arc::new(Journal::new(storage.clone()));
    let broker = Arc::new(Broker::new(
        storage,
        RoundConfig::from_app(&cfg),
        Counters::default(),
    ));

    let state = AppState {
        broker,
        registry,
        journal,
        admin_token: cfg.admin_token.clone(),
    };

    tracing::info!(
        threshold = cfg.batch_threshold,
        timeout_ms = cfg.round_timeout_ms,
        "broker ready"
    );

    api::serve(cfg.bind_addr, state, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = ?e, "failed to listen for shutdown signal"),
    }
}
