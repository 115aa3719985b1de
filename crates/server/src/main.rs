mod api;
mod bootstrap;
mod health;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use guru_core::config::{AppConfig, LoadOptions};
use guru_core::ingest::IngestionPipeline;
use guru_db::{SqlCampaignRepository, SqlCustomerStore, SqlIntegrationRepository};
use guru_delmatch::{DelMatchClient, TokenProvider};
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use guru_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let config = app.config;

    let customers = Arc::new(SqlCustomerStore::new(app.db_pool.clone()));
    let integrations = Arc::new(SqlIntegrationRepository::new(app.db_pool.clone()));
    let pipeline = Arc::new(IngestionPipeline::new(
        customers.clone(),
        integrations.clone(),
        config.ingest_settings(),
    ));
    let tokens = TokenProvider::new(DelMatchClient::new(&config.delmatch)?, integrations.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = config.sync.enabled.then(|| {
        Arc::new(scheduler::PeriodicSync::new(
            pipeline.clone(),
            tokens.clone(),
            integrations.clone(),
            customers.clone(),
        ))
        .spawn(Duration::from_secs(config.sync.tick_secs), shutdown_rx)
    });

    let state = api::ApiState {
        customers,
        integrations,
        campaigns: Arc::new(SqlCampaignRepository::new(app.db_pool.clone())),
        pipeline,
        tokens,
        sync_interval_minutes: config.sync.interval_minutes,
    };
    let router = api::router(state).merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        address = %address,
        periodic_sync = config.sync.enabled,
        "guru-server started"
    );
    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "guru-server stopping"
    );
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        let grace = Duration::from_secs(config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!(
                event_name = "system.server.scheduler_timeout",
                correlation_id = "shutdown",
                "periodic sync did not stop within the grace period"
            );
        }
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_failed",
            error = %error,
            "could not listen for ctrl-c"
        );
        std::future::pending::<()>().await;
    }
}
