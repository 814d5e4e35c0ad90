mod api;
mod bootstrap;
mod health;
mod maintenance;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use propdraft_core::config::{AppConfig, LoadOptions};

/// Headroom above the extraction size limit for the raw upload body.
const BODY_LIMIT_SLACK_BYTES: usize = 64 * 1024;

fn init_logging(config: &AppConfig) {
    use propdraft_core::config::LogFormat::*;
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
    // Logging must be up before bootstrap emits its first event.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let watchdog = Arc::clone(app.service.orchestrator())
        .spawn_watchdog(Duration::from_secs(app.config.extraction.watchdog_interval_secs));
    let renewal = maintenance::spawn_token_renewal(
        app.token_caches.clone(),
        Duration::from_secs(app.config.token.renewal_interval_secs),
    );
    let cleanup = maintenance::spawn_token_cleanup(
        app.token_caches.clone(),
        Duration::from_secs(app.config.token.cleanup_interval_secs),
        chrono::Duration::hours(app.config.token.retention_hours),
    );

    let body_limit = usize::try_from(app.config.extraction.max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_LIMIT_SLACK_BYTES);
    let router = api::router(
        api::ApiState { service: app.service.clone(), token_caches: app.token_caches.clone() },
        body_limit,
    )
    .merge(health::router(health::HealthState {
        db_pool: app.db_pool.clone(),
        service: app.service.clone(),
        token_caches: app.token_caches.clone(),
    }));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "propdraft-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "propdraft-server stopping"
    );
    watchdog.abort();
    renewal.abort();
    cleanup.abort();

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.pool_close_timeout",
            correlation_id = "shutdown",
            "database pool did not close within the grace period"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
