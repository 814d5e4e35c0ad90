use std::sync::Arc;

use propdraft_core::config::{AppConfig, ConfigError, LoadOptions};
use propdraft_db::{connect_with_settings, migrations, DbPool};
use propdraft_pipeline::{CredentialTokenCache, ExtractionService, PipelineComponents};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ExtractionService>,
    pub token_caches: Vec<Arc<CredentialTokenCache>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("provider http client could not be built: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let components = PipelineComponents::from_config(&config, db_pool.clone())
        .map_err(BootstrapError::HttpClient)?;
    info!(
        event_name = "system.bootstrap.pipeline_ready",
        correlation_id = "bootstrap",
        providers = ?components.service.orchestrator().chain(),
        "extraction pipeline assembled"
    );

    Ok(Application {
        config,
        db_pool,
        service: components.service,
        token_caches: components.token_caches,
    })
}

#[cfg(test)]
mod tests {
    use propdraft_core::config::{ConfigOverrides, LoadOptions};
    use propdraft_core::domain::provider::ProviderCapability;

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_without_provider_credentials() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("client_id"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_assembles_the_chain() {
        let app = bootstrap(valid_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('provider_token_cache', 'client', 'proposal', 'proposal_item', \
              'raw_extraction', 'extraction_job')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 6);

        assert_eq!(
            app.service.orchestrator().chain(),
            vec![ProviderCapability::DocumentIntelligence, ProviderCapability::GenericOcr]
        );
        assert_eq!(app.token_caches.len(), 2);

        app.db_pool.close().await;
    }

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                provider_client_id: Some("propdraft".to_string()),
                provider_client_secret: Some("s3cret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }
}
