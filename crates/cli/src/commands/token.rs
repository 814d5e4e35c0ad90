//! Operator access to the shared provider token cache.

use std::sync::Arc;

use propdraft_core::config::AppConfig;
use propdraft_pipeline::{CredentialTokenCache, PipelineComponents};
use serde_json::json;

use crate::commands::{
    block_on, load_config, open_database, to_data, CommandResult, Failure, EXIT_PIPELINE,
    EXIT_RUNTIME,
};

pub fn status() -> CommandResult {
    with_caches("token_status", |caches, _| async move {
        let mut stats = Vec::with_capacity(caches.len());
        for cache in &caches {
            stats.push(cache.stats().await);
        }
        Ok((format!("{} provider caches", stats.len()), to_data(&stats)))
    })
}

pub fn refresh() -> CommandResult {
    with_caches("token_refresh", |caches, _| async move {
        let mut refreshed = Vec::with_capacity(caches.len());
        for cache in &caches {
            let token = cache.refresh_token().await.map_err(|error| {
                Failure::new(error.error_class(), error.to_string(), EXIT_PIPELINE)
            })?;
            refreshed.push(json!({
                "cache_key": cache.key().0,
                "expires_at": token.expires_at,
            }));
        }
        Ok((format!("refreshed {} provider tokens", refreshed.len()), Some(json!(refreshed))))
    })
}

pub fn cleanup() -> CommandResult {
    with_caches("token_cleanup", |caches, config| async move {
        let retention_hours = config.token.retention_hours;
        // Every provider shares one table, so the first cache purges for all of them.
        let purged = match caches.first() {
            Some(cache) => {
                cache.cleanup(chrono::Duration::hours(retention_hours)).await.map_err(|error| {
                    Failure::new("token_cleanup", error.to_string(), EXIT_PIPELINE)
                })?
            }
            None => 0,
        };
        Ok((
            format!("purged {purged} token rows older than {retention_hours}h"),
            Some(json!({ "purged": purged, "retention_hours": retention_hours })),
        ))
    })
}

fn with_caches<F, Fut>(command: &str, body: F) -> CommandResult
where
    F: FnOnce(Vec<Arc<CredentialTokenCache>>, AppConfig) -> Fut,
    Fut: std::future::Future<Output = Result<(String, Option<serde_json::Value>), Failure>>,
{
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return CommandResult::from_failure(command, failure),
    };

    let result = block_on(async {
        let pool = open_database(&config).await?;
        let components = PipelineComponents::from_config(&config, pool.clone()).map_err(
            |error| Failure::new("http_client", error.to_string(), EXIT_RUNTIME),
        )?;
        let outcome = body(components.token_caches, config).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok((message, data)) => CommandResult::success_with_data(command, message, data),
        Err(failure) => CommandResult::from_failure(command, failure),
    }
}
