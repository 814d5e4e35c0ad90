use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use propdraft_db::{connection::ping, DbPool};
use propdraft_pipeline::{CredentialTokenCache, ExtractionService, TokenCacheStats};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub service: Arc<ExtractionService>,
    pub token_caches: Vec<Arc<CredentialTokenCache>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub token_cache: Vec<TokenCacheStats>,
    pub running_jobs: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let mut token_cache = Vec::with_capacity(state.token_caches.len());
    for cache in &state.token_caches {
        token_cache.push(cache.stats().await);
    }

    let chain = state.service.orchestrator().chain();
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: format!("extraction chain: {chain:?}"),
        },
        database,
        token_cache,
        running_jobs: state.service.orchestrator().running_jobs(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};

    use crate::api::test_support::state;
    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let (api, pool) = state().await;

        let (status, Json(payload)) = health(State(HealthState {
            db_pool: pool.clone(),
            service: api.service,
            token_caches: api.token_caches,
        }))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.running_jobs, 0);
        assert_eq!(payload.token_cache.len(), 1);
        assert_eq!(payload.token_cache[0].authentications, 0);

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let (api, pool) = state().await;
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState {
            db_pool: pool,
            service: api.service,
            token_caches: api.token_caches,
        }))
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
