use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use propdraft_core::domain::job::JobId;
use propdraft_core::domain::provider::ExtractionMethod;
use propdraft_core::errors::{InterfaceError, PipelineError};
use propdraft_pipeline::{CredentialTokenCache, ExtractionRequest, ExtractionService};

const DEFAULT_FILE_NAME: &str = "document.pdf";

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ExtractionService>,
    pub token_caches: Vec<Arc<CredentialTokenCache>>,
}

/// Every endpoint answers with this shape.
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub class: &'static str,
    pub message: &'static str,
    pub detail: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExtractParams {
    pub file_name: Option<String>,
    #[serde(default)]
    pub actor_id: String,
    #[serde(default)]
    pub product_group: String,
    pub method: Option<String>,
    pub confidence_threshold: Option<f32>,
    pub session_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    #[serde(default)]
    pub actor_id: String,
    #[serde(default)]
    pub product_group: String,
    pub correlation_id: Option<String>,
    pub payload: Value,
}

/// `body_limit` caps raw uploads; it should sit above the extraction size
/// limit so oversize files get a validation error instead of a bare 413.
pub fn router(state: ApiState, body_limit: usize) -> Router {
    Router::new()
        .route("/extract", post(extract))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/drafts", post(save_draft))
        .route("/tokens/refresh", post(refresh_tokens))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::Validation(_) | PipelineError::Domain(_) => StatusCode::BAD_REQUEST,
        PipelineError::ConcurrencyConflict { .. } | PipelineError::Cancelled(_) => {
            StatusCode::CONFLICT
        }
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::Authentication(_) => StatusCode::UNAUTHORIZED,
        PipelineError::Provider { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn success<T: Serialize>(data: T, correlation_id: String) -> Response {
    let envelope = ApiEnvelope { success: true, data: Some(data), error: None, correlation_id };
    (StatusCode::OK, Json(envelope)).into_response()
}

fn failure(error: PipelineError, correlation_id: String) -> Response {
    let status = status_for(&error);
    let class = error.error_class();
    let detail = error.to_string();
    let interface: InterfaceError = error.into_interface(correlation_id);

    warn!(
        event_name = "system.api.request_failed",
        correlation_id = %interface.correlation_id(),
        error_class = class,
        status = status.as_u16(),
        error = %detail,
        "request failed"
    );

    let envelope = ApiEnvelope::<Value> {
        success: false,
        data: None,
        error: Some(ApiErrorBody { class, message: interface.user_message(), detail }),
        correlation_id: interface.correlation_id().to_string(),
    };
    (status, Json(envelope)).into_response()
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn extract(
    State(state): State<ApiState>,
    Query(params): Query<ExtractParams>,
    body: Bytes,
) -> Response {
    let correlation_id = new_correlation_id();

    let method = match params.method.as_deref().map(str::parse::<ExtractionMethod>).transpose() {
        Ok(method) => method.unwrap_or_default(),
        Err(message) => return failure(PipelineError::Validation(message), correlation_id),
    };
    if let Some(threshold) = params.confidence_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return failure(
                PipelineError::Validation(format!(
                    "confidence_threshold must be within 0..=1, got {threshold}"
                )),
                correlation_id,
            );
        }
    }

    let file_name = params
        .file_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
    let mut request = ExtractionRequest::new(file_name, body.to_vec())
        .with_method(method)
        .with_correlation_id(correlation_id.clone());
    if let Some(session_key) = params.session_key {
        request = request.with_flight_key(session_key);
    }
    if let Some(threshold) = params.confidence_threshold {
        request = request.with_confidence_threshold(threshold);
    }

    match state.service.extract(request, &params.actor_id, &params.product_group).await {
        Ok(result) => {
            info!(
                event_name = "system.api.extract_completed",
                correlation_id = %result.correlation_id,
                job_id = %result.job_id,
                needs_review = result.needs_review,
                draft_written = result.draft.is_some(),
                "extract request completed"
            );
            let correlation_id = result.correlation_id.clone();
            success(result, correlation_id)
        }
        Err(error) => failure(error, correlation_id),
    }
}

async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let correlation_id = new_correlation_id();
    match state.service.orchestrator().job(&JobId(id)).await {
        Ok(job) => success(job, correlation_id),
        Err(error) => failure(error, correlation_id),
    }
}

async fn cancel_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let correlation_id = new_correlation_id();
    match state.service.orchestrator().cancel(&JobId(id)).await {
        Ok(job) => success(job, correlation_id),
        Err(error) => failure(error, correlation_id),
    }
}

async fn save_draft(State(state): State<ApiState>, Json(request): Json<DraftRequest>) -> Response {
    let correlation_id = request.correlation_id.unwrap_or_else(new_correlation_id);
    match state
        .service
        .save_value(&request.payload, &request.actor_id, &request.product_group, &correlation_id)
        .await
    {
        Ok(outcome) => success(outcome, correlation_id),
        Err(error) => failure(error, correlation_id),
    }
}

async fn refresh_tokens(State(state): State<ApiState>) -> Response {
    let correlation_id = new_correlation_id();
    let mut stats = Vec::with_capacity(state.token_caches.len());
    for cache in &state.token_caches {
        if let Err(error) = cache.refresh_token().await {
            return failure(error, correlation_id);
        }
        stats.push(cache.stats().await);
    }
    success(stats, correlation_id)
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use propdraft_core::config::AppConfig;
    use propdraft_db::{connect_with_settings, migrations, DbPool};
    use propdraft_pipeline::PipelineComponents;

    use super::ApiState;

    pub const DOCUMENT_TEXT: &str =
        "ACME CORP\nCNPJ 12.345.678\nJOAO DA SILVA\nDESCRIÇÃO QTD VALOR\nCadeira 2 UN 100,00";

    /// Token endpoint plus document-intelligence endpoint on an ephemeral port.
    async fn fake_provider() -> String {
        let router = Router::new()
            .route(
                "/token",
                post(|| async { Json(json!({"access_token": "tok-1", "expires_in": 3600})) }),
            )
            .route(
                "/documents:analyze",
                post(|| async { Json::<Value>(json!({"content": DOCUMENT_TEXT, "tables": []})) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("fake provider");
        });
        format!("http://{address}")
    }

    pub async fn state() -> (ApiState, DbPool) {
        let base = fake_provider().await;
        let mut config = AppConfig::default();
        config.providers.document_intelligence.base_url = base.clone();
        config.providers.document_intelligence.auth_url = format!("{base}/token");
        config.providers.document_intelligence.client_id = "propdraft".to_string();
        config.providers.document_intelligence.client_secret = "s3cret".to_string().into();
        config.providers.generic_ocr.enabled = false;
        config.extraction.max_file_bytes = 1024;

        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        let components = PipelineComponents::from_config(&config, pool.clone()).expect("wired");
        (
            ApiState { service: components.service, token_caches: components.token_caches },
            pool,
        )
    }
}
