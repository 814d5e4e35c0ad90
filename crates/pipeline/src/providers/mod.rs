//! HTTP adapters for the extraction providers.
//!
//! Each adapter turns its provider's response into a [`NormalizedDocument`];
//! nothing downstream branches on which provider produced the text.

pub mod auth;
pub mod document_intelligence;
pub mod generic_ocr;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use propdraft_core::domain::provider::{NormalizedDocument, ProviderCapability};
use propdraft_core::domain::token::AccessToken;

pub use auth::ClientCredentialsAuthenticator;
pub use document_intelligence::DocumentIntelligenceClient;
pub use generic_ocr::GenericOcrClient;

const ERROR_BODY_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rejected the bearer token (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("provider rejected the document: {0}")]
    Rejected(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Uploaded document handed to every provider in the chain.
#[derive(Clone, Debug)]
pub struct DocumentInput {
    pub file_name: String,
    pub bytes: Arc<[u8]>,
}

impl DocumentInput {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { file_name: file_name.into(), bytes: bytes.into() }
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn capability(&self) -> ProviderCapability;

    async fn extract(
        &self,
        token: &AccessToken,
        document: &DocumentInput,
    ) -> Result<NormalizedDocument, ProviderError>;
}

pub fn build_http_client(request_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(request_timeout).build()
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub(crate) fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_decode() {
        ProviderError::Malformed(error.to_string())
    } else {
        ProviderError::Transient(error.to_string())
    }
}

/// Maps non-success statuses onto the retry classification.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let preview: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
    Err(classify_status(status, &preview))
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = if body.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), body.trim())
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Unauthorized { status: status.as_u16() }
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::Transient(detail)
        }
        status if status.is_server_error() => ProviderError::Transient(detail),
        _ => ProviderError::Rejected(detail),
    }
}
