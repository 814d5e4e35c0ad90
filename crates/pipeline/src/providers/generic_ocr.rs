use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;

use propdraft_core::config::GenericOcrConfig;
use propdraft_core::domain::provider::{NormalizedDocument, ProviderCapability};
use propdraft_core::domain::token::AccessToken;

use super::{
    endpoint, ensure_success, transport_error, DocumentInput, ProviderClient, ProviderError,
};

#[derive(Debug, Default, Deserialize)]
pub struct OcrResponse {
    #[serde(rename = "ParsedResults", default)]
    pub parsed_results: Vec<ParsedResult>,
    #[serde(rename = "IsErroredOnProcessing", default)]
    pub is_errored_on_processing: bool,
    #[serde(rename = "ErrorMessage", default)]
    pub error_message: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ParsedResult {
    #[serde(rename = "ParsedText", default)]
    pub parsed_text: String,
}

/// Plain OCR API. Yields page text only, so the parser falls back to text-line items.
pub struct GenericOcrClient {
    client: reqwest::Client,
    base_url: String,
    language: String,
}

impl GenericOcrClient {
    pub fn new(client: reqwest::Client, config: &GenericOcrConfig) -> Self {
        Self { client, base_url: config.base_url.clone(), language: config.language.clone() }
    }
}

#[async_trait]
impl ProviderClient for GenericOcrClient {
    fn capability(&self) -> ProviderCapability {
        ProviderCapability::GenericOcr
    }

    async fn extract(
        &self,
        token: &AccessToken,
        document: &DocumentInput,
    ) -> Result<NormalizedDocument, ProviderError> {
        let request = self
            .client
            .post(endpoint(&self.base_url, "parse/document"))
            .header(AUTHORIZATION, token.bearer_header())
            .header(CONTENT_TYPE, "application/pdf")
            .query(&[
                ("language", self.language.as_str()),
                ("file_name", document.file_name.as_str()),
            ])
            .body(document.bytes.to_vec());

        let response = ensure_success(request.send().await.map_err(transport_error)?).await?;
        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Malformed(error.to_string()))?;
        normalize(parsed)
    }
}

pub fn normalize(response: OcrResponse) -> Result<NormalizedDocument, ProviderError> {
    if response.is_errored_on_processing {
        let message = response
            .error_message
            .as_ref()
            .map(flatten_error_message)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| "processing failed without a message".to_string());
        return Err(ProviderError::Rejected(message));
    }
    if response.parsed_results.is_empty() {
        return Err(ProviderError::Malformed("response carried no parsed results".to_string()));
    }

    let text = response
        .parsed_results
        .into_iter()
        .map(|result| result.parsed_text)
        .collect::<Vec<_>>()
        .join("\n");
    Ok(NormalizedDocument { provider: ProviderCapability::GenericOcr, text, tables: Vec::new() })
}

// The API sends either a string or a list of strings.
fn flatten_error_message(value: &Value) -> String {
    match value {
        Value::String(message) => message.trim().to_string(),
        Value::Array(parts) => parts
            .iter()
            .map(flatten_error_message)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
