use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::warn;

use propdraft_core::config::DocumentIntelligenceConfig;
use propdraft_core::domain::provider::{NormalizedDocument, ProviderCapability, RawTable};
use propdraft_core::domain::token::AccessToken;

use super::{
    endpoint, ensure_success, transport_error, DocumentInput, ProviderClient, ProviderError,
};

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tables: Vec<AnalyzedTable>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzedTable {
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub column_count: usize,
    #[serde(default)]
    pub cells: Vec<AnalyzedCell>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzedCell {
    pub row_index: usize,
    pub column_index: usize,
    #[serde(default)]
    pub content: String,
}

/// Structured layout API: returns full text plus cell-addressed tables.
pub struct DocumentIntelligenceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    org_id: Option<String>,
}

impl DocumentIntelligenceClient {
    pub fn new(client: reqwest::Client, config: &DocumentIntelligenceConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.client_id.clone(),
            org_id: config.org_id.clone(),
        }
    }
}

#[async_trait]
impl ProviderClient for DocumentIntelligenceClient {
    fn capability(&self) -> ProviderCapability {
        ProviderCapability::DocumentIntelligence
    }

    async fn extract(
        &self,
        token: &AccessToken,
        document: &DocumentInput,
    ) -> Result<NormalizedDocument, ProviderError> {
        let mut request = self
            .client
            .post(endpoint(&self.base_url, "documents:analyze"))
            .header(AUTHORIZATION, token.bearer_header())
            .header("x-api-key", &self.api_key)
            .header(CONTENT_TYPE, "application/pdf")
            .query(&[("file_name", document.file_name.as_str())])
            .body(document.bytes.to_vec());
        if let Some(org_id) = self.org_id.as_deref() {
            request = request.header("x-org-id", org_id);
        }

        let response = ensure_success(request.send().await.map_err(transport_error)?).await?;
        let analyzed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Malformed(error.to_string()))?;
        Ok(normalize(analyzed))
    }
}

/// Tables larger than this are skipped rather than laid out.
pub const MAX_TABLE_ROWS: usize = 1_000;
pub const MAX_TABLE_COLUMNS: usize = 64;

/// Lays cells out on a `row_count x column_count` grid; cells beyond the
/// declared size widen the grid instead of being dropped.
pub fn normalize(response: AnalyzeResponse) -> NormalizedDocument {
    let tables = response.tables.into_iter().enumerate().filter_map(lay_out_table).collect();

    NormalizedDocument {
        provider: ProviderCapability::DocumentIntelligence,
        text: response.content,
        tables,
    }
}

fn lay_out_table((index, table): (usize, AnalyzedTable)) -> Option<RawTable> {
    let rows = extent(table.row_count, table.cells.iter().map(|cell| cell.row_index));
    let columns = extent(table.column_count, table.cells.iter().map(|cell| cell.column_index));

    let (rows, columns) = match (rows, columns) {
        (Some(rows), Some(columns)) if rows <= MAX_TABLE_ROWS && columns <= MAX_TABLE_COLUMNS => {
            (rows, columns)
        }
        _ => {
            warn!(
                event_name = "pipeline.provider.table_skipped",
                table_index = index,
                declared_rows = table.row_count,
                declared_columns = table.column_count,
                cell_count = table.cells.len(),
                "table dimensions exceed the supported grid, skipping"
            );
            return None;
        }
    };
    if rows == 0 || columns == 0 {
        return None;
    }

    let mut grid = vec![vec![String::new(); columns]; rows];
    for cell in table.cells {
        grid[cell.row_index][cell.column_index] = cell.content.trim().to_string();
    }
    Some(RawTable::new(grid))
}

/// `None` when an index is too large to address.
fn extent(declared: usize, mut indices: impl Iterator<Item = usize>) -> Option<usize> {
    indices.try_fold(declared, |extent, index| index.checked_add(1).map(|end| end.max(extent)))
}

#[cfg(test)]
mod tests {
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use serde_json::{json, Value};

    use propdraft_core::config::{AppConfig, DocumentIntelligenceConfig};
    use propdraft_core::domain::provider::{ProviderCapability, RawTable};
    use propdraft_core::domain::token::{AccessToken, IssuedToken};

    use super::{normalize, AnalyzeResponse, DocumentIntelligenceClient};
    use crate::providers::{fake, DocumentInput, ProviderClient, ProviderError};

    fn config(base_url: String) -> DocumentIntelligenceConfig {
        let mut config = AppConfig::default().providers.document_intelligence;
        config.base_url = base_url;
        config.client_id = "api-key-1".to_string();
        config
    }

    async fn analyze(headers: HeaderMap, body: Bytes) -> Result<Json<Value>, StatusCode> {
        let authorized = headers.get("authorization").and_then(|value| value.to_str().ok())
            == Some("Bearer tok-1");
        let keyed =
            headers.get("x-api-key").and_then(|value| value.to_str().ok()) == Some("api-key-1");
        if !authorized || !keyed {
            return Err(StatusCode::UNAUTHORIZED);
        }
        if !body.starts_with(b"%PDF-") {
            return Err(StatusCode::UNPROCESSABLE_ENTITY);
        }

        Ok(Json(json!({
            "content": "JOAO DA SILVA\nCadeira 2 UN 100,00",
            "tables": [{
                "row_count": 2,
                "column_count": 3,
                "cells": [
                    {"row_index": 0, "column_index": 0, "content": "Descrição"},
                    {"row_index": 0, "column_index": 1, "content": "Qtd"},
                    {"row_index": 0, "column_index": 2, "content": "Valor"},
                    {"row_index": 1, "column_index": 0, "content": " Cadeira "},
                    {"row_index": 1, "column_index": 1, "content": "2"},
                    {"row_index": 1, "column_index": 2, "content": "100,00"}
                ]
            }]
        })))
    }

    fn token(value: &str) -> AccessToken {
        IssuedToken { access_token: value.to_string().into(), expires_in_secs: 3600 }
            .into_access_token(Utc::now())
            .expect("lifetime in range")
    }

    #[tokio::test]
    async fn analyze_response_is_normalized() {
        let base = fake::serve(Router::new().route("/documents:analyze", post(analyze))).await;
        let client = DocumentIntelligenceClient::new(reqwest::Client::new(), &config(base));

        let document = client
            .extract(&token("tok-1"), &DocumentInput::new("proposta.pdf", b"%PDF-1.4".to_vec()))
            .await
            .expect("normalized");

        assert_eq!(document.provider, ProviderCapability::DocumentIntelligence);
        assert!(document.text.starts_with("JOAO DA SILVA"));
        assert_eq!(document.tables.len(), 1);
        assert_eq!(document.tables[0].rows[1], vec!["Cadeira", "2", "100,00"]);
    }

    #[tokio::test]
    async fn stale_token_is_reported_as_unauthorized() {
        let base = fake::serve(Router::new().route("/documents:analyze", post(analyze))).await;
        let client = DocumentIntelligenceClient::new(reqwest::Client::new(), &config(base));

        let error = client
            .extract(&token("expired"), &DocumentInput::new("proposta.pdf", b"%PDF-1.4".to_vec()))
            .await
            .expect_err("unauthorized");
        assert!(matches!(error, ProviderError::Unauthorized { status: 401 }));
    }

    #[test]
    fn sparse_cells_fill_a_rectangular_grid() {
        let response: AnalyzeResponse = serde_json::from_value(json!({
            "content": "x",
            "tables": [
                {"row_count": 1, "column_count": 2, "cells": [
                    {"row_index": 0, "column_index": 1, "content": "Qtd"},
                    {"row_index": 2, "column_index": 0, "content": "Mesa"}
                ]},
                {"row_count": 0, "column_count": 0, "cells": []}
            ]
        }))
        .expect("response");

        let document = normalize(response);
        assert_eq!(
            document.tables,
            vec![RawTable::new(vec![
                vec![String::new(), "Qtd".to_string()],
                vec![String::new(), String::new()],
                vec!["Mesa".to_string(), String::new()],
            ])]
        );
    }

    #[test]
    fn oversized_tables_are_skipped() {
        let response: AnalyzeResponse = serde_json::from_value(json!({
            "content": "x",
            "tables": [
                {"row_count": 1, "column_count": 18446744073709551615_u64, "cells": []},
                {"row_count": 1, "column_count": 1, "cells": [
                    {"row_index": 18446744073709551615_u64, "column_index": 0, "content": "x"}
                ]},
                {"row_count": 0, "column_count": 0, "cells": [
                    {"row_index": 5000, "column_index": 0, "content": "x"}
                ]},
                {"row_count": 1, "column_count": 1, "cells": [
                    {"row_index": 0, "column_index": 0, "content": "Mesa"}
                ]}
            ]
        }))
        .expect("response");

        let document = normalize(response);
        assert_eq!(document.tables, vec![RawTable::new(vec![vec!["Mesa".to_string()]])]);
    }
}
