use async_trait::async_trait;
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::error;

use propdraft_core::domain::token::IssuedToken;

use crate::token_cache::{AuthError, Authenticator};

/// Lifetime assumed when the credential endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// Client-credentials form grant against a provider's token endpoint.
pub struct ClientCredentialsAuthenticator {
    client: reqwest::Client,
    auth_url: String,
    client_id: String,
    client_secret: SecretString,
    org_id: Option<String>,
    scope: Option<String>,
}

impl ClientCredentialsAuthenticator {
    pub fn new(
        client: reqwest::Client,
        auth_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            client,
            auth_url: auth_url.into(),
            client_id: client_id.into(),
            client_secret,
            org_id: None,
            scope: None,
        }
    }

    pub fn with_org_id(mut self, org_id: Option<String>) -> Self {
        self.org_id = org_id;
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }
}

#[async_trait]
impl Authenticator for ClientCredentialsAuthenticator {
    async fn authenticate(&self) -> Result<IssuedToken, AuthError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        if let Some(org_id) = self.org_id.as_deref() {
            form.push(("org_id", org_id));
        }
        if let Some(scope) = self.scope.as_deref() {
            form.push(("scope", scope));
        }

        let response =
            self.client.post(&self.auth_url).form(&form).send().await.map_err(|error| {
                error!(
                    event_name = "pipeline.token.exchange_failed",
                    error = %error,
                    "provider token request failed"
                );
                AuthError::Transport(error.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|error| {
            AuthError::InvalidResponse(format!("failed to decode token response: {error}"))
        })?;
        if token.access_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "token endpoint returned empty access token".to_string(),
            ));
        }

        let expires_in_secs = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        if expires_in_secs <= 0 || Duration::try_seconds(expires_in_secs).is_none() {
            return Err(AuthError::InvalidResponse(format!(
                "token endpoint returned unusable expires_in {expires_in_secs}"
            )));
        }

        Ok(IssuedToken { access_token: token.access_token.into(), expires_in_secs })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::extract::Form;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use secrecy::ExposeSecret;
    use serde_json::{json, Value};

    use super::ClientCredentialsAuthenticator;
    use crate::providers::fake;
    use crate::token_cache::{AuthError, Authenticator};

    async fn token_endpoint(
        Form(form): Form<HashMap<String, String>>,
    ) -> Result<Json<Value>, StatusCode> {
        let valid = form.get("grant_type").map(String::as_str) == Some("client_credentials")
            && form.get("client_id").map(String::as_str) == Some("propdraft")
            && form.get("client_secret").map(String::as_str) == Some("s3cret")
            && form.get("org_id").map(String::as_str) == Some("org-7");
        if !valid {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Json(json!({"access_token": "issued-1", "expires_in": 86400, "token_type": "Bearer"})))
    }

    #[tokio::test]
    async fn form_grant_yields_issued_token() {
        let base = fake::serve(Router::new().route("/token", post(token_endpoint))).await;
        let authenticator = ClientCredentialsAuthenticator::new(
            reqwest::Client::new(),
            format!("{base}/token"),
            "propdraft",
            "s3cret".to_string().into(),
        )
        .with_org_id(Some("org-7".to_string()));

        let issued = authenticator.authenticate().await.expect("token");
        assert_eq!(issued.access_token.expose_secret(), "issued-1");
        assert_eq!(issued.expires_in_secs, 86400);
    }

    #[tokio::test]
    async fn rejected_credentials_report_status() {
        let base = fake::serve(Router::new().route("/token", post(token_endpoint))).await;
        let authenticator = ClientCredentialsAuthenticator::new(
            reqwest::Client::new(),
            format!("{base}/token"),
            "propdraft",
            "wrong".to_string().into(),
        );

        let error = authenticator.authenticate().await.expect_err("rejected");
        assert!(matches!(error, AuthError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn empty_access_token_is_invalid() {
        let router = Router::new().route(
            "/token",
            post(|| async { Json(json!({"access_token": "", "expires_in": 60})) }),
        );
        let base = fake::serve(router).await;
        let authenticator = ClientCredentialsAuthenticator::new(
            reqwest::Client::new(),
            format!("{base}/token"),
            "propdraft",
            "s3cret".to_string().into(),
        );

        let error = authenticator.authenticate().await.expect_err("empty token");
        assert!(matches!(error, AuthError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn out_of_range_lifetimes_are_invalid() {
        for expires_in in [json!(i64::MAX), json!(-60), json!(0)] {
            let router = Router::new().route(
                "/token",
                post(move || {
                    let expires_in = expires_in.clone();
                    async move { Json(json!({"access_token": "tok", "expires_in": expires_in})) }
                }),
            );
            let base = fake::serve(router).await;
            let authenticator = ClientCredentialsAuthenticator::new(
                reqwest::Client::new(),
                format!("{base}/token"),
                "propdraft",
                "s3cret".to_string().into(),
            );

            let error = authenticator.authenticate().await.expect_err("unusable lifetime");
            assert!(matches!(error, AuthError::InvalidResponse(_)), "{error:?}");
        }
    }
}
