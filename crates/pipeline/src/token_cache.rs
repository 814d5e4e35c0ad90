//! Short-lived provider credentials, cached in memory and in the database.
//!
//! Lookup order is memory, then the active persistent row, then a fresh
//! authentication. Tokens inside the safety margin are never handed out.
//! No lock is held across the authentication round-trip; when two callers
//! race, the last one to store its token wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use propdraft_core::clock::Clock;
use propdraft_core::config::TokenConfig;
use propdraft_core::domain::token::{
    AccessToken, CacheKey, CachedTokenRecord, IssuedToken, TokenCacheSummary, TokenSource,
};
use propdraft_core::errors::PipelineError;
use propdraft_db::repositories::TokenCacheRepository;
use propdraft_db::RepositoryError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential endpoint rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("credential endpoint unreachable: {0}")]
    Transport(String),
    #[error("invalid credential response: {0}")]
    InvalidResponse(String),
}

/// Exchanges the configured system credential for a bearer token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<IssuedToken, AuthError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenPolicy {
    pub safety_margin: Duration,
    pub renewal_window: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self { safety_margin: Duration::minutes(5), renewal_window: Duration::hours(1) }
    }
}

impl TokenPolicy {
    pub fn from_config(config: &TokenConfig) -> Self {
        Self {
            safety_margin: Duration::seconds(config.safety_margin_secs),
            renewal_window: Duration::seconds(config.renewal_window_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TokenCacheStats {
    pub cache_key: String,
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub authentications: u64,
    pub memory_expires_at: Option<DateTime<Utc>>,
    pub persistent: Option<TokenCacheSummary>,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    persistent_hits: AtomicU64,
    authentications: AtomicU64,
}

pub struct CredentialTokenCache {
    key: CacheKey,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn TokenCacheRepository>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
    memory: RwLock<Option<AccessToken>>,
    counters: Counters,
}

impl CredentialTokenCache {
    pub fn new(
        key: CacheKey,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn TokenCacheRepository>,
        clock: Arc<dyn Clock>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            key,
            authenticator,
            store,
            clock,
            policy,
            memory: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    pub async fn get_valid_token(&self) -> Result<AccessToken, PipelineError> {
        let now = self.clock.now();

        if let Some(token) = self.memory_token(now).await {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(token.with_source(TokenSource::Memory));
        }

        if let Some(record) = self.persistent_record(now).await {
            let record_id = record.id.clone();
            let token = record.into_access_token();
            if let Err(error) = self.store.record_hit(&record_id, now).await {
                warn!(
                    event_name = "pipeline.token.hit_not_recorded",
                    cache_key = %self.key.0,
                    error = %error,
                    "failed to record persistent token hit"
                );
            }
            *self.memory.write().await = Some(token.clone());
            self.counters.persistent_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(token);
        }

        self.authenticate().await
    }

    /// Drops every cached token for this key and authenticates again.
    pub async fn refresh_token(&self) -> Result<AccessToken, PipelineError> {
        self.invalidate().await;
        self.authenticate().await
    }

    pub async fn invalidate(&self) {
        *self.memory.write().await = None;
        match self.store.deactivate(&self.key).await {
            Ok(deactivated) => info!(
                event_name = "pipeline.token.invalidated",
                cache_key = %self.key.0,
                deactivated,
                "token cache invalidated"
            ),
            Err(error) => warn!(
                event_name = "pipeline.token.invalidate_failed",
                cache_key = %self.key.0,
                error = %error,
                "failed to deactivate persistent tokens"
            ),
        }
    }

    /// Authenticates ahead of time when the current token is missing or close to expiry.
    /// Returns whether a renewal happened. Failures are logged, never propagated.
    pub async fn check_and_renew_if_needed(&self) -> bool {
        let now = self.clock.now();
        let current = match self.memory.read().await.clone() {
            Some(token) => Some(token),
            None => self.persistent_record(now).await.map(CachedTokenRecord::into_access_token),
        };

        let due = current
            .as_ref()
            .map_or(true, |token| token.needs_renewal(now, self.policy.renewal_window));
        if !due {
            return false;
        }

        match self.authenticate().await {
            Ok(token) => {
                info!(
                    event_name = "pipeline.token.renewed",
                    cache_key = %self.key.0,
                    expires_at = %token.expires_at,
                    "token renewed proactively"
                );
                true
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.token.renewal_failed",
                    cache_key = %self.key.0,
                    error = %error,
                    "proactive token renewal failed"
                );
                false
            }
        }
    }

    pub async fn stats(&self) -> TokenCacheStats {
        let persistent = match self.store.summary(&self.key).await {
            Ok(summary) => Some(summary),
            Err(error) => {
                warn!(
                    event_name = "pipeline.token.summary_failed",
                    cache_key = %self.key.0,
                    error = %error,
                    "failed to summarize persistent token cache"
                );
                None
            }
        };

        TokenCacheStats {
            cache_key: self.key.0.clone(),
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.counters.persistent_hits.load(Ordering::Relaxed),
            authentications: self.counters.authentications.load(Ordering::Relaxed),
            memory_expires_at: self.memory.read().await.as_ref().map(|token| token.expires_at),
            persistent,
        }
    }

    /// Purges inactive or expired rows older than `retention`.
    pub async fn cleanup(&self, retention: Duration) -> Result<u64, RepositoryError> {
        let now = self.clock.now();
        let purged = self.store.purge(now - retention, now).await?;
        info!(
            event_name = "pipeline.token.cleanup",
            cache_key = %self.key.0,
            purged,
            "token cache cleanup finished"
        );
        Ok(purged)
    }

    async fn memory_token(&self, now: DateTime<Utc>) -> Option<AccessToken> {
        self.memory
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_usable(now, self.policy.safety_margin))
            .cloned()
    }

    async fn persistent_record(&self, now: DateTime<Utc>) -> Option<CachedTokenRecord> {
        match self.store.find_active(&self.key, now).await {
            Ok(record) => record.filter(|record| {
                record.expires_at - now > self.policy.safety_margin
            }),
            Err(error) => {
                warn!(
                    event_name = "pipeline.token.persistent_lookup_failed",
                    cache_key = %self.key.0,
                    error = %error,
                    "persistent token lookup failed, treating as cache miss"
                );
                None
            }
        }
    }

    async fn authenticate(&self) -> Result<AccessToken, PipelineError> {
        let issued = self
            .authenticator
            .authenticate()
            .await
            .map_err(|error| PipelineError::Authentication(error.to_string()))?;
        self.counters.authentications.fetch_add(1, Ordering::Relaxed);

        let now = self.clock.now();
        let lifetime_secs = issued.expires_in_secs;
        let token = issued.into_access_token(now).ok_or_else(|| {
            PipelineError::Authentication(format!(
                "issued token lifetime of {lifetime_secs}s is out of range"
            ))
        })?;
        if !token.is_usable(now, self.policy.safety_margin) {
            return Err(PipelineError::Authentication(format!(
                "issued token expires in {}s, inside the {}s safety margin",
                token.remaining(now).num_seconds(),
                self.policy.safety_margin.num_seconds()
            )));
        }

        let record = CachedTokenRecord {
            id: format!("TOK-{}", uuid::Uuid::new_v4()),
            cache_key: self.key.clone(),
            token: token.value.expose_secret().to_string(),
            created_at: token.issued_at,
            expires_at: token.expires_at,
            active: true,
            hit_count: 0,
            last_used_at: None,
        };
        if let Err(error) = self.store.store(record).await {
            warn!(
                event_name = "pipeline.token.persist_failed",
                cache_key = %self.key.0,
                error = %error,
                "failed to persist token, keeping it in memory only"
            );
        }

        *self.memory.write().await = Some(token.clone());
        info!(
            event_name = "pipeline.token.authenticated",
            cache_key = %self.key.0,
            expires_at = %token.expires_at,
            "provider token issued"
        );
        Ok(token)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;
    use propdraft_core::domain::token::IssuedToken;

    use super::{AuthError, Authenticator};

    /// Issues `tok-1`, `tok-2`, ... with a fixed lifetime.
    pub struct CountingAuthenticator {
        pub calls: AtomicU32,
        pub expires_in_secs: i64,
        pub fail: AtomicBool,
    }

    impl CountingAuthenticator {
        pub fn new(expires_in_secs: i64) -> Self {
            Self { calls: AtomicU32::new(0), expires_in_secs, fail: AtomicBool::new(false) }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn authenticate(&self) -> Result<IssuedToken, AuthError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuthError::Rejected {
                    status: 401,
                    message: "invalid_client".to_string(),
                });
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(IssuedToken {
                access_token: format!("tok-{call}").into(),
                expires_in_secs: self.expires_in_secs,
            })
        }
    }
}
