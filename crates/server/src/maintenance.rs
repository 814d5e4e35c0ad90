//! Background loops owned by the server root.

use std::sync::Arc;
use std::time::Duration;

use propdraft_pipeline::CredentialTokenCache;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Runs the proactive renewal check for every provider cache.
pub async fn renew_tokens(caches: &[Arc<CredentialTokenCache>]) -> usize {
    let mut renewed = 0;
    for cache in caches {
        if cache.check_and_renew_if_needed().await {
            renewed += 1;
        }
    }
    renewed
}

/// Purges stale token rows. All caches share one table, so one pass covers them.
pub async fn purge_tokens(
    caches: &[Arc<CredentialTokenCache>],
    retention: chrono::Duration,
) -> u64 {
    let Some(cache) = caches.first() else {
        return 0;
    };
    match cache.cleanup(retention).await {
        Ok(purged) => purged,
        Err(error) => {
            warn!(
                event_name = "system.maintenance.token_cleanup_failed",
                error = %error,
                "token cache cleanup failed"
            );
            0
        }
    }
}

pub fn spawn_token_renewal(
    caches: Vec<Arc<CredentialTokenCache>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let renewed = renew_tokens(&caches).await;
            if renewed > 0 {
                info!(
                    event_name = "system.maintenance.tokens_renewed",
                    renewed,
                    "proactive token renewal pass finished"
                );
            }
        }
    })
}

pub fn spawn_token_cleanup(
    caches: Vec<Arc<CredentialTokenCache>>,
    every: Duration,
    retention: chrono::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick fires immediately; skip it so startup is not slowed by a purge.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            purge_tokens(&caches, retention).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    use propdraft_core::clock::ManualClock;
    use propdraft_core::domain::token::{CacheKey, IssuedToken};
    use propdraft_db::repositories::{InMemoryTokenCacheRepository, TokenCacheRepository};
    use propdraft_pipeline::{AuthError, Authenticator, CredentialTokenCache, TokenPolicy};

    use super::{purge_tokens, renew_tokens};

    #[derive(Default)]
    struct StaticAuthenticator {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Authenticator for StaticAuthenticator {
        async fn authenticate(&self) -> Result<IssuedToken, AuthError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(IssuedToken {
                access_token: format!("tok-{call}").into(),
                expires_in_secs: 7200,
            })
        }
    }

    fn cache(
        clock: Arc<ManualClock>,
        store: Arc<InMemoryTokenCacheRepository>,
        authenticator: Arc<StaticAuthenticator>,
    ) -> Arc<CredentialTokenCache> {
        Arc::new(CredentialTokenCache::new(
            CacheKey("document_intelligence:propdraft".to_string()),
            authenticator,
            store,
            clock,
            TokenPolicy::default(),
        ))
    }

    #[tokio::test]
    async fn renewal_pass_only_authenticates_when_due() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("timestamp"),
        ));
        let authenticator = Arc::new(StaticAuthenticator::default());
        let caches = vec![cache(
            clock.clone(),
            Arc::new(InMemoryTokenCacheRepository::default()),
            authenticator.clone(),
        )];

        assert_eq!(renew_tokens(&caches).await, 1);
        assert_eq!(renew_tokens(&caches).await, 0);

        clock.advance(Duration::minutes(61));
        assert_eq!(renew_tokens(&caches).await, 1);
        assert_eq!(authenticator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cleanup_pass_purges_superseded_rows() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("timestamp"),
        ));
        let store = Arc::new(InMemoryTokenCacheRepository::default());
        let caches = vec![cache(
            clock.clone(),
            store.clone(),
            Arc::new(StaticAuthenticator::default()),
        )];

        caches[0].get_valid_token().await.expect("first token");
        caches[0].refresh_token().await.expect("second token");
        clock.advance(Duration::minutes(45));

        assert_eq!(purge_tokens(&caches, Duration::minutes(30)).await, 1);
        let summary = store
            .summary(&CacheKey("document_intelligence:propdraft".to_string()))
            .await
            .expect("summary");
        assert_eq!(summary.inactive_rows, 0);
        assert_eq!(summary.active_rows, 1);
        assert_eq!(purge_tokens(&[], Duration::minutes(30)).await, 0);
    }
}
