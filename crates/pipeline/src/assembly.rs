//! Wires the configured providers, caches and stores into one extraction service.

use std::sync::Arc;
use std::time::Duration;

use propdraft_core::clock::{Clock, SystemClock};
use propdraft_core::config::AppConfig;
use propdraft_core::domain::provider::ProviderCapability;
use propdraft_core::domain::token::CacheKey;
use propdraft_core::parser::{HeuristicDataParser, HeuristicLexicon};
use propdraft_db::repositories::{
    SqlClientRepository, SqlExtractionJobRepository, SqlProposalRepository,
    SqlRawExtractionRepository, SqlTokenCacheRepository, TokenCacheRepository,
};
use propdraft_db::DbPool;

use crate::orchestrator::{ExtractionOrchestrator, OrchestratorSettings, ProviderSlot};
use crate::persistence::{PersistencePipeline, PersistenceSettings};
use crate::providers::{
    build_http_client, ClientCredentialsAuthenticator, DocumentIntelligenceClient,
    GenericOcrClient,
};
use crate::service::ExtractionService;
use crate::token_cache::{CredentialTokenCache, TokenPolicy};

/// Long-lived pipeline pieces owned by a binary's root.
pub struct PipelineComponents {
    pub service: Arc<ExtractionService>,
    pub token_caches: Vec<Arc<CredentialTokenCache>>,
}

impl PipelineComponents {
    pub fn from_config(config: &AppConfig, pool: DbPool) -> Result<Self, reqwest::Error> {
        Self::with_clock(config, pool, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &AppConfig,
        pool: DbPool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, reqwest::Error> {
        let http =
            build_http_client(Duration::from_secs(config.providers.request_timeout_secs))?;
        let token_store: Arc<dyn TokenCacheRepository> =
            Arc::new(SqlTokenCacheRepository::new(pool.clone()));
        let policy = TokenPolicy::from_config(&config.token);

        let primary = &config.providers.document_intelligence;
        let primary_auth = ClientCredentialsAuthenticator::new(
            http.clone(),
            primary.auth_url.clone(),
            primary.client_id.clone(),
            primary.client_secret.clone(),
        )
        .with_org_id(primary.org_id.clone())
        .with_scope(primary.scope.clone());
        let primary_tokens = Arc::new(CredentialTokenCache::new(
            cache_key(ProviderCapability::DocumentIntelligence, &primary.client_id),
            Arc::new(primary_auth),
            token_store.clone(),
            clock.clone(),
            policy,
        ));

        let mut slots = vec![ProviderSlot::new(
            Arc::new(DocumentIntelligenceClient::new(http.clone(), primary)),
            primary_tokens.clone(),
        )];
        let mut token_caches = vec![primary_tokens];

        let ocr = &config.providers.generic_ocr;
        if ocr.enabled {
            let (client_id, client_secret) = ocr.credentials(primary);
            let ocr_auth = ClientCredentialsAuthenticator::new(
                http.clone(),
                ocr.auth_url.clone(),
                client_id,
                client_secret.clone(),
            );
            let ocr_tokens = Arc::new(CredentialTokenCache::new(
                cache_key(ProviderCapability::GenericOcr, client_id),
                Arc::new(ocr_auth),
                token_store,
                clock.clone(),
                policy,
            ));
            slots.push(ProviderSlot::new(
                Arc::new(GenericOcrClient::new(http, ocr)),
                ocr_tokens.clone(),
            ));
            token_caches.push(ocr_tokens);
        }

        let lexicon = HeuristicLexicon::from_config(&config.heuristics);
        let orchestrator = ExtractionOrchestrator::new(
            slots,
            HeuristicDataParser::new(lexicon.clone()),
            Arc::new(SqlExtractionJobRepository::new(pool.clone())),
            clock.clone(),
            OrchestratorSettings::from_config(config),
        );
        let persistence = PersistencePipeline::new(
            Arc::new(SqlClientRepository::new(pool.clone())),
            Arc::new(SqlProposalRepository::new(pool.clone())),
            Arc::new(SqlRawExtractionRepository::new(pool)),
            lexicon,
            clock,
            PersistenceSettings::from_config(&config.proposal),
        );

        Ok(Self {
            service: Arc::new(ExtractionService::new(
                Arc::new(orchestrator),
                Arc::new(persistence),
            )),
            token_caches,
        })
    }
}

/// One cache row set per provider and credential.
pub fn cache_key(provider: ProviderCapability, client_id: &str) -> CacheKey {
    CacheKey(format!("{provider}:{}", client_id.trim()))
}

#[cfg(test)]
mod tests {
    use propdraft_core::config::AppConfig;
    use propdraft_core::domain::provider::ProviderCapability;
    use propdraft_db::{connect_with_settings, migrations};

    use super::{cache_key, PipelineComponents};

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.providers.document_intelligence.client_id = "propdraft".to_string();
        config.providers.document_intelligence.client_secret = "s3cret".to_string().into();
        config
    }

    #[tokio::test]
    async fn enabled_ocr_joins_the_chain_with_shared_credentials() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");

        let components = PipelineComponents::from_config(&config(), pool.clone()).expect("wired");

        assert_eq!(
            components.service.orchestrator().chain(),
            vec![ProviderCapability::DocumentIntelligence, ProviderCapability::GenericOcr]
        );
        let keys: Vec<String> =
            components.token_caches.iter().map(|cache| cache.key().0.clone()).collect();
        assert_eq!(keys, vec!["document_intelligence:propdraft", "generic_ocr:propdraft"]);

        pool.close().await;
    }

    #[tokio::test]
    async fn disabled_ocr_leaves_a_single_provider() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        let mut config = config();
        config.providers.generic_ocr.enabled = false;

        let components = PipelineComponents::from_config(&config, pool.clone()).expect("wired");

        assert_eq!(
            components.service.orchestrator().chain(),
            vec![ProviderCapability::DocumentIntelligence]
        );
        assert_eq!(components.token_caches.len(), 1);
        pool.close().await;
    }

    #[test]
    fn cache_keys_trim_the_client_id() {
        assert_eq!(
            cache_key(ProviderCapability::GenericOcr, " ocr-client ").0,
            "generic_ocr:ocr-client"
        );
    }
}
