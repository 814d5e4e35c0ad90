pub mod assembly;
pub mod orchestrator;
pub mod persistence;
pub mod providers;
pub mod service;
pub mod token_cache;

pub use assembly::PipelineComponents;
pub use orchestrator::{
    ExtractedData, ExtractionOrchestrator, ExtractionRequest, OrchestratorSettings, ProviderSlot,
    GLOBAL_FLIGHT_KEY,
};
pub use persistence::{PersistencePipeline, PersistenceSettings, SaveOutcome};
pub use providers::{
    build_http_client, ClientCredentialsAuthenticator, DocumentInput, DocumentIntelligenceClient,
    GenericOcrClient, ProviderClient, ProviderError,
};
pub use service::{ExtractionResult, ExtractionService};
pub use token_cache::{
    AuthError, Authenticator, CredentialTokenCache, TokenCacheStats, TokenPolicy,
};
