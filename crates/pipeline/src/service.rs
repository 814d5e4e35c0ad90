//! End-to-end flow used by the HTTP server and the CLI: extract, snapshot, save.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use propdraft_core::domain::job::{JobId, JobStatus};
use propdraft_core::domain::proposal::StructuredProposalPayload;
use propdraft_core::domain::provider::ProviderCapability;
use propdraft_core::errors::PipelineError;

use crate::orchestrator::{ExtractionOrchestrator, ExtractionRequest};
use crate::persistence::{PersistencePipeline, SaveOutcome};

#[derive(Clone, Debug, Serialize)]
pub struct ExtractionResult {
    pub correlation_id: String,
    pub job_id: JobId,
    pub status: JobStatus,
    pub provider: Option<ProviderCapability>,
    pub degraded: bool,
    pub needs_review: bool,
    pub confidence: f32,
    pub payload: StructuredProposalPayload,
    pub draft: Option<SaveOutcome>,
    pub draft_skipped_reason: Option<String>,
    pub snapshot_id: Option<String>,
}

pub struct ExtractionService {
    orchestrator: Arc<ExtractionOrchestrator>,
    persistence: Arc<PersistencePipeline>,
}

impl ExtractionService {
    pub fn new(
        orchestrator: Arc<ExtractionOrchestrator>,
        persistence: Arc<PersistencePipeline>,
    ) -> Self {
        Self { orchestrator, persistence }
    }

    pub fn orchestrator(&self) -> &Arc<ExtractionOrchestrator> {
        &self.orchestrator
    }

    pub fn persistence(&self) -> &Arc<PersistencePipeline> {
        &self.persistence
    }

    /// Runs one document through the provider chain and writes a draft.
    ///
    /// A payload that fails the persistence gate (unusable client name, or a
    /// degraded placeholder) is still returned, with `draft` unset and
    /// `needs_review` raised. Storage failures are returned as errors.
    pub async fn extract(
        &self,
        request: ExtractionRequest,
        actor_id: &str,
        product_group: &str,
    ) -> Result<ExtractionResult, PipelineError> {
        if actor_id.trim().is_empty() {
            return Err(PipelineError::Validation("actor id is required".to_string()));
        }
        if product_group.trim().is_empty() {
            return Err(PipelineError::Validation("product group is required".to_string()));
        }

        let extracted = self.orchestrator.submit(request).await?;
        let correlation_id = extracted.correlation_id().to_string();

        let snapshot_id = match self.persistence.record_snapshot(&extracted).await {
            Ok(snapshot) => Some(snapshot.id),
            Err(error) => {
                warn!(
                    event_name = "pipeline.persist.snapshot_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "raw extraction snapshot could not be stored"
                );
                None
            }
        };

        let mut needs_review = extracted.needs_review;
        let (draft, draft_skipped_reason) = match self
            .persistence
            .save(&extracted.payload, actor_id, product_group, &correlation_id)
            .await
        {
            Ok(outcome) => (Some(outcome), None),
            Err(PipelineError::Validation(reason)) => {
                needs_review = true;
                info!(
                    event_name = "pipeline.persist.draft_skipped",
                    correlation_id = %correlation_id,
                    job_id = %extracted.job.id,
                    reason = %reason,
                    "payload needs manual review before a draft can be written"
                );
                (None, Some(reason))
            }
            Err(error) => return Err(error),
        };

        Ok(ExtractionResult {
            correlation_id,
            job_id: extracted.job.id.clone(),
            status: extracted.job.status,
            provider: extracted.provider,
            degraded: extracted.degraded,
            needs_review,
            confidence: extracted.payload.confidence,
            payload: extracted.payload,
            draft,
            draft_skipped_reason,
            snapshot_id,
        })
    }

    pub async fn save_value(
        &self,
        value: &Value,
        actor_id: &str,
        product_group: &str,
        correlation_id: &str,
    ) -> Result<SaveOutcome, PipelineError> {
        self.persistence.save_value(value, actor_id, product_group, correlation_id).await
    }
}
