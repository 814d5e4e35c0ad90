use thiserror::Error;

use crate::domain::job::{JobId, JobStatus};
use crate::domain::provider::ProviderCapability;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid job transition from {from:?} to {to:?}")]
    InvalidJobTransition { from: JobStatus, to: JobStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Persistence failures, tagged with the stage that failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PersistError {
    #[error("ClientPersistError: {0}")]
    Client(String),
    #[error("ProposalPersistError: {0}")]
    Proposal(String),
    #[error("ItemsPersistError: {0}")]
    Items(String),
}

impl PersistError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Client(_) => "client",
            Self::Proposal(_) => "proposal",
            Self::Items(_) => "items",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("provider {provider} failed: {message}")]
    Provider { provider: ProviderCapability, message: String },
    #[error("extraction exceeded the {limit_secs}s wall-clock limit")]
    Timeout { limit_secs: u64 },
    #[error("an extraction is already running (job {active_job})")]
    ConcurrencyConflict { active_job: JobId },
    #[error("extraction job {0} was cancelled")]
    Cancelled(JobId),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl PipelineError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Authentication(_) => "authentication_error",
            Self::Provider { .. } => "provider_error",
            Self::Timeout { .. } => "timeout_error",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::Cancelled(_) => "cancelled",
            Self::NotFound(_) => "not_found",
            Self::Persist(PersistError::Client(_)) => "client_persist_error",
            Self::Persist(PersistError::Proposal(_)) => "proposal_persist_error",
            Self::Persist(PersistError::Items(_)) => "items_persist_error",
            Self::Domain(_) => "domain_error",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The document could not be processed. Check the file and try again."
            }
            Self::Conflict { .. } => {
                "Another extraction is in progress or was cancelled. Please wait and retry."
            }
            Self::NotFound { .. } => "The requested extraction job was not found.",
            Self::ServiceUnavailable { .. } => {
                "The extraction service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<PipelineError> for InterfaceError {
    fn from(value: PipelineError) -> Self {
        let correlation_id = "unassigned".to_owned();
        let message = value.to_string();
        match value {
            PipelineError::Validation(_) | PipelineError::Domain(_) => {
                Self::BadRequest { message, correlation_id }
            }
            PipelineError::ConcurrencyConflict { .. } | PipelineError::Cancelled(_) => {
                Self::Conflict { message, correlation_id }
            }
            PipelineError::NotFound(_) => Self::NotFound { message, correlation_id },
            PipelineError::Authentication(_)
            | PipelineError::Provider { .. }
            | PipelineError::Timeout { .. } => Self::ServiceUnavailable { message, correlation_id },
            PipelineError::Persist(_) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::job::JobId;
    use crate::domain::provider::ProviderCapability;
    use crate::errors::{InterfaceError, PersistError, PipelineError};

    #[test]
    fn validation_error_maps_to_bad_request_with_correlation_id() {
        let interface = PipelineError::Validation("file exceeds 5242880 bytes".to_owned())
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert_eq!(interface.correlation_id(), "req-1");
    }

    #[test]
    fn concurrency_conflict_maps_to_conflict() {
        let interface = PipelineError::ConcurrencyConflict { active_job: JobId("job-9".to_owned()) }
            .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert!(interface.to_string().contains("job-9"));
    }

    #[test]
    fn provider_error_maps_to_service_unavailable() {
        let interface = PipelineError::Provider {
            provider: ProviderCapability::GenericOcr,
            message: "502 bad gateway".to_owned(),
        }
        .into_interface("req-3");

        assert_eq!(
            interface.user_message(),
            "The extraction service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn persist_errors_are_stage_tagged() {
        let error = PipelineError::from(PersistError::Items("disk full".to_owned()));
        assert_eq!(error.error_class(), "items_persist_error");
        assert!(error.to_string().starts_with("ItemsPersistError"));
        assert!(matches!(error.into_interface("req-4"), InterfaceError::Internal { .. }));
    }
}
