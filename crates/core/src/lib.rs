pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod parser;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::client::{ClientId, ClientRecord};
pub use domain::job::{ExtractionJob, InputFileRef, JobId, JobStatus};
pub use domain::proposal::{
    DraftProposal, LineItem, ParseWarning, ProposalId, ProposalStatus, RawExtractionSnapshot,
    StructuredProposalPayload,
};
pub use domain::provider::{ExtractionMethod, NormalizedDocument, ProviderCapability, RawTable};
pub use domain::token::{AccessToken, CacheKey, CachedTokenRecord, IssuedToken, TokenSource};
pub use errors::{DomainError, InterfaceError, PersistError, PipelineError};
pub use parser::{HeuristicDataParser, HeuristicLexicon};
