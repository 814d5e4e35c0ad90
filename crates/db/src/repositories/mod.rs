use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use propdraft_core::domain::client::{ClientId, ClientRecord};
use propdraft_core::domain::job::{ExtractionJob, JobId, JobStatus};
use propdraft_core::domain::proposal::{
    DraftProposal, ProposalId, ProposalItemRow, RawExtractionSnapshot,
};
use propdraft_core::domain::token::{CacheKey, CachedTokenRecord, TokenCacheSummary};

pub mod client;
pub mod extraction_job;
pub mod memory;
pub mod proposal;
pub mod raw_extraction;
pub mod token_cache;

pub use client::SqlClientRepository;
pub use extraction_job::SqlExtractionJobRepository;
pub use memory::{
    InMemoryClientRepository, InMemoryExtractionJobRepository, InMemoryProposalRepository,
    InMemoryRawExtractionRepository, InMemoryTokenCacheRepository,
};
pub use proposal::SqlProposalRepository;
pub use raw_extraction::SqlRawExtractionRepository;
pub use token_cache::SqlTokenCacheRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Durable side of the credential token cache. At most one row per key is
/// active at a time.
#[async_trait]
pub trait TokenCacheRepository: Send + Sync {
    /// Active row for `key` whose expiry is still in the future, latest expiry first.
    async fn find_active(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedTokenRecord>, RepositoryError>;

    /// Deactivates every active row for the record's key, then inserts it.
    async fn store(&self, record: CachedTokenRecord) -> Result<(), RepositoryError>;

    async fn record_hit(&self, id: &str, now: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn deactivate(&self, key: &CacheKey) -> Result<u64, RepositoryError>;

    /// Deletes rows that are inactive or expired and were created before `older_than`.
    async fn purge(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    async fn summary(&self, key: &CacheKey) -> Result<TokenCacheSummary, RepositoryError>;
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn find_by_id(&self, id: &ClientId) -> Result<Option<ClientRecord>, RepositoryError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<ClientRecord>, RepositoryError>;
    async fn insert(&self, client: ClientRecord) -> Result<(), RepositoryError>;
    async fn update_contact(&self, client: &ClientRecord) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProposalRepository: Send + Sync {
    async fn insert_draft(&self, proposal: DraftProposal) -> Result<(), RepositoryError>;

    /// All rows are written in one transaction; either every item lands or none do.
    async fn insert_items(&self, items: Vec<ProposalItemRow>) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &ProposalId) -> Result<Option<DraftProposal>, RepositoryError>;
    async fn list_items(&self, id: &ProposalId) -> Result<Vec<ProposalItemRow>, RepositoryError>;
}

/// Append-only store of parse snapshots.
#[async_trait]
pub trait RawExtractionRepository: Send + Sync {
    async fn append(&self, snapshot: RawExtractionSnapshot) -> Result<(), RepositoryError>;
    async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<RawExtractionSnapshot>, RepositoryError>;
}

#[async_trait]
pub trait ExtractionJobRepository: Send + Sync {
    async fn save(&self, job: ExtractionJob) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &JobId) -> Result<Option<ExtractionJob>, RepositoryError>;
    async fn list_by_status(&self, status: JobStatus)
        -> Result<Vec<ExtractionJob>, RepositoryError>;
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn map_unique_violation(error: sqlx::Error, context: &str) -> RepositoryError {
    match &error {
        sqlx::Error::Database(database_error) if database_error.is_unique_violation() => {
            RepositoryError::Conflict(format!("{context}: {}", database_error.message()))
        }
        _ => RepositoryError::Database(error),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};

    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn setup_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    pub fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
