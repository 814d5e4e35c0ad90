use sqlx::{sqlite::SqliteRow, Row};

use propdraft_core::domain::job::{ExtractionJob, InputFileRef, JobId, JobStatus};
use propdraft_core::domain::provider::ProviderCapability;

use super::{
    parse_optional_timestamp, parse_timestamp, parse_u32, ExtractionJobRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlExtractionJobRepository {
    pool: DbPool,
}

impl SqlExtractionJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ExtractionJobRepository for SqlExtractionJobRepository {
    async fn save(&self, job: ExtractionJob) -> Result<(), RepositoryError> {
        let size_bytes = i64::try_from(job.input.size_bytes).map_err(|_| {
            RepositoryError::Decode(format!("size_bytes out of range: {}", job.input.size_bytes))
        })?;

        sqlx::query(
            "INSERT INTO extraction_job (
                id,
                correlation_id,
                flight_key,
                file_name,
                file_fingerprint,
                size_bytes,
                status,
                provider,
                attempt_count,
                last_error,
                started_at,
                finished_at,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                provider = excluded.provider,
                attempt_count = excluded.attempt_count,
                last_error = excluded.last_error,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at",
        )
        .bind(&job.id.0)
        .bind(&job.correlation_id)
        .bind(&job.flight_key)
        .bind(&job.input.file_name)
        .bind(&job.input.fingerprint)
        .bind(size_bytes)
        .bind(job.status.as_str())
        .bind(job.provider.map(|provider| provider.as_str()))
        .bind(i64::from(job.attempt_count))
        .bind(&job.last_error)
        .bind(job.started_at.map(|timestamp| timestamp.to_rfc3339()))
        .bind(job.finished_at.map(|timestamp| timestamp.to_rfc3339()))
        .bind(job.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<ExtractionJob>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                correlation_id,
                flight_key,
                file_name,
                file_fingerprint,
                size_bytes,
                status,
                provider,
                attempt_count,
                last_error,
                started_at,
                finished_at,
                created_at
             FROM extraction_job
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(job_from_row).transpose()
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ExtractionJob>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                correlation_id,
                flight_key,
                file_name,
                file_fingerprint,
                size_bytes,
                status,
                provider,
                attempt_count,
                last_error,
                started_at,
                finished_at,
                created_at
             FROM extraction_job
             WHERE status = ?
             ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(job_from_row).collect()
    }
}

fn job_from_row(row: SqliteRow) -> Result<ExtractionJob, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown job status `{status_raw}`")))?;
    let provider = row
        .try_get::<Option<String>, _>("provider")?
        .map(|value| {
            ProviderCapability::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown provider `{value}`")))
        })
        .transpose()?;
    let size_bytes = row.try_get::<i64, _>("size_bytes")?;

    Ok(ExtractionJob {
        id: JobId(row.try_get("id")?),
        correlation_id: row.try_get("correlation_id")?,
        flight_key: row.try_get("flight_key")?,
        input: InputFileRef {
            file_name: row.try_get("file_name")?,
            fingerprint: row.try_get("file_fingerprint")?,
            size_bytes: u64::try_from(size_bytes).map_err(|_| {
                RepositoryError::Decode(format!("negative size_bytes: {size_bytes}"))
            })?,
        },
        status,
        provider,
        attempt_count: parse_u32("attempt_count", row.try_get("attempt_count")?)?,
        last_error: row.try_get("last_error")?,
        started_at: parse_optional_timestamp("started_at", row.try_get("started_at")?)?,
        finished_at: parse_optional_timestamp("finished_at", row.try_get("finished_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
