use sqlx::{sqlite::SqliteRow, Row};

use propdraft_core::domain::proposal::RawExtractionSnapshot;
use propdraft_core::domain::provider::ProviderCapability;

use super::{parse_decimal, parse_timestamp, RawExtractionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlRawExtractionRepository {
    pool: DbPool,
}

impl SqlRawExtractionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RawExtractionRepository for SqlRawExtractionRepository {
    async fn append(&self, snapshot: RawExtractionSnapshot) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO raw_extraction (
                id,
                correlation_id,
                file_name,
                file_fingerprint,
                provider,
                payload_json,
                extracted_total,
                client_name,
                confidence,
                degraded,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.correlation_id)
        .bind(&snapshot.file_name)
        .bind(&snapshot.file_fingerprint)
        .bind(snapshot.provider.map(|provider| provider.as_str()))
        .bind(&snapshot.payload_json)
        .bind(snapshot.extracted_total.to_string())
        .bind(&snapshot.client_name)
        .bind(f64::from(snapshot.confidence))
        .bind(i64::from(snapshot.degraded))
        .bind(snapshot.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<RawExtractionSnapshot>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                correlation_id,
                file_name,
                file_fingerprint,
                provider,
                payload_json,
                extracted_total,
                client_name,
                confidence,
                degraded,
                created_at
             FROM raw_extraction
             WHERE correlation_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(snapshot_from_row).collect()
    }
}

fn snapshot_from_row(row: SqliteRow) -> Result<RawExtractionSnapshot, RepositoryError> {
    let provider = row
        .try_get::<Option<String>, _>("provider")?
        .map(|value| {
            ProviderCapability::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown provider `{value}`")))
        })
        .transpose()?;

    Ok(RawExtractionSnapshot {
        id: row.try_get("id")?,
        correlation_id: row.try_get("correlation_id")?,
        file_name: row.try_get("file_name")?,
        file_fingerprint: row.try_get("file_fingerprint")?,
        provider,
        payload_json: row.try_get("payload_json")?,
        extracted_total: parse_decimal("extracted_total", row.try_get("extracted_total")?)?,
        client_name: row.try_get("client_name")?,
        confidence: row.try_get::<f64, _>("confidence")? as f32,
        degraded: row.try_get::<i64, _>("degraded")? == 1,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use propdraft_core::domain::proposal::RawExtractionSnapshot;
    use propdraft_core::domain::provider::ProviderCapability;

    use super::SqlRawExtractionRepository;
    use crate::repositories::test_support::{parse_ts, setup_pool};
    use crate::repositories::RawExtractionRepository;

    fn snapshot(id: &str, degraded: bool) -> RawExtractionSnapshot {
        RawExtractionSnapshot {
            id: id.to_string(),
            correlation_id: "corr-9".to_string(),
            file_name: "proposta.pdf".to_string(),
            file_fingerprint: "sha256:ab".to_string(),
            provider: (!degraded).then_some(ProviderCapability::DocumentIntelligence),
            payload_json: "{\"client_name\":\"JOAO DA SILVA\"}".to_string(),
            extracted_total: Decimal::new(20000, 2),
            client_name: Some("JOAO DA SILVA".to_string()),
            confidence: 0.75,
            degraded,
            created_at: parse_ts("2026-03-02T12:00:00Z"),
        }
    }

    #[tokio::test]
    async fn snapshots_are_appended_not_replaced() {
        let pool = setup_pool().await;
        let repo = SqlRawExtractionRepository::new(pool.clone());

        repo.append(snapshot("RAW-1", false)).await.expect("append");
        repo.append(snapshot("RAW-2", true)).await.expect("append");
        assert!(repo.append(snapshot("RAW-1", false)).await.is_err());

        let stored = repo.list_by_correlation("corr-9").await.expect("list");
        assert_eq!(stored, vec![snapshot("RAW-1", false), snapshot("RAW-2", true)]);

        pool.close().await;
    }
}
