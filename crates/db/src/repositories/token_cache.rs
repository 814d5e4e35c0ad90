use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use propdraft_core::domain::token::{CacheKey, CachedTokenRecord, TokenCacheSummary};

use super::{
    parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError, TokenCacheRepository,
};
use crate::DbPool;

pub struct SqlTokenCacheRepository {
    pool: DbPool,
}

impl SqlTokenCacheRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TokenCacheRepository for SqlTokenCacheRepository {
    async fn find_active(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedTokenRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, cache_key, token, created_at, expires_at, active, hit_count, last_used_at
             FROM provider_token_cache
             WHERE cache_key = ? AND active = 1 AND expires_at > ?
             ORDER BY expires_at DESC
             LIMIT 1",
        )
        .bind(&key.0)
        .bind(now.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn store(&self, record: CachedTokenRecord) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE provider_token_cache SET active = 0 WHERE cache_key = ? AND active = 1")
            .bind(&record.cache_key.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO provider_token_cache (
                id,
                cache_key,
                token,
                created_at,
                expires_at,
                active,
                hit_count,
                last_used_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.cache_key.0)
        .bind(&record.token)
        .bind(record.created_at.to_rfc3339())
        .bind(record.expires_at.to_rfc3339())
        .bind(i64::from(record.active))
        .bind(i64::from(record.hit_count))
        .bind(record.last_used_at.map(|timestamp| timestamp.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_hit(&self, id: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE provider_token_cache
             SET hit_count = hit_count + 1, last_used_at = ?
             WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate(&self, key: &CacheKey) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE provider_token_cache SET active = 0 WHERE cache_key = ? AND active = 1",
        )
        .bind(&key.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM provider_token_cache
             WHERE (active = 0 OR expires_at <= ?) AND created_at < ?",
        )
        .bind(now.to_rfc3339())
        .bind(older_than.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn summary(&self, key: &CacheKey) -> Result<TokenCacheSummary, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                COALESCE(SUM(CASE WHEN active = 1 THEN 1 ELSE 0 END), 0) AS active_rows,
                COALESCE(SUM(CASE WHEN active = 0 THEN 1 ELSE 0 END), 0) AS inactive_rows,
                COALESCE(SUM(hit_count), 0) AS total_hits,
                MAX(CASE WHEN active = 1 THEN expires_at END) AS active_expires_at
             FROM provider_token_cache
             WHERE cache_key = ?",
        )
        .bind(&key.0)
        .fetch_one(&self.pool)
        .await?;

        let total_hits: i64 = row.try_get("total_hits")?;
        Ok(TokenCacheSummary {
            active_rows: parse_u32("active_rows", row.try_get("active_rows")?)?,
            inactive_rows: parse_u32("inactive_rows", row.try_get("inactive_rows")?)?,
            total_hits: u64::try_from(total_hits).map_err(|_| {
                RepositoryError::Decode(format!("negative total_hits: {total_hits}"))
            })?,
            active_expires_at: parse_optional_timestamp(
                "active_expires_at",
                row.try_get("active_expires_at")?,
            )?,
        })
    }
}

fn record_from_row(row: SqliteRow) -> Result<CachedTokenRecord, RepositoryError> {
    Ok(CachedTokenRecord {
        id: row.try_get("id")?,
        cache_key: CacheKey(row.try_get("cache_key")?),
        token: row.try_get("token")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
        active: row.try_get::<i64, _>("active")? == 1,
        hit_count: parse_u32("hit_count", row.try_get("hit_count")?)?,
        last_used_at: parse_optional_timestamp("last_used_at", row.try_get("last_used_at")?)?,
    })
}
