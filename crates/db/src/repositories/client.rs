use sqlx::{sqlite::SqliteRow, Row};

use propdraft_core::domain::client::{ClientId, ClientRecord};

use super::{map_unique_violation, parse_timestamp, ClientRepository, RepositoryError};
use crate::DbPool;

pub struct SqlClientRepository {
    pool: DbPool,
}

impl SqlClientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ClientRepository for SqlClientRepository {
    async fn find_by_id(&self, id: &ClientId) -> Result<Option<ClientRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, company, created_at, updated_at
             FROM client
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(client_from_row).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ClientRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, company, created_at, updated_at
             FROM client
             WHERE name = ?",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(client_from_row).transpose()
    }

    async fn insert(&self, client: ClientRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO client (id, name, email, phone, company, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&client.id.0)
        .bind(client.name.trim())
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.company)
        .bind(client.created_at.to_rfc3339())
        .bind(client.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| map_unique_violation(error, "client name already exists"))?;
        Ok(())
    }

    async fn update_contact(&self, client: &ClientRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE client SET email = ?, phone = ?, company = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.company)
        .bind(client.updated_at.to_rfc3339())
        .bind(&client.id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn client_from_row(row: SqliteRow) -> Result<ClientRecord, RepositoryError> {
    Ok(ClientRecord {
        id: ClientId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        company: row.try_get("company")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use propdraft_core::domain::client::{ClientId, ClientRecord};

    use super::SqlClientRepository;
    use crate::repositories::test_support::{parse_ts, setup_pool};
    use crate::repositories::{ClientRepository, RepositoryError};

    #[tokio::test]
    async fn insert_and_lookup_by_exact_name() {
        let pool = setup_pool().await;
        let repo = SqlClientRepository::new(pool.clone());
        let now = parse_ts("2026-03-02T12:00:00Z");

        let client = ClientRecord::named(ClientId("CLI-1".to_string()), "JOAO DA SILVA", now);
        repo.insert(client.clone()).await.expect("insert");

        assert_eq!(repo.find_by_name("JOAO DA SILVA").await.expect("find"), Some(client.clone()));
        assert_eq!(repo.find_by_id(&client.id).await.expect("find"), Some(client));
        assert_eq!(repo.find_by_name("Joao da Silva").await.expect("find"), None);

        pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_names_are_reported_as_conflicts() {
        let pool = setup_pool().await;
        let repo = SqlClientRepository::new(pool.clone());
        let now = parse_ts("2026-03-02T12:00:00Z");

        repo.insert(ClientRecord::named(ClientId("CLI-1".to_string()), "Maria Santos", now))
            .await
            .expect("insert");
        let error = repo
            .insert(ClientRecord::named(ClientId("CLI-2".to_string()), "Maria Santos", now))
            .await
            .expect_err("duplicate name");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        pool.close().await;
    }

    #[tokio::test]
    async fn contact_update_persists_filled_fields() {
        let pool = setup_pool().await;
        let repo = SqlClientRepository::new(pool.clone());
        let now = parse_ts("2026-03-02T12:00:00Z");

        let mut client = ClientRecord::named(ClientId("CLI-1".to_string()), "Maria Santos", now);
        repo.insert(client.clone()).await.expect("insert");

        let later = parse_ts("2026-03-03T09:00:00Z");
        assert!(client.fill_missing(Some("(11) 98765-4321"), None, later));
        repo.update_contact(&client).await.expect("update");

        let stored = repo.find_by_id(&client.id).await.expect("find").expect("client");
        assert_eq!(stored.phone.as_deref(), Some("(11) 98765-4321"));
        assert_eq!(stored.company, None);
        assert_eq!(stored.updated_at, later);

        pool.close().await;
    }
}
