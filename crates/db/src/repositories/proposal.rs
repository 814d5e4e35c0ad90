use sqlx::{sqlite::SqliteRow, Row};

use propdraft_core::domain::client::ClientId;
use propdraft_core::domain::proposal::{DraftProposal, ProposalId, ProposalItemRow, ProposalStatus};

use super::{
    map_unique_violation, parse_decimal, parse_timestamp, parse_u32, ProposalRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlProposalRepository {
    pool: DbPool,
}

impl SqlProposalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProposalRepository for SqlProposalRepository {
    async fn insert_draft(&self, proposal: DraftProposal) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO proposal (
                id,
                proposal_number,
                source_proposal_number,
                client_id,
                actor_id,
                product_group,
                status,
                total,
                valid_until,
                correlation_id,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&proposal.id.0)
        .bind(&proposal.proposal_number)
        .bind(&proposal.source_proposal_number)
        .bind(&proposal.client_id.0)
        .bind(&proposal.actor_id)
        .bind(&proposal.product_group)
        .bind(proposal.status.as_str())
        .bind(proposal.total.to_string())
        .bind(proposal.valid_until.to_rfc3339())
        .bind(&proposal.correlation_id)
        .bind(proposal.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| map_unique_violation(error, "proposal number already exists"))?;
        Ok(())
    }

    async fn insert_items(&self, items: Vec<ProposalItemRow>) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for item in &items {
            sqlx::query(
                "INSERT INTO proposal_item (
                    id,
                    proposal_id,
                    position,
                    description,
                    quantity,
                    unit_price,
                    total
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&item.id)
            .bind(&item.proposal_id.0)
            .bind(i64::from(item.position))
            .bind(&item.description)
            .bind(item.quantity.to_string())
            .bind(item.unit_price.to_string())
            .bind(item.total.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ProposalId) -> Result<Option<DraftProposal>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                proposal_number,
                source_proposal_number,
                client_id,
                actor_id,
                product_group,
                status,
                total,
                valid_until,
                correlation_id,
                created_at
             FROM proposal
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(proposal_from_row).transpose()
    }

    async fn list_items(&self, id: &ProposalId) -> Result<Vec<ProposalItemRow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, proposal_id, position, description, quantity, unit_price, total
             FROM proposal_item
             WHERE proposal_id = ?
             ORDER BY position ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }
}

fn proposal_from_row(row: SqliteRow) -> Result<DraftProposal, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ProposalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown proposal status `{status_raw}`")))?;

    Ok(DraftProposal {
        id: ProposalId(row.try_get("id")?),
        proposal_number: row.try_get("proposal_number")?,
        source_proposal_number: row.try_get("source_proposal_number")?,
        client_id: ClientId(row.try_get("client_id")?),
        actor_id: row.try_get("actor_id")?,
        product_group: row.try_get("product_group")?,
        status,
        total: parse_decimal("total", row.try_get("total")?)?,
        valid_until: parse_timestamp("valid_until", row.try_get("valid_until")?)?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn item_from_row(row: SqliteRow) -> Result<ProposalItemRow, RepositoryError> {
    Ok(ProposalItemRow {
        id: row.try_get("id")?,
        proposal_id: ProposalId(row.try_get("proposal_id")?),
        position: parse_u32("position", row.try_get("position")?)?,
        description: row.try_get("description")?,
        quantity: parse_decimal("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        total: parse_decimal("total", row.try_get("total")?)?,
    })
}
