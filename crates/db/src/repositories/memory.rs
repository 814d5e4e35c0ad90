use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use propdraft_core::domain::client::{ClientId, ClientRecord};
use propdraft_core::domain::job::{ExtractionJob, JobId, JobStatus};
use propdraft_core::domain::proposal::{
    DraftProposal, ProposalId, ProposalItemRow, RawExtractionSnapshot,
};
use propdraft_core::domain::token::{CacheKey, CachedTokenRecord, TokenCacheSummary};

use super::{
    ClientRepository, ExtractionJobRepository, ProposalRepository, RawExtractionRepository,
    RepositoryError, TokenCacheRepository,
};

#[derive(Default)]
pub struct InMemoryTokenCacheRepository {
    rows: RwLock<Vec<CachedTokenRecord>>,
}

#[async_trait::async_trait]
impl TokenCacheRepository for InMemoryTokenCacheRepository {
    async fn find_active(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedTokenRecord>, RepositoryError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|row| row.cache_key == *key && row.active && row.expires_at > now)
            .max_by_key(|row| row.expires_at)
            .cloned())
    }

    async fn store(&self, record: CachedTokenRecord) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|row| row.id == record.id) {
            return Err(RepositoryError::Conflict(format!("token row `{}` exists", record.id)));
        }
        for row in rows.iter_mut().filter(|row| row.cache_key == record.cache_key) {
            row.active = false;
        }
        rows.push(record);
        Ok(())
    }

    async fn record_hit(&self, id: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.hit_count = row.hit_count.saturating_add(1);
            row.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn deactivate(&self, key: &CacheKey) -> Result<u64, RepositoryError> {
        let mut rows = self.rows.write().await;
        let mut changed = 0;
        for row in rows.iter_mut().filter(|row| row.cache_key == *key && row.active) {
            row.active = false;
            changed += 1;
        }
        Ok(changed)
    }

    async fn purge(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| !((!row.active || row.expires_at <= now) && row.created_at < older_than));
        Ok((before - rows.len()) as u64)
    }

    async fn summary(&self, key: &CacheKey) -> Result<TokenCacheSummary, RepositoryError> {
        let rows = self.rows.read().await;
        let mut summary = TokenCacheSummary::default();
        for row in rows.iter().filter(|row| row.cache_key == *key) {
            if row.active {
                summary.active_rows += 1;
                summary.active_expires_at = summary.active_expires_at.max(Some(row.expires_at));
            } else {
                summary.inactive_rows += 1;
            }
            summary.total_hits += u64::from(row.hit_count);
        }
        Ok(summary)
    }
}

#[derive(Default)]
pub struct InMemoryClientRepository {
    clients: RwLock<HashMap<String, ClientRecord>>,
}

#[async_trait::async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn find_by_id(&self, id: &ClientId) -> Result<Option<ClientRecord>, RepositoryError> {
        let clients = self.clients.read().await;
        Ok(clients.get(&id.0).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ClientRecord>, RepositoryError> {
        let clients = self.clients.read().await;
        let name = name.trim();
        Ok(clients.values().find(|client| client.name == name).cloned())
    }

    async fn insert(&self, client: ClientRecord) -> Result<(), RepositoryError> {
        let mut clients = self.clients.write().await;
        if clients.values().any(|existing| existing.name == client.name.trim()) {
            return Err(RepositoryError::Conflict(format!(
                "client name already exists: {}",
                client.name
            )));
        }
        clients.insert(client.id.0.clone(), client);
        Ok(())
    }

    async fn update_contact(&self, client: &ClientRecord) -> Result<(), RepositoryError> {
        let mut clients = self.clients.write().await;
        if let Some(existing) = clients.get_mut(&client.id.0) {
            existing.email = client.email.clone();
            existing.phone = client.phone.clone();
            existing.company = client.company.clone();
            existing.updated_at = client.updated_at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProposalRepository {
    proposals: RwLock<HashMap<String, DraftProposal>>,
    items: RwLock<Vec<ProposalItemRow>>,
}

#[async_trait::async_trait]
impl ProposalRepository for InMemoryProposalRepository {
    async fn insert_draft(&self, proposal: DraftProposal) -> Result<(), RepositoryError> {
        let mut proposals = self.proposals.write().await;
        if proposals.values().any(|existing| existing.proposal_number == proposal.proposal_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "proposal number already exists: {}",
                proposal.proposal_number
            )));
        }
        proposals.insert(proposal.id.0.clone(), proposal);
        Ok(())
    }

    async fn insert_items(&self, new_items: Vec<ProposalItemRow>) -> Result<(), RepositoryError> {
        let proposals = self.proposals.read().await;
        if let Some(orphan) =
            new_items.iter().find(|item| !proposals.contains_key(&item.proposal_id.0))
        {
            return Err(RepositoryError::Conflict(format!(
                "proposal `{}` does not exist",
                orphan.proposal_id.0
            )));
        }

        let mut items = self.items.write().await;
        items.extend(new_items);
        Ok(())
    }

    async fn find_by_id(&self, id: &ProposalId) -> Result<Option<DraftProposal>, RepositoryError> {
        let proposals = self.proposals.read().await;
        Ok(proposals.get(&id.0).cloned())
    }

    async fn list_items(&self, id: &ProposalId) -> Result<Vec<ProposalItemRow>, RepositoryError> {
        let items = self.items.read().await;
        let mut found: Vec<ProposalItemRow> =
            items.iter().filter(|item| item.proposal_id == *id).cloned().collect();
        found.sort_by_key(|item| item.position);
        Ok(found)
    }
}

#[derive(Default)]
pub struct InMemoryRawExtractionRepository {
    snapshots: RwLock<Vec<RawExtractionSnapshot>>,
}

#[async_trait::async_trait]
impl RawExtractionRepository for InMemoryRawExtractionRepository {
    async fn append(&self, snapshot: RawExtractionSnapshot) -> Result<(), RepositoryError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.push(snapshot);
        Ok(())
    }

    async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<RawExtractionSnapshot>, RepositoryError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .iter()
            .filter(|snapshot| snapshot.correlation_id == correlation_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryExtractionJobRepository {
    jobs: RwLock<HashMap<String, ExtractionJob>>,
}

#[async_trait::async_trait]
impl ExtractionJobRepository for InMemoryExtractionJobRepository {
    async fn save(&self, job: ExtractionJob) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.0.clone(), job);
        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<ExtractionJob>, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id.0).cloned())
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ExtractionJob>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut found: Vec<ExtractionJob> =
            jobs.values().filter(|job| job.status == status).cloned().collect();
        found.sort_by_key(|job| job.created_at);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use propdraft_core::domain::client::{ClientId, ClientRecord};
    use propdraft_core::domain::token::{CacheKey, CachedTokenRecord};

    use crate::repositories::test_support::parse_ts;
    use crate::repositories::{
        ClientRepository, InMemoryClientRepository, InMemoryTokenCacheRepository, RepositoryError,
        TokenCacheRepository,
    };

    #[tokio::test]
    async fn in_memory_token_cache_matches_sql_semantics() {
        let repo = InMemoryTokenCacheRepository::default();
        let key = CacheKey("generic_ocr".to_string());
        let created_at = parse_ts("2026-03-02T11:00:00Z");

        for (id, minutes) in [("tok-1", 60), ("tok-2", 120)] {
            repo.store(CachedTokenRecord {
                id: id.to_string(),
                cache_key: key.clone(),
                token: format!("value-{id}"),
                created_at,
                expires_at: created_at + Duration::minutes(minutes),
                active: true,
                hit_count: 0,
                last_used_at: None,
            })
            .await
            .expect("store");
        }

        let now = parse_ts("2026-03-02T11:30:00Z");
        let active = repo.find_active(&key, now).await.expect("find").expect("active");
        assert_eq!(active.id, "tok-2");

        let summary = repo.summary(&key).await.expect("summary");
        assert_eq!((summary.active_rows, summary.inactive_rows), (1, 1));

        let removed = repo.purge(now, now).await.expect("purge");
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn in_memory_clients_enforce_unique_names() {
        let repo = InMemoryClientRepository::default();
        let now = parse_ts("2026-03-02T12:00:00Z");

        repo.insert(ClientRecord::named(ClientId("CLI-1".to_string()), "Maria Santos", now))
            .await
            .expect("insert");
        let error = repo
            .insert(ClientRecord::named(ClientId("CLI-2".to_string()), "Maria Santos", now))
            .await
            .expect_err("duplicate");
        assert!(matches!(error, RepositoryError::Conflict(_)));
        assert!(repo.find_by_name(" Maria Santos ").await.expect("find").is_some());
    }
}
