//! Turns a structured payload into a client, a draft proposal and its items.
//!
//! Writes happen in stages (client, proposal, items). A failed stage does not
//! roll back earlier ones; re-running is safe because clients are resolved by
//! exact name.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use propdraft_core::clock::Clock;
use propdraft_core::config::ProposalConfig;
use propdraft_core::domain::client::{ClientId, ClientRecord};
use propdraft_core::domain::proposal::{
    checked_sum, generate_proposal_number, ClientContact, DraftProposal, LineItem, ProposalId,
    ProposalItemRow, ProposalStatus, RawExtractionSnapshot, StructuredProposalPayload,
};
use propdraft_core::errors::{PersistError, PipelineError};
use propdraft_core::parser::number::parse_decimal_br;
use propdraft_core::parser::HeuristicLexicon;
use propdraft_db::repositories::{
    ClientRepository, ProposalRepository, RawExtractionRepository,
};
use propdraft_db::RepositoryError;

use crate::orchestrator::ExtractedData;

const PROPOSAL_NUMBER_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistenceSettings {
    pub number_prefix: String,
    pub validity_days: i64,
}

impl PersistenceSettings {
    pub fn from_config(config: &ProposalConfig) -> Self {
        Self { number_prefix: config.number_prefix.clone(), validity_days: config.validity_days }
    }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self { number_prefix: "PROP".to_string(), validity_days: 30 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SaveOutcome {
    pub proposal_id: ProposalId,
    pub proposal_number: String,
    pub client_id: ClientId,
    pub client_created: bool,
    pub item_count: usize,
    pub total: Decimal,
    pub confidence_score: f32,
}

pub struct PersistencePipeline {
    clients: Arc<dyn ClientRepository>,
    proposals: Arc<dyn ProposalRepository>,
    snapshots: Arc<dyn RawExtractionRepository>,
    lexicon: HeuristicLexicon,
    clock: Arc<dyn Clock>,
    settings: PersistenceSettings,
}

impl PersistencePipeline {
    pub fn new(
        clients: Arc<dyn ClientRepository>,
        proposals: Arc<dyn ProposalRepository>,
        snapshots: Arc<dyn RawExtractionRepository>,
        lexicon: HeuristicLexicon,
        clock: Arc<dyn Clock>,
        settings: PersistenceSettings,
    ) -> Self {
        Self { clients, proposals, snapshots, lexicon, clock, settings }
    }

    pub async fn save(
        &self,
        payload: &StructuredProposalPayload,
        actor_id: &str,
        product_group: &str,
        correlation_id: &str,
    ) -> Result<SaveOutcome, PipelineError> {
        let client_name = self.validate(payload, actor_id, product_group)?;
        let now = self.clock.now();

        let items: Vec<LineItem> = payload.line_items.iter().map(normalize_item).collect();
        let total = match payload.total_override {
            Some(total) => total,
            None => checked_sum(items.iter().map(|item| item.total)).ok_or_else(|| {
                PipelineError::Validation("line item totals exceed the supported range".to_string())
            })?,
        };

        let (client, client_created) =
            self.resolve_client(client_name, &payload.client_contact).await?;

        let proposal = self
            .insert_draft(DraftProposal {
                id: ProposalId::generate(),
                proposal_number: String::new(),
                source_proposal_number: payload.proposal_number.clone(),
                client_id: client.id.clone(),
                actor_id: actor_id.trim().to_string(),
                product_group: product_group.trim().to_string(),
                status: ProposalStatus::Draft,
                total,
                valid_until: now + Duration::days(self.settings.validity_days),
                correlation_id: correlation_id.to_string(),
                created_at: now,
            })
            .await?;

        let rows: Vec<ProposalItemRow> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| ProposalItemRow {
                id: format!("ITM-{}", uuid::Uuid::new_v4()),
                proposal_id: proposal.id.clone(),
                position: u32::try_from(index + 1).unwrap_or(u32::MAX),
                description: item.description,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total: item.total,
            })
            .collect();
        let item_count = rows.len();
        if !rows.is_empty() {
            self.proposals
                .insert_items(rows)
                .await
                .map_err(|error| PersistError::Items(error.to_string()))?;
        }

        info!(
            event_name = "pipeline.persist.draft_created",
            correlation_id,
            proposal_id = %proposal.id,
            proposal_number = %proposal.proposal_number,
            client_id = %client.id.0,
            client_created,
            item_count,
            "draft proposal persisted"
        );

        Ok(SaveOutcome {
            proposal_id: proposal.id,
            proposal_number: proposal.proposal_number,
            client_id: client.id,
            client_created,
            item_count,
            total,
            confidence_score: payload.confidence,
        })
    }

    /// Same as [`Self::save`] for payloads that arrive as untyped JSON.
    pub async fn save_value(
        &self,
        value: &Value,
        actor_id: &str,
        product_group: &str,
        correlation_id: &str,
    ) -> Result<SaveOutcome, PipelineError> {
        let Value::Object(object) = value else {
            return Err(PipelineError::Validation("payload must be a JSON object".to_string()));
        };
        let payload = payload_from_object(object);
        self.save(&payload, actor_id, product_group, correlation_id).await
    }

    /// Appends the raw parse result. Independent of whether a draft gets written.
    pub async fn record_snapshot(
        &self,
        extracted: &ExtractedData,
    ) -> Result<RawExtractionSnapshot, RepositoryError> {
        let payload_json = serde_json::to_string(&extracted.payload)
            .map_err(|error| RepositoryError::Decode(format!("payload not encodable: {error}")))?;

        let snapshot = RawExtractionSnapshot {
            id: format!("RAW-{}", uuid::Uuid::new_v4()),
            correlation_id: extracted.job.correlation_id.clone(),
            file_name: extracted.job.input.file_name.clone(),
            file_fingerprint: extracted.job.input.fingerprint.clone(),
            provider: extracted.provider,
            payload_json,
            extracted_total: extracted.payload.total,
            client_name: extracted.payload.client_name.clone(),
            confidence: extracted.payload.confidence,
            degraded: extracted.degraded,
            created_at: self.clock.now(),
        };
        self.snapshots.append(snapshot.clone()).await?;
        Ok(snapshot)
    }

    fn validate<'a>(
        &self,
        payload: &'a StructuredProposalPayload,
        actor_id: &str,
        product_group: &str,
    ) -> Result<&'a str, PipelineError> {
        let client_name = match payload.client_name.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(PipelineError::Validation(
                    "client name is missing; review the document manually".to_string(),
                ))
            }
            Some(name) if !self.lexicon.is_valid_client_name(name) => {
                return Err(PipelineError::Validation(format!(
                    "client name `{name}` does not look like a person or company name"
                )))
            }
            Some(name) => name,
        };
        if actor_id.trim().is_empty() {
            return Err(PipelineError::Validation("actor id is required".to_string()));
        }
        if product_group.trim().is_empty() {
            return Err(PipelineError::Validation("product group is required".to_string()));
        }
        Ok(client_name)
    }

    async fn resolve_client(
        &self,
        name: &str,
        contact: &ClientContact,
    ) -> Result<(ClientRecord, bool), PipelineError> {
        let now = self.clock.now();
        let client_error = |error: RepositoryError| PersistError::Client(error.to_string());

        if let Some(mut existing) = self.clients.find_by_name(name).await.map_err(client_error)? {
            if existing.fill_missing(contact.phone.as_deref(), contact.company.as_deref(), now) {
                self.clients.update_contact(&existing).await.map_err(client_error)?;
            }
            return Ok((existing, false));
        }

        let created = ClientRecord::named(ClientId::generate(), name, now);
        match self.clients.insert(created.clone()).await {
            Ok(()) => Ok((created, true)),
            // Lost a race with a concurrent insert of the same name.
            Err(RepositoryError::Conflict(_)) => {
                let existing = self
                    .clients
                    .find_by_name(name)
                    .await
                    .map_err(client_error)?
                    .ok_or_else(|| PersistError::Client(format!("client `{name}` vanished")))?;
                Ok((existing, false))
            }
            Err(error) => Err(client_error(error).into()),
        }
    }

    /// Inserts the draft under a freshly generated number, retrying on number collisions.
    async fn insert_draft(
        &self,
        mut proposal: DraftProposal,
    ) -> Result<DraftProposal, PipelineError> {
        let mut last_error = None;
        for _ in 0..PROPOSAL_NUMBER_ATTEMPTS {
            proposal.proposal_number =
                generate_proposal_number(&self.settings.number_prefix, proposal.created_at);
            match self.proposals.insert_draft(proposal.clone()).await {
                Ok(()) => return Ok(proposal),
                Err(RepositoryError::Conflict(message)) => {
                    warn!(
                        event_name = "pipeline.persist.number_collision",
                        proposal_number = %proposal.proposal_number,
                        "generated proposal number already taken, regenerating"
                    );
                    last_error = Some(message);
                }
                Err(error) => return Err(PersistError::Proposal(error.to_string()).into()),
            }
        }
        Err(PersistError::Proposal(last_error.unwrap_or_default()).into())
    }
}

/// Quantity falls back to 1 and price to 0; the total is recomputed when either was replaced.
fn normalize_item(item: &LineItem) -> LineItem {
    let quantity_ok = item.quantity > Decimal::ZERO;
    let price_ok = item.unit_price >= Decimal::ZERO;
    if quantity_ok && price_ok {
        return item.clone();
    }

    let quantity = if quantity_ok { item.quantity } else { Decimal::ONE };
    let unit_price = if price_ok { item.unit_price } else { Decimal::ZERO };
    LineItem::new(item.description.clone(), quantity, unit_price)
}

fn payload_from_object(object: &Map<String, Value>) -> StructuredProposalPayload {
    let contact = object.get("client_contact").and_then(Value::as_object);
    let items = object
        .get("line_items")
        .or_else(|| object.get("items"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(item_from_value).collect())
        .unwrap_or_default();

    let mut payload = StructuredProposalPayload {
        client_name: text_field(object, &["client_name", "clientName"]),
        proposal_number: text_field(object, &["proposal_number", "proposalNumber"]),
        vendor_name: text_field(object, &["vendor_name", "vendorName"]),
        line_items: items,
        total_override: object.get("total_override").and_then(decimal_value),
        payment_terms: text_field(object, &["payment_terms", "paymentTerms"]),
        delivery_terms: text_field(object, &["delivery_terms", "deliveryTerms"]),
        client_contact: ClientContact {
            phone: contact.and_then(|contact| text_field(contact, &["phone"])),
            company: contact.and_then(|contact| text_field(contact, &["company"])),
        },
        confidence: object.get("confidence").and_then(Value::as_f64).unwrap_or(0.0) as f32,
        ..StructuredProposalPayload::default()
    };
    payload.recompute_totals();
    payload
}

fn item_from_value(value: &Value) -> Option<LineItem> {
    let object = value.as_object()?;
    let description = text_field(object, &["description", "descricao"])?;
    let quantity = object
        .get("quantity")
        .and_then(decimal_value)
        .filter(|quantity| *quantity > Decimal::ZERO)
        .unwrap_or(Decimal::ONE);
    let unit_price = object
        .get("unit_price")
        .or_else(|| object.get("price"))
        .and_then(decimal_value)
        .filter(|price| *price >= Decimal::ZERO)
        .unwrap_or(Decimal::ZERO);

    let item = LineItem::try_new(description, quantity, unit_price)?;
    Some(match object.get("total").and_then(decimal_value) {
        Some(total) if item.clone().with_total(total).is_consistent() => item.with_total(total),
        _ => item,
    })
}

fn text_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn decimal_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        Value::String(raw) => parse_decimal_br(raw),
        _ => None,
    }
}
