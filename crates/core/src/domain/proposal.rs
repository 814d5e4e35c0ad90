use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::client::ClientId;
use crate::domain::provider::ProviderCapability;

pub const PLACEHOLDER_ITEM_DESCRIPTION: &str = "Item não identificado - revisar manualmente";

/// Allowed difference between a document's line total and quantity x unit price.
pub fn line_total_tolerance() -> Decimal {
    Decimal::new(5, 2)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
}

impl LineItem {
    /// Builds an item from known-small values; the total saturates instead of overflowing.
    pub fn new(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
            total: quantity.saturating_mul(unit_price).round_dp(2),
        }
    }

    /// Builds an item from extracted values, or `None` when quantity x price overflows.
    pub fn try_new(
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Option<Self> {
        let total = quantity.checked_mul(unit_price)?.round_dp(2);
        Some(Self { description: description.into(), quantity, unit_price, total })
    }

    pub fn with_total(mut self, total: Decimal) -> Self {
        self.total = total;
        self
    }

    pub fn is_consistent(&self) -> bool {
        self.quantity
            .checked_mul(self.unit_price)
            .and_then(|expected| expected.checked_sub(self.total))
            .is_some_and(|difference| difference.abs() <= line_total_tolerance())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContact {
    pub phone: Option<String>,
    pub company: Option<String>,
}

/// Soft parse signals. They lower confidence and never abort the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ParseWarning {
    MissingClientName,
    MissingProposalNumber,
    MissingPaymentTerms,
    NoLineItems,
    DroppedRows { count: usize },
    InconsistentLineTotal { description: String },
    ProviderTimeout,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredProposalPayload {
    pub client_name: Option<String>,
    pub proposal_number: Option<String>,
    pub vendor_name: Option<String>,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub total: Decimal,
    #[serde(default)]
    pub total_override: Option<Decimal>,
    pub payment_terms: Option<String>,
    pub delivery_terms: Option<String>,
    #[serde(default)]
    pub client_contact: ClientContact,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub warnings: Vec<ParseWarning>,
}

impl StructuredProposalPayload {
    /// Minimal payload returned when the provider chain could not finish in time.
    pub fn placeholder() -> Self {
        let mut payload = Self {
            line_items: vec![LineItem::new(
                PLACEHOLDER_ITEM_DESCRIPTION,
                Decimal::ONE,
                Decimal::ZERO,
            )],
            warnings: vec![ParseWarning::ProviderTimeout],
            ..Self::default()
        };
        payload.recompute_totals();
        payload
    }

    /// Sum of item totals, saturating at `Decimal::MAX`.
    pub fn items_sum(&self) -> Decimal {
        self.line_items.iter().fold(Decimal::ZERO, |sum, item| sum.saturating_add(item.total))
    }

    /// Sum of item totals, or `None` on overflow.
    pub fn checked_items_sum(&self) -> Option<Decimal> {
        checked_sum(self.line_items.iter().map(|item| item.total))
    }

    pub fn recompute_totals(&mut self) {
        self.subtotal = self.items_sum();
        self.total = self.total_override.unwrap_or(self.subtotal);
    }

    pub fn override_total(&mut self, total: Decimal) {
        self.total_override = Some(total);
        self.recompute_totals();
    }

    pub fn has_warning(&self, warning: &ParseWarning) -> bool {
        self.warnings.contains(warning)
    }
}

pub fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, |sum, value| sum.checked_add(value))
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub String);

impl ProposalId {
    pub fn generate() -> Self {
        Self(format!("PRO-{}", uuid::Uuid::new_v4()))
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable draft number: `<prefix>-<YYYYMMDD>-<6 hex>`.
pub fn generate_proposal_number(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    format!("{prefix}-{}-{suffix:06X}", now.format("%Y%m%d"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftProposal {
    pub id: ProposalId,
    pub proposal_number: String,
    pub source_proposal_number: Option<String>,
    pub client_id: ClientId,
    pub actor_id: String,
    pub product_group: String,
    pub status: ProposalStatus,
    pub total: Decimal,
    pub valid_until: DateTime<Utc>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalItemRow {
    pub id: String,
    pub proposal_id: ProposalId,
    pub position: u32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
}

/// Immutable record of what a parse produced, kept for reprocessing and debugging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawExtractionSnapshot {
    pub id: String,
    pub correlation_id: String,
    pub file_name: String,
    pub file_fingerprint: String,
    pub provider: Option<ProviderCapability>,
    pub payload_json: String,
    pub extracted_total: Decimal,
    pub client_name: Option<String>,
    pub confidence: f32,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}
