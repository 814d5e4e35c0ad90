use rust_decimal::Decimal;

use crate::domain::proposal::{ParseWarning, StructuredProposalPayload};

pub const CLIENT_NAME_WEIGHT: f32 = 0.35;
pub const LINE_ITEMS_WEIGHT: f32 = 0.35;
pub const PROPOSAL_NUMBER_WEIGHT: f32 = 0.15;
pub const PAYMENT_TERMS_WEIGHT: f32 = 0.05;
pub const POSITIVE_TOTAL_WEIGHT: f32 = 0.10;

#[derive(Clone, Debug, PartialEq)]
pub struct ConfidenceScore {
    pub score: f32,
    pub warnings: Vec<ParseWarning>,
}

pub fn score(payload: &StructuredProposalPayload) -> ConfidenceScore {
    let mut score = 0.0_f32;
    let mut warnings = Vec::new();

    if payload.client_name.is_some() {
        score += CLIENT_NAME_WEIGHT;
    } else {
        warnings.push(ParseWarning::MissingClientName);
    }

    if payload.line_items.is_empty() {
        warnings.push(ParseWarning::NoLineItems);
    } else {
        score += LINE_ITEMS_WEIGHT;
    }

    if payload.proposal_number.is_some() {
        score += PROPOSAL_NUMBER_WEIGHT;
    } else {
        warnings.push(ParseWarning::MissingProposalNumber);
    }

    if payload.payment_terms.is_some() {
        score += PAYMENT_TERMS_WEIGHT;
    } else {
        warnings.push(ParseWarning::MissingPaymentTerms);
    }

    if payload.total > Decimal::ZERO {
        score += POSITIVE_TOTAL_WEIGHT;
    }

    ConfidenceScore { score: (score * 100.0).round() / 100.0, warnings }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::score;
    use crate::domain::proposal::{LineItem, ParseWarning, StructuredProposalPayload};

    #[test]
    fn complete_payload_scores_one() {
        let mut payload = StructuredProposalPayload {
            client_name: Some("JOAO DA SILVA".to_string()),
            proposal_number: Some("2024-0153".to_string()),
            payment_terms: Some("30 dias".to_string()),
            line_items: vec![LineItem::new("Cadeira", Decimal::from(2), Decimal::from(100))],
            ..StructuredProposalPayload::default()
        };
        payload.recompute_totals();

        let result = score(&payload);
        assert!((result.score - 1.0).abs() < f32::EPSILON);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn empty_payload_scores_zero_with_warnings() {
        let result = score(&StructuredProposalPayload::default());
        assert_eq!(result.score, 0.0);
        assert_eq!(
            result.warnings,
            vec![
                ParseWarning::MissingClientName,
                ParseWarning::NoLineItems,
                ParseWarning::MissingProposalNumber,
                ParseWarning::MissingPaymentTerms,
            ]
        );
    }

    #[test]
    fn client_and_items_clear_default_threshold() {
        let mut payload = StructuredProposalPayload {
            client_name: Some("JOAO DA SILVA".to_string()),
            line_items: vec![LineItem::new("Cadeira", Decimal::from(2), Decimal::from(100))],
            ..StructuredProposalPayload::default()
        };
        payload.recompute_totals();

        let result = score(&payload);
        assert!((result.score - 0.80).abs() < 0.001);
        assert!(result.score >= 0.6);
    }
}
