//! Rule-based extraction of proposal fields from provider text and tables.
//!
//! Every field is found by an ordered list of named strategies; the first
//! strategy that yields a value wins and no scoring happens across strategies.

pub mod client_name;
pub mod confidence;
pub mod lexicon;
pub mod line_items;
pub mod number;
pub mod proposal_number;
pub mod terms;

use crate::domain::proposal::{ParseWarning, StructuredProposalPayload};
use crate::domain::provider::{NormalizedDocument, RawTable};

pub use lexicon::HeuristicLexicon;

pub type StrategyFn = fn(&[&str], &HeuristicLexicon) -> Option<String>;

#[derive(Clone, Copy)]
pub struct NamedStrategy {
    pub name: &'static str,
    pub run: StrategyFn,
}

impl std::fmt::Debug for NamedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedStrategy").field("name", &self.name).finish()
    }
}

pub fn run_strategies(
    strategies: &[NamedStrategy],
    lines: &[&str],
    lexicon: &HeuristicLexicon,
) -> Option<(&'static str, String)> {
    strategies
        .iter()
        .find_map(|strategy| (strategy.run)(lines, lexicon).map(|value| (strategy.name, value)))
}

#[derive(Clone, Debug, Default)]
pub struct HeuristicDataParser {
    lexicon: HeuristicLexicon,
}

impl HeuristicDataParser {
    pub fn new(lexicon: HeuristicLexicon) -> Self {
        Self { lexicon }
    }

    pub fn lexicon(&self) -> &HeuristicLexicon {
        &self.lexicon
    }

    pub fn client_name_strategy_order() -> Vec<&'static str> {
        client_name::CLIENT_NAME_STRATEGIES.iter().map(|strategy| strategy.name).collect()
    }

    pub fn proposal_number_strategy_order() -> Vec<&'static str> {
        proposal_number::PROPOSAL_NUMBER_STRATEGIES.iter().map(|strategy| strategy.name).collect()
    }

    pub fn is_valid_client_name(&self, candidate: &str) -> bool {
        self.lexicon.is_valid_client_name(candidate)
    }

    pub fn parse_document(&self, document: &NormalizedDocument) -> StructuredProposalPayload {
        self.parse(&document.text, &document.tables)
    }

    pub fn parse(&self, raw_text: &str, raw_tables: &[RawTable]) -> StructuredProposalPayload {
        let lines: Vec<&str> =
            raw_text.lines().map(str::trim).filter(|line| !line.is_empty()).collect();

        let items = line_items::extract(&lines, raw_tables);
        let terms = terms::extract(&lines);

        let mut payload = StructuredProposalPayload {
            client_name: client_name::extract(&lines, &self.lexicon).map(|(_, name)| name),
            proposal_number: proposal_number::extract(&lines, &self.lexicon),
            vendor_name: terms.vendor_name,
            line_items: items.items,
            payment_terms: terms.payment_terms,
            delivery_terms: terms.delivery_terms,
            client_contact: terms.client_contact,
            ..StructuredProposalPayload::default()
        };
        payload.recompute_totals();

        let scored = confidence::score(&payload);
        payload.confidence = scored.score;
        payload.warnings = scored.warnings;
        if items.dropped_rows > 0 {
            payload.warnings.push(ParseWarning::DroppedRows { count: items.dropped_rows });
        }
        payload.warnings.extend(items.warnings);

        payload
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{HeuristicDataParser, HeuristicLexicon};
    use crate::domain::proposal::ParseWarning;
    use crate::domain::provider::RawTable;

    const SCENARIO: &str =
        "ACME CORP\nCNPJ 12.345.678\nJOAO DA SILVA\nDESCRIÇÃO QTD VALOR\nCadeira 2 UN 100,00";

    #[test]
    fn letterhead_scenario_yields_client_and_single_item() {
        let payload = HeuristicDataParser::default().parse(SCENARIO, &[]);

        assert_eq!(payload.client_name.as_deref(), Some("JOAO DA SILVA"));
        assert_eq!(payload.line_items.len(), 1);
        let item = &payload.line_items[0];
        assert_eq!(item.description, "Cadeira");
        assert_eq!(item.quantity, Decimal::from(2));
        assert_eq!(item.unit_price, Decimal::new(10000, 2));
        assert_eq!(item.total, Decimal::new(20000, 2));
        assert_eq!(payload.subtotal, item.total);
        assert_eq!(payload.total, item.total);
        assert!(payload.confidence >= 0.6);
        assert!(payload.has_warning(&ParseWarning::MissingProposalNumber));
    }

    #[test]
    fn totals_always_equal_item_sum() {
        let text = "Cliente: Maria Santos\nTotal geral: 9.999,00";
        let table = RawTable::new(vec![
            vec!["Descrição".into(), "Qtd".into(), "Unit".into(), "Total".into()],
            vec!["Cadeira".into(), "2".into(), "100,00".into(), "200,00".into()],
            vec!["Mesa".into(), "1".into(), "450,00".into(), "450,00".into()],
        ]);

        let payload = HeuristicDataParser::default().parse(text, &[table]);
        let sum: Decimal = payload.line_items.iter().map(|item| item.total).sum();
        assert_eq!(sum, Decimal::new(65000, 2));
        assert_eq!(payload.subtotal, sum);
        assert_eq!(payload.total, sum);
    }

    #[test]
    fn dropped_rows_surface_as_warning() {
        let table = RawTable::new(vec![
            vec!["Item".into(), "Qtd".into(), "Unit".into()],
            vec!["".into(), "1".into(), "5,00".into()],
            vec!["Caneta".into(), "3".into(), "2,00".into()],
        ]);
        let payload = HeuristicDataParser::default().parse("", &[table]);
        assert!(payload.has_warning(&ParseWarning::DroppedRows { count: 1 }));
        assert!(payload.has_warning(&ParseWarning::MissingClientName));
    }

    #[test]
    fn oversized_amounts_do_not_abort_parsing() {
        let table = RawTable::new(vec![
            vec!["Descrição".into(), "Qtd".into(), "Valor Unit".into()],
            vec!["Cadeira".into(), "99999999999999999".into(), "99999999999999".into()],
        ]);
        let payload = HeuristicDataParser::default().parse("", &[table]);
        assert!(payload.line_items.is_empty());
        assert!(payload.has_warning(&ParseWarning::DroppedRows { count: 1 }));
        assert!(payload.has_warning(&ParseWarning::NoLineItems));
        assert_eq!(payload.total, Decimal::ZERO);
    }

    #[test]
    fn strategy_orders_are_exposed() {
        assert_eq!(
            HeuristicDataParser::client_name_strategy_order(),
            vec!["positional", "labelled", "cnpj_adjacent", "capitalized_words"]
        );
        assert_eq!(
            HeuristicDataParser::proposal_number_strategy_order(),
            vec!["labelled_number", "letter_digit_code"]
        );
    }

    #[test]
    fn custom_lexicon_changes_client_choice() {
        let parser = HeuristicDataParser::new(HeuristicLexicon::from_lists(
            &["SILVA", "CNPJ"],
            &["PROPOSTA COMERCIAL"],
        ));
        let payload = parser.parse("JOAO DA SILVA\nCNPJ 1\nACME CORP", &[]);
        assert_eq!(payload.client_name.as_deref(), Some("ACME CORP"));
    }
}
