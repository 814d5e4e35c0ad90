use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

use super::lexicon::fold;
use super::number::parse_decimal_br;
use crate::domain::proposal::{checked_sum, LineItem, ParseWarning};
use crate::domain::provider::RawTable;

/// Header rows are looked for only this far into a table.
pub const HEADER_SEARCH_ROWS: usize = 3;
pub const MIN_ROW_CELLS: usize = 3;

const DESCRIPTION_KEYWORDS: &[&str] = &["DESCRI", "PRODUTO", "SERVICO", "MATERIAL", "ITEM"];
const QUANTITY_KEYWORDS: &[&str] = &["QTD", "QUANT"];
const UNIT_PRICE_KEYWORDS: &[&str] = &["UNIT", "PRECO", "VALOR", "VL"];
const TOTAL_KEYWORDS: &[&str] = &["TOTAL"];
const SUMMARY_PREFIXES: &[&str] = &["TOTAL", "SUBTOTAL", "VALOR TOTAL", "DESCONTO", "FRETE"];

static TEXT_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^\s*(?P<description>.+?)\s+
        (?P<quantity>\d+(?:[.,]\d+)?)\s*
        (?:(?i:UN|UND|UNID|PC|PÇ|PCS|CX|KG|M|M2|L|LT)\.?\s+)?
        (?:R\$\s*)?(?P<price>\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|\d+(?:,\d{1,2})?)
        (?:\s+(?:R\$\s*)?(?P<total>\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|\d+(?:,\d{1,2})?))?
        \s*$",
    )
    .expect("text line item pattern is valid")
});

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LineItemExtraction {
    pub items: Vec<LineItem>,
    pub dropped_rows: usize,
    pub warnings: Vec<ParseWarning>,
}

impl LineItemExtraction {
    fn absorb(&mut self, other: LineItemExtraction) {
        self.items.extend(other.items);
        self.dropped_rows += other.dropped_rows;
        self.warnings.extend(other.warnings);
    }

    fn push_candidate(
        &mut self,
        description: &str,
        quantity: Option<Decimal>,
        unit_price: Option<Decimal>,
        total: Option<Decimal>,
    ) {
        let description = description.trim();
        let quantity = match quantity {
            Some(quantity) if quantity > Decimal::ZERO && !description.is_empty() => quantity,
            _ => {
                self.dropped_rows += 1;
                return;
            }
        };

        let unit_price = match (unit_price, total) {
            (Some(price), _) => Some(price),
            (None, Some(total)) => total.checked_div(quantity).map(|price| price.round_dp(2)),
            (None, None) => Some(Decimal::ZERO),
        };
        // OCR digit runs can exceed what a Decimal holds; such rows are dropped.
        let Some(mut item) =
            unit_price.and_then(|price| LineItem::try_new(description, quantity, price))
        else {
            self.dropped_rows += 1;
            return;
        };
        let running = checked_sum(self.items.iter().map(|item| item.total));
        if running.and_then(|sum| sum.checked_add(total.unwrap_or(item.total))).is_none() {
            self.dropped_rows += 1;
            return;
        }

        if let Some(total) = total {
            item = item.with_total(total);
            if !item.is_consistent() {
                self.warnings.push(ParseWarning::InconsistentLineTotal {
                    description: item.description.clone(),
                });
            }
        }
        self.items.push(item);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ColumnMap {
    description: Option<usize>,
    quantity: Option<usize>,
    unit_price: Option<usize>,
    total: Option<usize>,
}

impl ColumnMap {
    fn from_header(cells: &[String]) -> Option<Self> {
        let mut map = Self::default();
        for (index, cell) in cells.iter().enumerate() {
            let folded = fold(cell);
            if contains_any(&folded, TOTAL_KEYWORDS) && !folded.contains("UNIT") {
                map.total.get_or_insert(index);
            } else if contains_any(&folded, QUANTITY_KEYWORDS) {
                map.quantity.get_or_insert(index);
            } else if contains_any(&folded, UNIT_PRICE_KEYWORDS) {
                map.unit_price.get_or_insert(index);
            } else if contains_any(&folded, DESCRIPTION_KEYWORDS) {
                map.description.get_or_insert(index);
            }
        }

        (map.description.is_some() && map.quantity.is_some()).then_some(map)
    }
}

fn contains_any(folded: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| folded.contains(keyword))
}

fn is_header_line(line: &str) -> bool {
    let folded = fold(line);
    contains_any(&folded, DESCRIPTION_KEYWORDS) && contains_any(&folded, QUANTITY_KEYWORDS)
}

fn is_summary_row(description: &str) -> bool {
    let folded = fold(description.trim());
    SUMMARY_PREFIXES.iter().any(|prefix| folded.starts_with(prefix))
}

fn cell(row: &[String], index: Option<usize>) -> Option<&str> {
    index.and_then(|index| row.get(index)).map(String::as_str)
}

pub fn from_table(table: &RawTable) -> LineItemExtraction {
    let mut extraction = LineItemExtraction::default();

    let header = table
        .rows
        .iter()
        .take(HEADER_SEARCH_ROWS)
        .enumerate()
        .find_map(|(index, row)| ColumnMap::from_header(row).map(|map| (index, map)));
    let Some((header_index, columns)) = header else {
        return extraction;
    };

    for row in table.rows.iter().skip(header_index + 1) {
        if row.len() < MIN_ROW_CELLS {
            continue;
        }
        let description = cell(row, columns.description).unwrap_or_default();
        if is_summary_row(description) {
            continue;
        }

        extraction.push_candidate(
            description,
            cell(row, columns.quantity).and_then(parse_decimal_br),
            cell(row, columns.unit_price).and_then(parse_decimal_br),
            cell(row, columns.total).and_then(parse_decimal_br),
        );
    }

    extraction
}

pub fn from_text(lines: &[&str]) -> LineItemExtraction {
    let mut extraction = LineItemExtraction::default();
    let Some(header_index) = lines.iter().position(|line| is_header_line(line)) else {
        return extraction;
    };

    for line in &lines[header_index + 1..] {
        let Some(captures) = TEXT_ITEM_RE.captures(line) else {
            continue;
        };
        let description = captures.name("description").map_or("", |m| m.as_str());
        if is_summary_row(description) {
            continue;
        }

        extraction.push_candidate(
            description,
            captures.name("quantity").and_then(|m| parse_decimal_br(m.as_str())),
            captures.name("price").and_then(|m| parse_decimal_br(m.as_str())),
            captures.name("total").and_then(|m| parse_decimal_br(m.as_str())),
        );
    }

    extraction
}

/// Tables take precedence; text lines are only read when no table produced items.
pub fn extract(lines: &[&str], tables: &[RawTable]) -> LineItemExtraction {
    let mut extraction = LineItemExtraction::default();
    for table in tables {
        extraction.absorb(from_table(table));
    }

    if extraction.items.is_empty() {
        let dropped_in_tables = extraction.dropped_rows;
        extraction = from_text(lines);
        extraction.dropped_rows += dropped_in_tables;
    }

    extraction
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{extract, from_table, from_text};
    use crate::domain::proposal::ParseWarning;
    use crate::domain::provider::RawTable;

    fn table(rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            rows.iter().map(|row| row.iter().map(|cell| (*cell).to_string()).collect()).collect(),
        )
    }

    #[test]
    fn table_rows_are_mapped_by_header() {
        let extraction = from_table(&table(&[
            &["Proposta 123", "", "", ""],
            &["Descrição", "Qtd", "Valor Unit.", "Total"],
            &["Cadeira", "2", "R$ 100,00", "R$ 200,00"],
            &["Mesa", "1", "1.250,50", "1.250,50"],
            &["Total", "", "", "1.450,50"],
        ]));

        assert_eq!(extraction.items.len(), 2);
        assert_eq!(extraction.items[0].description, "Cadeira");
        assert_eq!(extraction.items[0].total, Decimal::new(20000, 2));
        assert_eq!(extraction.items[1].unit_price, Decimal::new(125050, 2));
        assert_eq!(extraction.dropped_rows, 0);
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn total_is_computed_without_total_column() {
        let extraction = from_table(&table(&[
            &["Produto", "Quantidade", "Preço"],
            &["Parafuso", "10", "0,35"],
        ]));
        assert_eq!(extraction.items[0].total, Decimal::new(350, 2));
    }

    #[test]
    fn rows_without_description_or_quantity_are_dropped() {
        let extraction = from_table(&table(&[
            &["Item", "Qtde", "Unitário", "Total"],
            &["", "2", "10,00", "20,00"],
            &["Caneta", "0", "1,00", "0,00"],
            &["Lapis", "abc", "1,00", "1,00"],
            &["Borracha", "3", "2,00", "6,00"],
            &["nota"],
        ]));
        assert_eq!(extraction.items.len(), 1);
        assert_eq!(extraction.dropped_rows, 3);
    }

    #[test]
    fn inconsistent_totals_raise_a_warning() {
        let extraction = from_table(&table(&[
            &["Descrição", "Qtd", "Unit", "Total"],
            &["Cadeira", "2", "100,00", "250,00"],
        ]));
        assert_eq!(extraction.items[0].total, Decimal::new(25000, 2));
        assert_eq!(
            extraction.warnings,
            vec![ParseWarning::InconsistentLineTotal { description: "Cadeira".to_string() }]
        );
    }

    #[test]
    fn text_lines_follow_header() {
        let lines = vec![
            "JOAO DA SILVA",
            "DESCRIÇÃO QTD VALOR",
            "Cadeira 2 UN 100,00",
            "Mesa de reuniao 1 1.500,00 1.500,00",
            "Observacao sem numeros",
            "TOTAL 1.700,00",
        ];
        let extraction = from_text(&lines);

        assert_eq!(extraction.items.len(), 2);
        assert_eq!(extraction.items[0].description, "Cadeira");
        assert_eq!(extraction.items[0].quantity, Decimal::from(2));
        assert_eq!(extraction.items[0].unit_price, Decimal::new(10000, 2));
        assert_eq!(extraction.items[0].total, Decimal::new(20000, 2));
        assert_eq!(extraction.items[1].description, "Mesa de reuniao");
        assert_eq!(extraction.items[1].total, Decimal::new(150000, 2));
    }

    #[test]
    fn text_is_ignored_when_tables_yield_items() {
        let lines = vec!["DESCRIÇÃO QTD VALOR", "Cadeira 2 UN 100,00"];
        let tables = vec![table(&[&["Descrição", "Qtd", "Unit"], &["Mesa", "1", "300,00"]])];

        let extraction = extract(&lines, &tables);
        assert_eq!(extraction.items.len(), 1);
        assert_eq!(extraction.items[0].description, "Mesa");
    }

    #[test]
    fn rows_too_large_for_a_decimal_are_dropped() {
        let extraction = from_table(&table(&[
            &["Descrição", "Qtd", "Valor Unit"],
            &["Cadeira", "99999999999999999", "99999999999999"],
            &["Mesa", "1", "300,00"],
        ]));
        assert_eq!(extraction.items.len(), 1);
        assert_eq!(extraction.items[0].description, "Mesa");
        assert_eq!(extraction.dropped_rows, 1);

        let derived_price = from_table(&table(&[
            &["Descrição", "Qtd", "Total"],
            &["Cadeira", "0,0000000000000000000000001", "79228162514264337593543950335"],
        ]));
        assert!(derived_price.items.is_empty());
        assert_eq!(derived_price.dropped_rows, 1);
    }

    #[test]
    fn no_header_means_no_items() {
        let extraction = extract(&["Cadeira 2 UN 100,00"], &[]);
        assert!(extraction.items.is_empty());
    }
}
