use std::sync::LazyLock;

use regex::Regex;

use super::lexicon::HeuristicLexicon;
use super::NamedStrategy;

/// Lines scanned before falling back to the whole document.
pub const HEADER_SCAN_LINES: usize = 10;

static LABELLED_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:proposta|or[çc]amento|cota[çc][ãa]o|pedido)[ \t]*(?:comercial[ \t]*)?(?:n[º°o]?\.?|n[uú]mero)?[ \t]*[:#-]?[ \t]*([A-Z0-9][A-Z0-9./-]{2,24})",
    )
    .expect("labelled proposal number pattern is valid")
});

static LETTER_DIGIT_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z]{1,4}-?\d{4,10}(?:[-/]\d{1,4})?)\b")
        .expect("letter-digit code pattern is valid")
});

pub const PROPOSAL_NUMBER_STRATEGIES: &[NamedStrategy] = &[
    NamedStrategy { name: "labelled_number", run: labelled_number },
    NamedStrategy { name: "letter_digit_code", run: letter_digit_code },
];

fn labelled_number(lines: &[&str], _lexicon: &HeuristicLexicon) -> Option<String> {
    lines.iter().find_map(|line| {
        LABELLED_NUMBER_RE
            .captures_iter(line)
            .filter_map(|captures| captures.get(1))
            .map(|capture| capture.as_str().trim_end_matches(['.', '-', '/']))
            .find(|candidate| candidate.chars().any(|ch| ch.is_ascii_digit()))
            .map(str::to_string)
    })
}

fn letter_digit_code(lines: &[&str], _lexicon: &HeuristicLexicon) -> Option<String> {
    lines.iter().find_map(|line| {
        LETTER_DIGIT_CODE_RE.captures(line).and_then(|captures| captures.get(1)).map(|capture| {
            capture.as_str().to_string()
        })
    })
}

/// Header lines first, then the full document; first strategy hit wins.
pub fn extract(lines: &[&str], lexicon: &HeuristicLexicon) -> Option<String> {
    let header = &lines[..lines.len().min(HEADER_SCAN_LINES)];
    super::run_strategies(PROPOSAL_NUMBER_STRATEGIES, header, lexicon)
        .or_else(|| super::run_strategies(PROPOSAL_NUMBER_STRATEGIES, lines, lexicon))
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::super::lexicon::HeuristicLexicon;
    use super::{extract, PROPOSAL_NUMBER_STRATEGIES};

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn strategy_order_is_stable() {
        let names: Vec<&str> =
            PROPOSAL_NUMBER_STRATEGIES.iter().map(|strategy| strategy.name).collect();
        assert_eq!(names, vec!["labelled_number", "letter_digit_code"]);
    }

    #[test]
    fn labelled_number_requires_a_digit() {
        let lexicon = HeuristicLexicon::default();
        let text = "PROPOSTA COMERCIAL\nOrçamento Nº 2024-0153\nCliente: Maria Santos";
        assert_eq!(extract(&lines(text), &lexicon).as_deref(), Some("2024-0153"));

        let no_digits = "Proposta comercial especial\nJOAO DA SILVA";
        assert_eq!(extract(&lines(no_digits), &lexicon), None);
    }

    #[test]
    fn code_pattern_is_used_when_no_label_present() {
        let lexicon = HeuristicLexicon::default();
        let text = "ACME CORP\nRef PV-123456/2\nJOAO DA SILVA";
        assert_eq!(extract(&lines(text), &lexicon).as_deref(), Some("PV-123456/2"));
    }

    #[test]
    fn full_text_is_scanned_after_header() {
        let lexicon = HeuristicLexicon::default();
        let mut text = String::new();
        for index in 0..12 {
            text.push_str(&format!("linha {index}\n"));
        }
        text.push_str("Pedido: 998877\n");
        assert_eq!(extract(&lines(&text), &lexicon).as_deref(), Some("998877"));
    }

    #[test]
    fn absence_is_not_an_error() {
        let lexicon = HeuristicLexicon::default();
        let text = "ACME CORP\nCNPJ 12.345.678\nJOAO DA SILVA";
        assert_eq!(extract(&lines(text), &lexicon), None);
    }
}
