use std::sync::LazyLock;

use regex::Regex;

use super::lexicon::{fold, HeuristicLexicon};
use super::NamedStrategy;

static LABELLED_CLIENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:cliente|para|to|raz[ãa]o\s+social)\s*:\s*(.+?)\s*$")
        .expect("labelled client pattern is valid")
});

static BEFORE_CNPJ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.*?)\bCNPJ\b").expect("cnpj-adjacent pattern is valid")
});

static CAPITALIZED_WORDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\p{Lu}\p{Ll}+(?:[ \t]+\p{Lu}\p{Ll}+){1,2})\b")
        .expect("capitalized words pattern is valid")
});

pub const CLIENT_NAME_STRATEGIES: &[NamedStrategy] = &[
    NamedStrategy { name: "positional", run: positional },
    NamedStrategy { name: "labelled", run: labelled },
    NamedStrategy { name: "cnpj_adjacent", run: cnpj_adjacent },
    NamedStrategy { name: "capitalized_words", run: capitalized_words },
];

fn clean(candidate: &str) -> &str {
    candidate.trim().trim_matches(|ch: char| matches!(ch, '-' | ',' | ':' | '|' | ';')).trim()
}

fn positional(lines: &[&str], lexicon: &HeuristicLexicon) -> Option<String> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .filter(|line| !lexicon.is_boilerplate_line(line))
        .find(|line| lexicon.is_valid_client_name(line))
        .map(str::to_string)
}

fn labelled(lines: &[&str], lexicon: &HeuristicLexicon) -> Option<String> {
    lines.iter().find_map(|line| {
        let captures = LABELLED_CLIENT_RE.captures(line)?;
        let candidate = clean(captures.get(1)?.as_str());
        lexicon.is_valid_client_name(candidate).then(|| candidate.to_string())
    })
}

fn cnpj_adjacent(lines: &[&str], lexicon: &HeuristicLexicon) -> Option<String> {
    lines.iter().enumerate().find_map(|(index, line)| {
        if !fold(line).contains("CNPJ") {
            return None;
        }

        let same_line = BEFORE_CNPJ_RE
            .captures(line)
            .and_then(|captures| captures.get(1))
            .map(|capture| clean(capture.as_str()))
            .filter(|candidate| lexicon.is_valid_client_name(candidate));
        if let Some(candidate) = same_line {
            return Some(candidate.to_string());
        }

        let previous = clean(lines.get(index.checked_sub(1)?)?);
        lexicon.is_valid_client_name(previous).then(|| previous.to_string())
    })
}

fn capitalized_words(lines: &[&str], lexicon: &HeuristicLexicon) -> Option<String> {
    lines.iter().filter(|line| !lexicon.is_boilerplate_line(line)).find_map(|line| {
        CAPITALIZED_WORDS_RE
            .captures_iter(line)
            .filter_map(|captures| captures.get(1))
            .map(|capture| capture.as_str())
            .find(|candidate| lexicon.is_valid_client_name(candidate))
            .map(str::to_string)
    })
}

pub fn extract(lines: &[&str], lexicon: &HeuristicLexicon) -> Option<(&'static str, String)> {
    super::run_strategies(CLIENT_NAME_STRATEGIES, lines, lexicon)
}
