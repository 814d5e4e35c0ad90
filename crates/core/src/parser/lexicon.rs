use crate::config::HeuristicsConfig;

/// Terms that mark a line as company letterhead, contact data or table header
/// rather than a person or client name.
pub const DEFAULT_BOILERPLATE_KEYWORDS: &[&str] = &[
    "LTDA",
    "CORP",
    "EIRELI",
    "S/A",
    "S.A.",
    "INC",
    "ME",
    "EPP",
    "CNPJ",
    "CPF",
    "IE",
    "TELEFONE",
    "FONE",
    "TEL",
    "CELULAR",
    "E-MAIL",
    "EMAIL",
    "RUA",
    "AVENIDA",
    "AV.",
    "CEP",
    "BAIRRO",
    "ENDERECO",
    "DESCRICAO",
    "QTD",
    "QTDE",
    "VALOR",
    "TOTAL",
    "UNITARIO",
    "ITEM",
    "CODIGO",
    "WWW",
    "@",
    "HTTP",
];

/// Headings that look like names but never are.
pub const DEFAULT_EXCLUDED_PHRASES: &[&str] = &[
    "PROPOSTA COMERCIAL",
    "ORCAMENTO",
    "CONDICOES DE PAGAMENTO",
    "PRAZO DE ENTREGA",
    "DADOS DO CLIENTE",
    "VALIDADE DA PROPOSTA",
    "FORMA DE PAGAMENTO",
    "PEDIDO DE VENDA",
    "NOTA FISCAL",
];

pub const CLIENT_NAME_MIN_CHARS: usize = 6;
pub const CLIENT_NAME_MAX_CHARS: usize = 50;

const NAME_PUNCTUATION: &[char] = &['.', '\'', '-', '&'];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeuristicLexicon {
    boilerplate_keywords: Vec<String>,
    excluded_phrases: Vec<String>,
}

impl Default for HeuristicLexicon {
    fn default() -> Self {
        Self::from_lists(DEFAULT_BOILERPLATE_KEYWORDS, DEFAULT_EXCLUDED_PHRASES)
    }
}

impl HeuristicLexicon {
    pub fn from_lists<K, P>(boilerplate_keywords: &[K], excluded_phrases: &[P]) -> Self
    where
        K: AsRef<str>,
        P: AsRef<str>,
    {
        Self {
            boilerplate_keywords: boilerplate_keywords
                .iter()
                .map(|keyword| fold(keyword.as_ref().trim()))
                .filter(|keyword| !keyword.is_empty())
                .collect(),
            excluded_phrases: excluded_phrases
                .iter()
                .map(|phrase| fold(phrase.as_ref().trim()))
                .filter(|phrase| !phrase.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &HeuristicsConfig) -> Self {
        Self::from_lists(&config.boilerplate_keywords, &config.excluded_phrases)
    }

    pub fn boilerplate_keywords(&self) -> &[String] {
        &self.boilerplate_keywords
    }

    pub fn excluded_phrases(&self) -> &[String] {
        &self.excluded_phrases
    }

    /// Alphabetic keywords match whole tokens; keywords carrying punctuation
    /// (`S/A`, `E-MAIL`, `@`) match anywhere in the line.
    pub fn is_boilerplate_line(&self, line: &str) -> bool {
        let folded = fold(line);
        let tokens: Vec<&str> = folded
            .split_whitespace()
            .map(|token| token.trim_matches(|ch: char| !ch.is_alphanumeric()))
            .filter(|token| !token.is_empty())
            .collect();

        self.boilerplate_keywords.iter().any(|keyword| {
            if keyword.chars().all(char::is_alphanumeric) {
                tokens.iter().any(|token| token == keyword)
            } else {
                folded.contains(keyword.as_str())
            }
        })
    }

    pub fn is_excluded_phrase(&self, line: &str) -> bool {
        let folded = fold(line);
        self.excluded_phrases.iter().any(|phrase| folded.contains(phrase.as_str()))
    }

    /// Shared gate for every client-name candidate, used by both the parser and
    /// the persistence validation step.
    pub fn is_valid_client_name(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        let length = candidate.chars().count();
        if !(CLIENT_NAME_MIN_CHARS..=CLIENT_NAME_MAX_CHARS).contains(&length) {
            return false;
        }

        let allowed = candidate.chars().all(|ch| {
            ch.is_alphabetic() || ch.is_whitespace() || NAME_PUNCTUATION.contains(&ch)
        });
        if !allowed {
            return false;
        }

        if candidate.split_whitespace().count() < 2 {
            return false;
        }

        !self.is_excluded_phrase(candidate)
    }
}

/// Uppercases and strips Portuguese diacritics so `Descrição` and `DESCRICAO`
/// compare equal.
pub fn fold(value: &str) -> String {
    value
        .chars()
        .flat_map(char::to_uppercase)
        .map(|ch| match ch {
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'Ç' => 'C',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}
