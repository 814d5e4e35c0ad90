use std::sync::LazyLock;

use regex::Regex;

use crate::domain::proposal::ClientContact;

static PAYMENT_TERMS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:condi[çc][õo]es\s+de\s+pagamento|forma\s+de\s+pagamento|pagamento)\s*:\s*(.+?)\s*$",
    )
    .expect("payment terms pattern is valid")
});

static DELIVERY_TERMS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:prazo\s+de\s+entrega|entrega)\s*:\s*(.+?)\s*$")
        .expect("delivery terms pattern is valid")
});

static VENDOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:vendedor|representante|consultor)(?:\s*\(a\))?\s*:\s*(.+?)\s*$")
        .expect("vendor pattern is valid")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:telefone|fone|tel|celular|whatsapp)\.?\s*:?\s*(\(?\d{2}\)?\s*9?\d{4}-?\d{4})")
        .expect("phone pattern is valid")
});

static COMPANY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:empresa|raz[ãa]o\s+social)\s*:\s*(.+?)\s*$")
        .expect("company pattern is valid")
});

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Terms {
    pub payment_terms: Option<String>,
    pub delivery_terms: Option<String>,
    pub vendor_name: Option<String>,
    pub client_contact: ClientContact,
}

fn first_capture(pattern: &Regex, lines: &[&str]) -> Option<String> {
    lines.iter().find_map(|line| {
        pattern
            .captures(line)
            .and_then(|captures| captures.get(1))
            .map(|capture| capture.as_str().trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn extract(lines: &[&str]) -> Terms {
    Terms {
        payment_terms: first_capture(&PAYMENT_TERMS_RE, lines),
        delivery_terms: first_capture(&DELIVERY_TERMS_RE, lines),
        vendor_name: first_capture(&VENDOR_RE, lines),
        client_contact: ClientContact {
            phone: first_capture(&PHONE_RE, lines),
            company: first_capture(&COMPANY_RE, lines),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::extract;

    #[test]
    fn labelled_terms_are_extracted() {
        let lines = vec![
            "Vendedor: Paulo Lima",
            "Telefone: (11) 98765-4321",
            "Empresa: Padaria Pao Quente",
            "Condições de pagamento: 30/60 dias",
            "Prazo de entrega: 15 dias úteis",
        ];
        let terms = extract(&lines);

        assert_eq!(terms.vendor_name.as_deref(), Some("Paulo Lima"));
        assert_eq!(terms.client_contact.phone.as_deref(), Some("(11) 98765-4321"));
        assert_eq!(terms.client_contact.company.as_deref(), Some("Padaria Pao Quente"));
        assert_eq!(terms.payment_terms.as_deref(), Some("30/60 dias"));
        assert_eq!(terms.delivery_terms.as_deref(), Some("15 dias úteis"));
    }

    #[test]
    fn missing_labels_leave_fields_empty() {
        let terms = extract(&["JOAO DA SILVA", "Cadeira 2 UN 100,00"]);
        assert_eq!(terms.payment_terms, None);
        assert_eq!(terms.delivery_terms, None);
        assert_eq!(terms.vendor_name, None);
        assert_eq!(terms.client_contact.phone, None);
    }
}
