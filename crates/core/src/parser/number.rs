use std::str::FromStr;

use rust_decimal::Decimal;

/// Parses a Brazilian-formatted amount. Comma is the decimal separator and dots
/// group thousands (`"R$ 1.234,56"` is 1234.56). Without a comma, a single dot
/// followed by exactly three digits is read as a thousands separator.
pub fn parse_decimal_br(raw: &str) -> Option<Decimal> {
    let negative = raw.trim_start().starts_with('-');
    let kept: String =
        raw.chars().filter(|ch| ch.is_ascii_digit() || *ch == ',' || *ch == '.').collect();
    if !kept.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }

    let normalized = if kept.contains(',') {
        kept.replace('.', "").replacen(',', ".", 1).replace(',', "")
    } else {
        let dots = kept.matches('.').count();
        let after_last_dot = kept.rsplit('.').next().map(str::len).unwrap_or_default();
        if dots > 1 || (dots == 1 && after_last_dot == 3) {
            kept.replace('.', "")
        } else {
            kept
        }
    };

    let trimmed = normalized.trim_matches('.');
    let value = Decimal::from_str(trimmed).ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::parse_decimal_br;

    #[test]
    fn comma_is_decimal_separator() {
        assert_eq!(parse_decimal_br("1.234,56"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_decimal_br("R$ 100,00"), Some(Decimal::new(10000, 2)));
        assert_eq!(parse_decimal_br("0,5"), Some(Decimal::new(5, 1)));
    }

    #[test]
    fn dots_without_comma() {
        assert_eq!(parse_decimal_br("1.500"), Some(Decimal::from(1500)));
        assert_eq!(parse_decimal_br("1.234.567"), Some(Decimal::from(1_234_567)));
        assert_eq!(parse_decimal_br("12.5"), Some(Decimal::new(125, 1)));
    }

    #[test]
    fn noise_and_signs() {
        assert_eq!(parse_decimal_br("2 UN"), Some(Decimal::from(2)));
        assert_eq!(parse_decimal_br("-3"), Some(Decimal::from(-3)));
        assert_eq!(parse_decimal_br("n/a"), None);
        assert_eq!(parse_decimal_br(""), None);
    }
}
