use bigdecimal::BigDecimal;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

// First numeric token in the node text; labels around it ("Vl. Unit.:",
// "R$") are ignored by construction.
static NUMERIC_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)*").expect("static regex"));

/// Parse a monetary or quantity string from either upstream source.
///
/// The structured document uses plain decimals ("20.00"); the rendered portal
/// prints Brazilian formatting ("1.234,56") with label text around the value.
pub fn parse_amount(raw: &str) -> Option<BigDecimal> {
    let token = NUMERIC_TOKEN.find(raw)?.as_str();

    let normalized = if token.contains(',') {
        // thousands dot + decimal comma
        token.replace('.', "").replace(',', ".")
    } else {
        token.to_string()
    };

    BigDecimal::from_str(&normalized).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn parses_plain_decimal() {
        assert_eq!(parse_amount("20.00").unwrap(), dec("20.00"));
    }

    #[test]
    fn parses_brazilian_format() {
        assert_eq!(parse_amount("1.234,56").unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("R$ 7,90").unwrap(), dec("7.90"));
    }

    #[test]
    fn ignores_label_text_around_the_value() {
        assert_eq!(parse_amount("Vl. Unit.:\u{a0}10,00").unwrap(), dec("10.00"));
        assert_eq!(parse_amount("Qtde.:2").unwrap(), dec("2"));
        assert_eq!(parse_amount("Valor a pagar R$: 45,10").unwrap(), dec("45.10"));
    }

    #[test]
    fn rejects_text_without_digits() {
        assert!(parse_amount("Qtd. total de itens").is_none());
        assert!(parse_amount("").is_none());
    }
}
