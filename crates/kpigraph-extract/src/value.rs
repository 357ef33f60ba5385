//! Cell value parsing
//!
//! Report tables print numbers in many shapes: "61,753", "(1.2)", "–233",
//! "12.5 %", "€ 3 bn", "4,5^1". The parser turns the cell text into a signed
//! decimal magnitude plus an optional unit, or tells the caller why it could
//! not.

use std::str::FromStr;

use kpigraph_core::{ParsedValue, ValueConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::text::{collapse_whitespace, UnitLexicon};

static FOOTNOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\^\S*").unwrap());

const MINUS_SIGNS: [char; 4] = ['-', '−', '–', '—'];
const CURRENCY_SIGNS: [char; 4] = ['€', '$', '£', '¥'];

/// Outcome of parsing one cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    /// Nothing printed in the cell
    Blank,

    /// An explicit "no value" marker such as a lone dash
    Missing,

    /// A number with its unit, if the cell carried one
    Number(ParsedValue),

    /// Text that is neither a number nor a marker
    Invalid(String),
}

/// Parses cell text according to the configured markers and unit words
#[derive(Debug, Clone)]
pub struct ValueParser {
    config: ValueConfig,
    units: UnitLexicon,
}

impl ValueParser {
    pub fn new(config: &ValueConfig) -> Self {
        Self {
            config: config.clone(),
            units: UnitLexicon::new(&config.unit_keywords),
        }
    }

    /// Parse one cell
    pub fn parse(&self, raw: &str) -> CellValue {
        let text = strip_footnotes(raw);
        if text.is_empty() {
            return CellValue::Blank;
        }

        if self.config.is_missing_marker(&text) {
            return CellValue::Missing;
        }

        let (text, parenthesized) = match text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            Some(inner) => (inner.trim().to_string(), true),
            None => (text, false),
        };

        let Some(first_digit) = text.find(|c: char| c.is_ascii_digit()) else {
            return CellValue::Invalid(format!("'{}' is not numeric", raw.trim()));
        };
        let last_digit = text
            .rfind(|c: char| c.is_ascii_digit())
            .unwrap_or(first_digit);

        let prefix = &text[..first_digit];
        let number = &text[first_digit..=last_digit];
        let suffix = text[last_digit + 1..].trim();

        let (negative, prefix_unit) = match self.split_prefix(prefix) {
            Ok(parts) => parts,
            Err(reason) => return CellValue::Invalid(reason),
        };

        let suffix_unit = if suffix.is_empty() {
            None
        } else if self.units.is_unit_phrase(suffix) {
            Some(collapse_whitespace(suffix))
        } else {
            return CellValue::Invalid(format!("unexpected text '{}' after number", suffix));
        };

        let mut magnitude = match normalize_number(number) {
            Some(normalized) => match Decimal::from_str(&normalized) {
                Ok(value) => value,
                Err(e) => return CellValue::Invalid(format!("'{}': {}", number, e)),
            },
            None => return CellValue::Invalid(format!("'{}' is not a number", number)),
        };

        if negative != parenthesized {
            magnitude = -magnitude;
        }

        let unit = merge_units(prefix_unit, suffix_unit);
        CellValue::Number(ParsedValue::new(magnitude, unit))
    }

    /// Read the sign and currency printed before the first digit
    fn split_prefix(&self, prefix: &str) -> Result<(bool, Option<String>), String> {
        let mut signs = 0;
        let mut negative = false;
        let mut rest = String::new();

        for c in prefix.chars() {
            if MINUS_SIGNS.contains(&c) {
                signs += 1;
                negative = true;
            } else if c == '+' {
                signs += 1;
            } else {
                rest.push(c);
            }
        }

        if signs > 1 {
            return Err(format!("more than one sign in '{}'", prefix.trim()));
        }

        let rest = collapse_whitespace(&rest);
        if rest.is_empty() {
            return Ok((negative, None));
        }
        if rest.chars().all(|c| CURRENCY_SIGNS.contains(&c)) || self.units.is_unit_phrase(&rest) {
            return Ok((negative, Some(rest)));
        }

        Err(format!("unexpected text '{}' before number", rest))
    }
}

/// Drop footnote markers, superscript digits and trailing asterisks
fn strip_footnotes(raw: &str) -> String {
    let without_carets = FOOTNOTE.replace_all(raw, "");
    let cleaned: String = without_carets
        .chars()
        .filter(|c| !matches!(c, '¹' | '²' | '³' | '⁰'..='⁹'))
        .collect();

    cleaned.trim().trim_end_matches('*').trim().to_string()
}

/// Turn printed digits into a plain decimal literal
///
/// With both separators present the rightmost one is the decimal point. A
/// lone comma followed by one or two digits is a decimal comma; any other
/// comma groups thousands. Repeated dots group thousands too.
fn normalize_number(number: &str) -> Option<String> {
    let digits: String = number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '\u{202f}')
        .collect();

    if !digits.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.') {
        return None;
    }

    let commas = digits.matches(',').count();
    let dots = digits.matches('.').count();

    let normalized = match (commas, dots) {
        (0, 0) => digits,
        (_, 0) => {
            let after_comma = digits.rsplit(',').next().map(str::len).unwrap_or(0);
            if commas == 1 && (1..=2).contains(&after_comma) {
                digits.replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
        (0, 1) => digits,
        (0, _) => digits.replace('.', ""),
        _ => {
            let last_comma = digits.rfind(',')?;
            let last_dot = digits.rfind('.')?;
            if last_comma > last_dot {
                if commas > 1 {
                    return None;
                }
                digits.replace('.', "").replace(',', ".")
            } else {
                if dots > 1 {
                    return None;
                }
                digits.replace(',', "")
            }
        }
    };

    Some(normalized)
}

fn merge_units(prefix: Option<String>, suffix: Option<String>) -> Option<String> {
    let suffix = suffix.map(|unit| {
        if unit.eq_ignore_ascii_case("percent") {
            "%".to_string()
        } else {
            unit
        }
    });

    match (prefix, suffix) {
        (Some(p), Some(s)) => Some(format!("{} {}", p, s)),
        (p, s) => p.or(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ValueParser {
        ValueParser::new(&ValueConfig::default())
    }

    fn number(raw: &str) -> (Decimal, Option<String>) {
        match parser().parse(raw) {
            CellValue::Number(value) => (value.magnitude, value.unit),
            other => panic!("expected number for {:?}, got {:?}", raw, other),
        }
    }

    #[test]
    fn plain_and_grouped_numbers() {
        assert_eq!(number("61753").0, Decimal::from(61753));
        assert_eq!(number("61,753").0, Decimal::from(61753));
        assert_eq!(number("1,234,567").0, Decimal::from(1234567));
        assert_eq!(number("61 753").0, Decimal::from(61753));
        assert_eq!(number("1.234.567").0, Decimal::from(1234567));
        assert_eq!(number("1,234.5").0, Decimal::new(12345, 1));
        assert_eq!(number("1.234,5").0, Decimal::new(12345, 1));
    }

    #[test]
    fn decimal_comma() {
        assert_eq!(number("4,5").0, Decimal::new(45, 1));
        assert_eq!(number("12,75").0, Decimal::new(1275, 2));
    }

    #[test]
    fn dash_glyph_sign_is_not_a_marker() {
        assert_eq!(number("–233").0, Decimal::from(-233));
        assert_eq!(number("−233").0, Decimal::from(-233));
        assert_eq!(number("- 233").0, Decimal::from(-233));
        assert_eq!(number("+12").0, Decimal::from(12));
        assert_eq!(parser().parse("–"), CellValue::Missing);
        assert_eq!(parser().parse(" — "), CellValue::Missing);
    }

    #[test]
    fn parentheses_negate() {
        assert_eq!(number("(1,234)").0, Decimal::from(-1234));
        assert_eq!(number("(1.2)").0, Decimal::new(-12, 1));
    }

    #[test]
    fn units_from_cell() {
        assert_eq!(number("12.5 %"), (Decimal::new(125, 1), Some("%".to_string())));
        assert_eq!(number("12.5%"), (Decimal::new(125, 1), Some("%".to_string())));
        assert_eq!(number("€ 3 bn"), (Decimal::from(3), Some("€ bn".to_string())));
        assert_eq!(number("$12"), (Decimal::from(12), Some("$".to_string())));
        assert_eq!(number("4 million"), (Decimal::from(4), Some("million".to_string())));
        assert_eq!(number("7 percent").1, Some("%".to_string()));
    }

    #[test]
    fn footnotes_stripped() {
        assert_eq!(number("4,5^1").0, Decimal::new(45, 1));
        assert_eq!(number("9,310²").0, Decimal::from(9310));
        assert_eq!(number("100*").0, Decimal::from(100));
    }

    #[test]
    fn blank_missing_and_invalid() {
        assert_eq!(parser().parse("   "), CellValue::Blank);
        assert_eq!(parser().parse("n/a"), CellValue::Missing);
        assert!(matches!(parser().parse("n.m."), CellValue::Invalid(_)));
        assert!(matches!(parser().parse("2020-2021"), CellValue::Invalid(_)));
        assert!(matches!(parser().parse("Q3 12"), CellValue::Invalid(_)));
        assert!(matches!(parser().parse("--5"), CellValue::Invalid(_)));
    }
}
