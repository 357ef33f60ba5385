//! Label text helpers shared by the normalizer and the extractor

use kpigraph_core::HeaderConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static YEAR_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4}\b").unwrap());
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Collapse runs of whitespace into single spaces and trim the ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case- and accent-insensitive form of a label
///
/// "Škoda  Auto" and "skoda auto" fold to the same text.
pub fn fold(text: &str) -> String {
    let stripped: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    collapse_whitespace(&stripped.to_lowercase())
}

/// Split a label into its text and a trailing parenthesized part
///
/// `"Deliveries (thousand units)"` yields `("Deliveries", Some("thousand units"))`.
pub fn strip_parenthetical(label: &str) -> (String, Option<String>) {
    let (Some(open), Some(close)) = (label.find('('), label.rfind(')')) else {
        return (collapse_whitespace(label), None);
    };
    if close < open {
        return (collapse_whitespace(label), None);
    }

    let inner = collapse_whitespace(&label[open + 1..close]);
    let outer = collapse_whitespace(&format!("{} {}", &label[..open], &label[close + 1..]));

    (outer, if inner.is_empty() { None } else { Some(inner) })
}

/// Plausible 4-digit years in a text, in order of appearance
///
/// Only standalone digit runs count: "VW2019_T4e9153" yields 2019, "20221" nothing.
pub fn year_tokens<'a>(text: &'a str, headers: &'a HeaderConfig) -> impl Iterator<Item = i32> + 'a {
    DIGIT_RUN
        .find_iter(text)
        .filter(|m| m.as_str().len() == 4)
        .filter_map(|m| m.as_str().parse::<i32>().ok())
        .filter(move |year| headers.is_plausible_year(*year))
}

/// Remove every 4-digit run from a label
pub fn strip_years(label: &str) -> String {
    collapse_whitespace(&YEAR_RUN.replace_all(label, " "))
}

/// Recognizes unit words and symbols
#[derive(Debug, Clone)]
pub struct UnitLexicon {
    keywords: Vec<String>,
}

impl UnitLexicon {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| fold(k)).filter(|k| !k.is_empty()).collect(),
        }
    }

    fn is_keyword(&self, token: &str) -> bool {
        self.keywords.iter().any(|k| k == token)
    }

    /// Whether any token of the text is a unit keyword
    pub fn mentions_unit(&self, text: &str) -> bool {
        tokens(&fold(text)).iter().any(|t| self.is_keyword(t))
    }

    /// Whether the text consists of unit keywords only (and is non-empty)
    pub fn is_unit_phrase(&self, text: &str) -> bool {
        let folded = fold(text);
        let tokens = tokens(&folded);
        !tokens.is_empty() && tokens.iter().all(|t| self.is_keyword(t))
    }
}

/// Split folded text into words and standalone symbols
///
/// Currency and percent signs become tokens of their own so that "€million"
/// and "€ million" read the same.
fn tokens(folded: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();

    for c in folded.chars() {
        if c.is_alphanumeric() {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            out.push(std::mem::take(&mut word));
        }
        if matches!(c, '€' | '$' | '£' | '¥' | '%') {
            out.push(c.to_string());
        }
    }
    if !word.is_empty() {
        out.push(word);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_tokens_need_standalone_plausible_runs() {
        let headers = HeaderConfig::default();
        let years: Vec<i32> = year_tokens("VW2019_T4e9153", &headers).collect();
        assert_eq!(years, vec![2019]);

        let years: Vec<i32> = year_tokens("2021 / 2022 (20221, 1492)", &headers).collect();
        assert_eq!(years, vec![2021, 2022]);
    }

    #[test]
    fn fold_strips_case_and_accents() {
        assert_eq!(fold("  ŠKODA   Auto "), "skoda auto");
        assert_eq!(fold("Umsatzerlöse"), "umsatzerlose");
    }

    #[test]
    fn parenthetical_split() {
        assert_eq!(
            strip_parenthetical("Deliveries (thousand units)"),
            ("Deliveries".to_string(), Some("thousand units".to_string()))
        );
        assert_eq!(strip_parenthetical("Audi"), ("Audi".to_string(), None));
        assert_eq!(strip_parenthetical("Odd ) label ("), ("Odd ) label (".to_string(), None));
    }

    #[test]
    fn years_removed() {
        assert_eq!(strip_years("Sales 2022 vs 2021"), "Sales vs");
        assert_eq!(strip_years("20225"), "20225");
    }

    #[test]
    fn unit_phrases() {
        let lexicon = UnitLexicon::new(&["million".into(), "€".into(), "thousand".into(), "vehicles".into()]);
        assert!(lexicon.is_unit_phrase("€ million"));
        assert!(lexicon.is_unit_phrase("€million"));
        assert!(lexicon.is_unit_phrase("Thousand vehicles"));
        assert!(!lexicon.is_unit_phrase("Audi"));
        assert!(!lexicon.is_unit_phrase(""));
        assert!(lexicon.mentions_unit("Sales revenue € million"));
    }
}
