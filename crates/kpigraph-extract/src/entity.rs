//! Entity key normalization

use kpigraph_core::{EntityConfig, RawTable, NODE_ID_SEPARATOR};

use crate::text::{fold, strip_parenthetical};

const DASHES: [&str; 3] = [" – ", " — ", " - "];

/// Canonicalizes entity labels into keys
///
/// Labels differing only in case, accents, spacing, parenthesized remarks or
/// a trailing corporate suffix map to the same key.
#[derive(Debug, Clone)]
pub struct EntityNormalizer {
    suffixes: Vec<String>,
}

impl EntityNormalizer {
    pub fn new(config: &EntityConfig) -> Self {
        Self {
            suffixes: config
                .strip_suffixes
                .iter()
                .map(|suffix| fold(suffix))
                .filter(|suffix| !suffix.is_empty())
                .collect(),
        }
    }

    /// Normalize a label into an entity key; empty when nothing is left
    ///
    /// `|` separates node identity parts, so it never survives into a key.
    pub fn normalize(&self, label: &str) -> String {
        let (label, _) = strip_parenthetical(&label.replace(NODE_ID_SEPARATOR, " "));
        let folded = fold(&label);
        let mut words: Vec<&str> = folded
            .split(' ')
            .map(trim_punctuation)
            .filter(|word| !word.is_empty())
            .collect();

        while words.len() > 1 {
            let last = words[words.len() - 1];
            if self.suffixes.iter().any(|suffix| suffix == last) {
                words.pop();
            } else {
                break;
            }
        }

        words.join(" ")
    }

    /// Entity label of a single-entity table
    ///
    /// The title up to its first dash ("AUDI – KEY FIGURES" gives "AUDI"),
    /// else the section name, else the document id.
    pub fn context_label(table: &RawTable) -> String {
        let title = table.title.trim();
        if !title.is_empty() {
            let head = DASHES
                .iter()
                .filter_map(|dash| title.find(dash))
                .min()
                .map(|idx| title[..idx].trim())
                .unwrap_or(title);
            if !head.is_empty() {
                return head.to_string();
            }
        }

        if !table.section_name.trim().is_empty() {
            return table.section_name.trim().to_string();
        }

        table.doc_id.trim().to_string()
    }
}

fn trim_punctuation(word: &str) -> &str {
    word.trim_matches(|c: char| matches!(c, ',' | '.' | ';' | ':' | '*'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> EntityNormalizer {
        EntityNormalizer::new(&EntityConfig::default())
    }

    #[test]
    fn surface_variants_share_a_key() {
        let n = normalizer();
        assert_eq!(n.normalize("Audi"), "audi");
        assert_eq!(n.normalize("  AUDI  AG "), "audi");
        assert_eq!(n.normalize("Audi AG,"), "audi");
        assert_eq!(n.normalize("Volkswagen Group"), "volkswagen");
        assert_eq!(n.normalize("Škoda Auto (Czech Republic)"), "skoda auto");
    }

    #[test]
    fn suffix_alone_is_kept() {
        assert_eq!(normalizer().normalize("Group"), "group");
        assert_eq!(normalizer().normalize("Porsche SE AG"), "porsche");
    }

    #[test]
    fn separator_is_dropped() {
        let n = normalizer();
        assert_eq!(n.normalize("Audi|2021"), "audi 2021");
        assert_eq!(n.normalize("Audi | Seat"), "audi seat");
        assert_eq!(n.normalize("|"), "");
    }

    #[test]
    fn empty_label() {
        assert_eq!(normalizer().normalize("  "), "");
    }

    #[test]
    fn context_label_prefers_title_head() {
        let mut table = RawTable::new("T1");
        table.doc_id = "VW2023".into();
        table.section_name = "Brands".into();
        table.title = "VOLKSWAGEN COMMERCIAL VEHICLES – KEY FIGURES".into();
        assert_eq!(EntityNormalizer::context_label(&table), "VOLKSWAGEN COMMERCIAL VEHICLES");

        table.title = String::new();
        assert_eq!(EntityNormalizer::context_label(&table), "Brands");

        table.section_name = String::new();
        assert_eq!(EntityNormalizer::context_label(&table), "VW2023");
    }
}
