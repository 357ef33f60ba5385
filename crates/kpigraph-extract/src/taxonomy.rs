//! Metric taxonomy lookup
//!
//! The taxonomy is an ordered list of canonical metrics, each with a set of
//! alias substrings. A label is classified by the longest alias it contains;
//! when two metrics match with aliases of the same length the earlier entry
//! wins and the match is reported as ambiguous.

use kpigraph_core::TaxonomyConfig;

use crate::text::fold;

#[derive(Debug, Clone)]
struct Entry {
    metric: String,
    aliases: Vec<String>,
}

/// Result of classifying one label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricMatch {
    /// Canonical metric name
    pub metric: String,

    /// The alias that matched, folded
    pub alias: String,

    /// Other metrics that matched with an alias of the same length
    pub tied_with: Vec<String>,
}

impl MetricMatch {
    pub fn is_ambiguous(&self) -> bool {
        !self.tied_with.is_empty()
    }
}

/// Ordered alias table built from configuration
#[derive(Debug, Clone)]
pub struct Taxonomy {
    entries: Vec<Entry>,
}

impl Taxonomy {
    pub fn new(config: &TaxonomyConfig) -> Self {
        let entries = config
            .metrics
            .iter()
            .map(|metric| Entry {
                metric: metric.name.clone(),
                aliases: metric
                    .aliases
                    .iter()
                    .map(|alias| fold(alias))
                    .filter(|alias| !alias.is_empty())
                    .collect(),
            })
            .collect();

        Self { entries }
    }

    /// Classify a label, or `None` when no alias occurs in it
    pub fn classify(&self, label: &str) -> Option<MetricMatch> {
        let folded = fold(label);
        if folded.is_empty() {
            return None;
        }

        let mut best: Option<MetricMatch> = None;
        let mut best_len = 0;

        for entry in &self.entries {
            let Some(alias) = entry
                .aliases
                .iter()
                .filter(|alias| folded.contains(alias.as_str()))
                .max_by_key(|alias| alias.chars().count())
            else {
                continue;
            };
            let len = alias.chars().count();

            match &mut best {
                Some(current) if len == best_len => {
                    if current.metric != entry.metric && !current.tied_with.contains(&entry.metric) {
                        current.tied_with.push(entry.metric.clone());
                    }
                }
                Some(_) if len < best_len => {}
                _ => {
                    best_len = len;
                    best = Some(MetricMatch {
                        metric: entry.metric.clone(),
                        alias: alias.clone(),
                        tied_with: Vec::new(),
                    });
                }
            }
        }

        best
    }

    /// Canonical metric names in taxonomy order
    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.metric.as_str())
    }
}
