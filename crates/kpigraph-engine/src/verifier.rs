//! Semantic verification of a finished KPI graph
//!
//! The verifier is read-only. It applies per-metric value rules, checks
//! every node's year against the year its evidence implies, surfaces the
//! conflicts recorded by the builder and reports merged entity labels.
//!
//! Counting policy: a node is `invalid` when it fails at least one
//! applicable rule and `valid` otherwise, so nodes without any applicable
//! rule count as valid. The consistency rate is valid / (valid + invalid);
//! with [`RateBasis::RuleCovered`] nodes without an applicable rule are
//! taken out of both numerator and denominator.

use std::collections::BTreeMap;

use kpigraph_core::{
    Config, ConfigError, Diagnostic, DiagnosticCode, HeaderConfig, NodeId, QualityReport, RateBasis,
    SeverityThreshold, ValueRule, VerifierConfig,
};
use kpigraph_extract::text::year_tokens;
use kpigraph_graph::{KpiGraph, KpiNode};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pipeline::Ingestion;

/// Rule name used for temporal mismatches in `invalid_by_rule`
pub const TEMPORAL_RULE: &str = "temporal";

/// A value rule ready to evaluate
#[derive(Debug, Clone)]
enum CompiledRule {
    Percent,
    Count,
    NonNegative,
    Range { min: Option<f64>, max: Option<f64> },
    Pattern(Regex),
}

impl CompiledRule {
    fn compile(metric: &str, rule: &ValueRule) -> Result<Self, ConfigError> {
        Ok(match rule {
            ValueRule::Percent => Self::Percent,
            ValueRule::Count => Self::Count,
            ValueRule::NonNegative => Self::NonNegative,
            ValueRule::Range { min, max } => Self::Range { min: *min, max: *max },
            ValueRule::Pattern { pattern } => Self::Pattern(Regex::new(pattern).map_err(|e| {
                ConfigError::InvalidValue(format!("rules.{}: bad pattern: {}", metric, e))
            })?),
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Percent => "percent",
            Self::Count => "count",
            Self::NonNegative => "non_negative",
            Self::Range { .. } => "range",
            Self::Pattern(_) => "pattern",
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Percent => "magnitude between -100 and 100".to_string(),
            Self::Count => "non-negative whole number".to_string(),
            Self::NonNegative => "magnitude >= 0".to_string(),
            Self::Range { min, max } => match (min, max) {
                (Some(min), Some(max)) => format!("magnitude between {} and {}", min, max),
                (Some(min), None) => format!("magnitude >= {}", min),
                (None, Some(max)) => format!("magnitude <= {}", max),
                (None, None) => "any magnitude".to_string(),
            },
            Self::Pattern(regex) => format!("text matching /{}/", regex.as_str()),
        }
    }

    fn accepts(&self, raw_value: &str, magnitude: Decimal) -> bool {
        match self {
            Self::Percent => magnitude >= Decimal::from(-100) && magnitude <= Decimal::from(100),
            Self::Count => magnitude >= Decimal::ZERO && magnitude.fract().is_zero(),
            Self::NonNegative => magnitude >= Decimal::ZERO,
            Self::Range { min, max } => match magnitude.to_f64() {
                Some(value) => min.map_or(true, |min| value >= min) && max.map_or(true, |max| value <= max),
                None => false,
            },
            Self::Pattern(regex) => regex.is_match(raw_value),
        }
    }
}

/// Outcome for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Passed every applicable rule
    Valid,

    /// Failed at least one applicable rule
    Invalid,

    /// No rule applied
    NoRule,
}

/// Per-node verification result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVerdict {
    pub node_id: NodeId,
    pub status: NodeStatus,

    /// Names of the rules the node failed
    pub failed_rules: Vec<String>,

    /// The node holds a missing-value marker
    pub missing_value: bool,
}

/// Consistency checks over a KPI graph
#[derive(Debug, Clone)]
pub struct SemanticVerifier {
    rules: BTreeMap<String, CompiledRule>,
    verifier: VerifierConfig,
    headers: HeaderConfig,
    severity: SeverityThreshold,
}

impl SemanticVerifier {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let rules: BTreeMap<String, CompiledRule> = config
            .rules
            .iter()
            .map(|(metric, rule)| Ok((metric.clone(), CompiledRule::compile(metric, rule)?)))
            .collect::<Result<_, ConfigError>>()?;

        Ok(Self {
            rules,
            verifier: config.verifier.clone(),
            headers: config.headers.clone(),
            severity: config.severity.clone(),
        })
    }

    /// Verify a graph on its own
    pub fn verify(&self, graph: &KpiGraph) -> QualityReport {
        self.build_report(graph, None)
    }

    /// Verify the graph of an ingestion run, merging its diagnostics
    pub fn verify_ingestion(&self, ingestion: &Ingestion) -> QualityReport {
        self.build_report(&ingestion.graph, Some(ingestion))
    }

    /// Evaluate every node, in identity order
    pub fn verdicts(&self, graph: &KpiGraph) -> Vec<NodeVerdict> {
        graph.nodes().map(|node| self.check_node(node).0).collect()
    }

    fn build_report(&self, graph: &KpiGraph, ingestion: Option<&Ingestion>) -> QualityReport {
        let mut report = QualityReport::new();
        let mut diagnostics = Vec::new();

        if let Some(ingestion) = ingestion {
            report.summary.tables_ingested = ingestion.tables_ingested;
            report.summary.invalid_tables = ingestion.invalid_tables;
            report.summary.unresolved_columns = ingestion.unresolved_columns;
            diagnostics.extend(ingestion.diagnostics.iter().cloned());
        }

        let mut covered_valid = 0;
        for node in graph.nodes() {
            let (verdict, node_diagnostics) = self.check_node(node);
            diagnostics.extend(node_diagnostics);

            report.summary.nodes_examined += 1;
            if verdict.missing_value {
                report.summary.missing_values += 1;
            }
            match verdict.status {
                NodeStatus::Valid => {
                    report.summary.valid += 1;
                    covered_valid += 1;
                }
                NodeStatus::NoRule => {
                    report.summary.valid += 1;
                    report.summary.no_rule_applicable += 1;
                }
                NodeStatus::Invalid => {
                    report.summary.invalid += 1;
                    for rule in verdict.failed_rules {
                        *report.summary.invalid_by_rule.entry(rule).or_insert(0) += 1;
                    }
                }
            }
        }

        for conflict in graph.conflicts() {
            let rejected = &conflict.rejected;
            diagnostics.push(
                Diagnostic::of(
                    DiagnosticCode::NodeConflict,
                    format!(
                        "{}: kept '{}', rejected '{}' from table {}",
                        conflict.existing, conflict.existing_raw_value, rejected.raw_value, rejected.evidence.table_id
                    ),
                )
                .with_location(rejected.evidence.location())
                .with_comparison(&conflict.existing_raw_value, &rejected.raw_value)
                .with_node(conflict.existing.as_str()),
            );
        }
        report.summary.conflicts = graph.conflicts().len();

        for (entity_key, labels) in graph.entity_labels() {
            if labels.len() > 1 {
                let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                diagnostics.push(Diagnostic::of(
                    DiagnosticCode::EntityAliasMerged,
                    format!("Entity '{}' merges labels: {}", entity_key, labels.join(", ")),
                ));
            }
        }

        report.summary.rate_basis = self.verifier.rate_basis;
        report.summary.consistency_rate = match self.verifier.rate_basis {
            RateBasis::AllNodes => rate(report.summary.valid, report.summary.invalid),
            RateBasis::RuleCovered => rate(covered_valid, report.summary.invalid),
        };

        for mut diagnostic in diagnostics {
            diagnostic.severity = self.severity.get_severity(diagnostic.code, diagnostic.severity);
            report.add_diagnostic(diagnostic);
        }

        tracing::info!(
            nodes = report.summary.nodes_examined,
            valid = report.summary.valid,
            invalid = report.summary.invalid,
            conflicts = report.summary.conflicts,
            "verification complete"
        );

        report
    }

    fn check_node(&self, node: &KpiNode) -> (NodeVerdict, Vec<Diagnostic>) {
        let observation = &node.observation;
        let mut applicable = 0;
        let mut failed_rules = Vec::new();
        let mut diagnostics = Vec::new();

        if let (Some(rule), Some(value)) = (self.rules.get(node.metric_name()), &observation.parsed_value) {
            applicable += 1;
            if !rule.accepts(&observation.raw_value, value.magnitude) {
                failed_rules.push(rule.name().to_string());
                diagnostics.push(
                    Diagnostic::of(
                        DiagnosticCode::FormatViolation,
                        format!("{} = '{}' violates {} rule", node.id, observation.raw_value, rule.name()),
                    )
                    .with_location(observation.evidence.location())
                    .with_comparison(rule.describe(), &observation.raw_value)
                    .with_node(node.id.as_str()),
                );
            }
        }

        if let Some(evidence_year) = self.evidence_year(node) {
            applicable += 1;
            let earliest = i64::from(evidence_year) - i64::from(self.verifier.comparative_years);
            let latest = i64::from(evidence_year) + i64::from(self.verifier.temporal_tolerance_years);

            if !(earliest..=latest).contains(&i64::from(node.year())) {
                tracing::debug!(node_id = %node.id, evidence_year, "year outside evidence window");
                if self.verifier.temporal_mismatch_invalid {
                    failed_rules.push(TEMPORAL_RULE.to_string());
                }
                diagnostics.push(
                    Diagnostic::of(
                        DiagnosticCode::TemporalMismatch,
                        format!(
                            "{} reports year {} but its table implies {}",
                            node.id,
                            node.year(),
                            evidence_year
                        ),
                    )
                    .with_location(observation.evidence.location())
                    .with_comparison(format!("{}..={}", earliest, latest), node.year().to_string())
                    .with_node(node.id.as_str()),
                );
            }
        }

        let status = if !failed_rules.is_empty() {
            NodeStatus::Invalid
        } else if applicable == 0 {
            NodeStatus::NoRule
        } else {
            NodeStatus::Valid
        };

        let verdict = NodeVerdict {
            node_id: node.id.clone(),
            status,
            failed_rules,
            missing_value: observation.is_missing(),
        };

        (verdict, diagnostics)
    }

    /// Year implied by a node's evidence: the table year, else one embedded in the table id
    ///
    /// Years outside the configured plausible range are ignored.
    fn evidence_year(&self, node: &KpiNode) -> Option<i32> {
        let evidence = &node.observation.evidence;
        if let Some(year) = evidence.table_year.filter(|year| self.headers.is_plausible_year(*year)) {
            return Some(year);
        }
        if !self.verifier.derive_year_from_table_id {
            return None;
        }

        year_tokens(&evidence.table_id, &self.headers).next()
    }
}

fn rate(valid: usize, invalid: usize) -> Option<f64> {
    let total = valid + invalid;
    if total == 0 {
        None
    } else {
        Some(valid as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpigraph_core::{EdgeCadence, Evidence, Observation, ParsedValue, Severity};
    use kpigraph_graph::GraphBuilder;
    use std::str::FromStr;

    fn observation(metric: &str, entity: &str, year: i32, raw: &str, table_id: &str, table_year: Option<i32>) -> Observation {
        Observation {
            metric_name: metric.into(),
            entity_key: entity.into(),
            entity_label: entity.into(),
            raw_value: raw.into(),
            parsed_value: Decimal::from_str(raw).ok().map(|v| ParsedValue::new(v, None)),
            year,
            evidence: Evidence {
                table_id: table_id.into(),
                table_year,
                ..Evidence::default()
            },
        }
    }

    fn graph(observations: Vec<Observation>) -> KpiGraph {
        let mut builder = GraphBuilder::new(EdgeCadence::Deferred);
        builder.add(observations);
        builder.finish()
    }

    fn verifier(config: &Config) -> SemanticVerifier {
        SemanticVerifier::new(config).unwrap()
    }

    #[test]
    fn percent_rule_flags_out_of_range() {
        let g = graph(vec![
            observation("return_on_sales", "audi", 2022, "13.3", "T", None),
            observation("return_on_sales", "seat", 2022, "130", "T", None),
        ]);
        let report = verifier(&Config::default()).verify(&g);

        assert_eq!(report.summary.nodes_examined, 2);
        assert_eq!(report.summary.valid, 1);
        assert_eq!(report.summary.invalid, 1);
        assert_eq!(report.summary.invalid_by_rule.get("percent"), Some(&1));
        assert_eq!(report.summary.consistency_rate, Some(0.5));
        assert_eq!(report.diagnostics[0].code, DiagnosticCode::FormatViolation);
        assert_eq!(report.diagnostics[0].node_id.as_deref(), Some("return_on_sales|seat|2022"));
    }

    #[test]
    fn count_rule_needs_whole_non_negative_numbers() {
        let mut config = Config::default();
        config.rules.insert("deliveries".into(), ValueRule::Count);
        let v = verifier(&config);

        let verdicts = v.verdicts(&graph(vec![
            observation("deliveries", "a", 2022, "12", "T", None),
            observation("deliveries", "b", 2022, "1.5", "T", None),
            observation("deliveries", "c", 2022, "-3", "T", None),
        ]));
        let statuses: Vec<_> = verdicts.iter().map(|v| v.status).collect();
        assert_eq!(statuses, vec![NodeStatus::Valid, NodeStatus::Invalid, NodeStatus::Invalid]);
    }

    #[test]
    fn missing_rule_is_not_a_failure() {
        let g = graph(vec![observation("sales_revenue", "audi", 2022, "-5", "T", None)]);
        let report = verifier(&Config::default()).verify(&g);

        assert_eq!(report.summary.valid, 1);
        assert_eq!(report.summary.no_rule_applicable, 1);
        assert_eq!(report.summary.consistency_rate, Some(1.0));
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn rule_covered_basis_excludes_uncovered_nodes() {
        let mut config = Config::default();
        config.verifier.rate_basis = RateBasis::RuleCovered;

        let g = graph(vec![observation("sales_revenue", "audi", 2022, "1", "T", None)]);
        let report = verifier(&config).verify(&g);
        assert_eq!(report.summary.consistency_rate, None);

        let g = graph(vec![
            observation("sales_revenue", "audi", 2022, "1", "T", None),
            observation("deliveries", "audi", 2022, "-1", "T", None),
            observation("deliveries", "seat", 2022, "1", "T", None),
        ]);
        let report = verifier(&config).verify(&g);
        assert_eq!(report.summary.consistency_rate, Some(0.5));
        assert_eq!(report.summary.rate_basis, RateBasis::RuleCovered);
    }

    #[test]
    fn missing_values_are_exempt_from_format_rules() {
        let g = graph(vec![observation("return_on_sales", "audi", 2022, "–", "T", None)]);
        let report = verifier(&Config::default()).verify(&g);

        assert_eq!(report.summary.missing_values, 1);
        assert_eq!(report.summary.invalid, 0);
        assert_eq!(report.summary.no_rule_applicable, 1);
    }

    #[test]
    fn comparative_years_are_not_mismatches() {
        let g = graph(vec![
            observation("sales_revenue", "audi", 2022, "61753", "VW2022_T1", Some(2022)),
            observation("sales_revenue", "audi", 2021, "55914", "VW2022_T1", Some(2022)),
        ]);
        let report = verifier(&Config::default()).verify(&g);

        assert_eq!(report.summary.valid, 2);
        assert_eq!(report.summary.no_rule_applicable, 0);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn future_year_is_a_temporal_mismatch() {
        let g = graph(vec![observation("sales_revenue", "audi", 2023, "1", "VW2022_T1", Some(2022))]);
        let report = verifier(&Config::default()).verify(&g);

        assert_eq!(report.summary.invalid, 1);
        assert_eq!(report.summary.invalid_by_rule.get(TEMPORAL_RULE), Some(&1));
        assert_eq!(report.diagnostics[0].code, DiagnosticCode::TemporalMismatch);
        assert_eq!(report.diagnostics[0].expected.as_deref(), Some("2017..=2022"));
    }

    #[test]
    fn table_id_year_is_used_when_table_year_is_absent() {
        let g = graph(vec![observation("sales_revenue", "audi", 2010, "1", "VW2019_T4e9153", None)]);
        let report = verifier(&Config::default()).verify(&g);
        assert_eq!(report.summary.invalid, 1);

        let mut config = Config::default();
        config.verifier.derive_year_from_table_id = false;
        let report = verifier(&config).verify(&g);
        assert_eq!(report.summary.invalid, 0);
        assert_eq!(report.summary.no_rule_applicable, 1);
    }

    #[test]
    fn implausible_table_year_falls_back_to_table_id() {
        let g = graph(vec![observation("sales_revenue", "audi", 2022, "1", "VW2022_T1", Some(i32::MIN))]);
        let report = verifier(&Config::default()).verify(&g);
        assert_eq!(report.summary.valid, 1);
        assert!(report.diagnostics.is_empty());

        let g = graph(vec![observation("sales_revenue", "audi", 2022, "1", "T", Some(i32::MAX))]);
        let report = verifier(&Config::default()).verify(&g);
        assert_eq!(report.summary.no_rule_applicable, 1);
    }

    #[test]
    fn extreme_window_settings_do_not_overflow() {
        let mut config = Config::default();
        config.verifier.comparative_years = u32::MAX;
        config.verifier.temporal_tolerance_years = u32::MAX;

        let g = graph(vec![observation("sales_revenue", "audi", 1995, "1", "VW2022_T1", Some(2022))]);
        let report = verifier(&config).verify(&g);
        assert_eq!(report.summary.valid, 1);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn temporal_mismatch_can_be_report_only() {
        let mut config = Config::default();
        config.verifier.temporal_mismatch_invalid = false;

        let g = graph(vec![observation("sales_revenue", "audi", 2023, "1", "T", Some(2022))]);
        let report = verifier(&config).verify(&g);

        assert_eq!(report.summary.invalid, 0);
        assert_eq!(report.summary.valid, 1);
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn conflicts_are_surfaced_verbatim() {
        let mut builder = GraphBuilder::new(EdgeCadence::PerBatch);
        builder.add(vec![observation("sales_revenue", "audi", 2022, "61753", "VW2022_T1", None)]);
        builder.add(vec![observation("sales_revenue", "audi", 2022, "61000", "VW2022_T9", None)]);
        let report = verifier(&Config::default()).verify(&builder.finish());

        assert_eq!(report.summary.conflicts, 1);
        let conflict = report
            .diagnostics
            .iter()
            .find(|d| d.code == DiagnosticCode::NodeConflict)
            .unwrap();
        assert_eq!(conflict.expected.as_deref(), Some("61753"));
        assert_eq!(conflict.actual.as_deref(), Some("61000"));
        assert_eq!(conflict.node_id.as_deref(), Some("sales_revenue|audi|2022"));
        assert_eq!(conflict.location.as_ref().map(|l| l.table_id.as_str()), Some("VW2022_T9"));
    }

    #[test]
    fn merged_entity_labels_are_reported() {
        let mut first = observation("deliveries", "audi", 2021, "1", "T", None);
        first.entity_label = "Audi".into();
        let mut second = observation("deliveries", "audi", 2022, "1", "T", None);
        second.entity_label = "AUDI AG".into();

        let report = verifier(&Config::default()).verify(&graph(vec![first, second]));
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].code, DiagnosticCode::EntityAliasMerged);
        assert_eq!(report.diagnostics[0].severity, Severity::Info);
    }

    #[test]
    fn severity_overrides_apply() {
        let mut config = Config::default();
        config.severity.set_override(DiagnosticCode::FormatViolation, Severity::Warn);

        let g = graph(vec![observation("return_on_sales", "seat", 2022, "130", "T", None)]);
        let report = verifier(&config).verify(&g);

        assert_eq!(report.diagnostics[0].severity, Severity::Warn);
        assert_eq!(report.summary.errors, 0);
        assert_eq!(report.summary.warnings, 1);
    }

    #[test]
    fn range_and_pattern_rules() {
        let mut config = Config::default();
        config.rules.insert("operating_result".into(), ValueRule::Range { min: Some(-1000.0), max: None });
        config.rules.insert("sales_revenue".into(), ValueRule::Pattern { pattern: r"^\d+$".into() });
        let v = verifier(&config);

        let verdicts = v.verdicts(&graph(vec![
            observation("operating_result", "a", 2022, "-233", "T", None),
            observation("operating_result", "b", 2022, "-2000", "T", None),
            observation("sales_revenue", "a", 2022, "61753", "T", None),
            observation("sales_revenue", "b", 2022, "61753.5", "T", None),
        ]));
        let statuses: Vec<_> = verdicts.iter().map(|v| v.status).collect();
        assert_eq!(
            statuses,
            vec![NodeStatus::Valid, NodeStatus::Invalid, NodeStatus::Valid, NodeStatus::Invalid]
        );
    }

    #[test]
    fn verifier_does_not_mutate_graph() {
        let g = graph(vec![observation("return_on_sales", "seat", 2022, "130", "T", Some(2030))]);
        let before = g.clone();
        verifier(&Config::default()).verify(&g);
        assert_eq!(g, before);
    }
}
