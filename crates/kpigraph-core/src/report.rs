//! Quality report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::config::RateBasis;
use crate::diagnostic::{Diagnostic, Severity};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Aggregate counts for one verifier run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Tables that reached the extractor
    pub tables_ingested: usize,

    /// Tables that contributed no observations or were rejected
    pub invalid_tables: usize,

    /// Data columns dropped because no year could be resolved
    pub unresolved_columns: usize,

    /// Graph nodes examined
    pub nodes_examined: usize,

    /// Nodes passing every applicable rule
    pub valid: usize,

    /// Nodes failing at least one rule
    pub invalid: usize,

    /// Invalid nodes per rule name (a node failing two rules counts under both)
    pub invalid_by_rule: BTreeMap<String, usize>,

    /// Nodes holding a missing-value marker instead of a number
    pub missing_values: usize,

    /// Nodes for which no rule applied
    pub no_rule_applicable: usize,

    /// Conflicts recorded by the graph builder
    pub conflicts: usize,

    /// valid / (valid + invalid) under `rate_basis`; `None` when nothing was rated
    pub consistency_rate: Option<f64>,

    /// Denominator policy used for `consistency_rate`
    pub rate_basis: RateBasis,

    /// Number of error diagnostics
    pub errors: usize,

    /// Number of warning diagnostics
    pub warnings: usize,

    /// Number of info diagnostics
    pub info: usize,
}

/// Quality report (quality-report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Summary statistics
    pub summary: QualitySummary,

    /// All diagnostics, ingestion first, then verification
    pub diagnostics: Vec<Diagnostic>,
}

impl QualityReport {
    /// Create a new empty report
    pub fn new() -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary: QualitySummary::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Add a diagnostic to the report
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.summary.errors += 1,
            Severity::Warn => self.summary.warnings += 1,
            Severity::Info => self.summary.info += 1,
        }

        self.diagnostics.push(diagnostic);
    }

    /// Total number of diagnostics
    pub fn total_diagnostics(&self) -> usize {
        self.diagnostics.len()
    }

    /// Check if the report has any errors
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

impl Default for QualityReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Diagnostic, DiagnosticCode};

    #[test]
    fn empty_report() {
        let report = QualityReport::new();
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert_eq!(report.total_diagnostics(), 0);
        assert_eq!(report.summary.consistency_rate, None);
        assert!(!report.has_errors());
    }

    #[test]
    fn report_counts_severities() {
        let mut report = QualityReport::new();
        report.add_diagnostic(Diagnostic::of(DiagnosticCode::FormatViolation, "Percent out of range"));
        report.add_diagnostic(Diagnostic::of(DiagnosticCode::UnresolvedHeader, "No year"));

        assert_eq!(report.total_diagnostics(), 2);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.info, 1);
        assert!(report.has_errors());
    }

    #[test]
    fn report_serialization() {
        let report = QualityReport::new();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"rate_basis\": \"all_nodes\""));
        assert!(json.contains("\"diagnostics\""));
    }
}
