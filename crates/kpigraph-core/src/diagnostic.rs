//! Diagnostic codes and issue reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Ingestion (1xxx)
    /// A data column whose header carries no recognizable year
    UnresolvedHeader,

    /// A row whose label matched no taxonomy metric
    UnmatchedRow,

    /// A cell that is neither a number nor a missing-value marker
    ValueParseFailure,

    /// A table that produced no resolvable rows or columns
    InvalidTable,

    /// A table rejected outright because it has no stub labels at all
    MissingStubColumn,

    /// A row label matched several metrics with equally long aliases
    AmbiguousMetric,

    // Graph (2xxx)
    /// Two observations mapped to the same node identity with different raw values
    NodeConflict,

    // Verification (3xxx)
    /// A node value violates the configured rule of its metric
    FormatViolation,

    /// A node year disagrees with the year derivable from its evidence
    TemporalMismatch,

    /// Several surface labels were merged into one entity key
    EntityAliasMerged,

    // Candidate records (4xxx)
    /// Candidate row/column index outside the source table
    CandidateOutOfBounds,

    /// Candidate row or column name disagrees with the source table
    CandidateLabelMismatch,

    /// Candidate value disagrees with the source cell
    CandidateValueMismatch,

    /// Candidate column index was shifted by one to match the source cell
    CandidateAutoCorrected,

    /// Candidate refers to a table that was not supplied
    CandidateTableNotFound,

    /// Candidate year disagrees with its source column or is implausible
    CandidateYearMismatch,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnresolvedHeader => "UNRESOLVED_HEADER",
            Self::UnmatchedRow => "UNMATCHED_ROW",
            Self::ValueParseFailure => "VALUE_PARSE_FAILURE",
            Self::InvalidTable => "INVALID_TABLE",
            Self::MissingStubColumn => "MISSING_STUB_COLUMN",
            Self::AmbiguousMetric => "AMBIGUOUS_METRIC",
            Self::NodeConflict => "NODE_CONFLICT",
            Self::FormatViolation => "FORMAT_VIOLATION",
            Self::TemporalMismatch => "TEMPORAL_MISMATCH",
            Self::EntityAliasMerged => "ENTITY_ALIAS_MERGED",
            Self::CandidateOutOfBounds => "CANDIDATE_OUT_OF_BOUNDS",
            Self::CandidateLabelMismatch => "CANDIDATE_LABEL_MISMATCH",
            Self::CandidateValueMismatch => "CANDIDATE_VALUE_MISMATCH",
            Self::CandidateAutoCorrected => "CANDIDATE_AUTO_CORRECTED",
            Self::CandidateTableNotFound => "CANDIDATE_TABLE_NOT_FOUND",
            Self::CandidateYearMismatch => "CANDIDATE_YEAR_MISMATCH",
        }
    }

    /// Default severity when no override is configured
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::UnresolvedHeader
            | Self::UnmatchedRow
            | Self::EntityAliasMerged
            | Self::CandidateAutoCorrected => Severity::Info,
            Self::ValueParseFailure
            | Self::InvalidTable
            | Self::AmbiguousMetric
            | Self::NodeConflict
            | Self::TemporalMismatch
            | Self::CandidateLabelMismatch
            | Self::CandidateTableNotFound
            | Self::CandidateYearMismatch => Severity::Warn,
            Self::MissingStubColumn
            | Self::FormatViolation
            | Self::CandidateOutOfBounds
            | Self::CandidateValueMismatch => Severity::Error,
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - the affected data point cannot be trusted
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Position of an issue inside the source documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Source document identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,

    /// Table identifier
    pub table_id: String,

    /// Page number in the source document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Data row index (0-indexed, header rows excluded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,

    /// Column index (0 is the stub column)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl Location {
    /// Create a location pointing at a whole table
    pub fn table(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            ..Self::default()
        }
    }

    /// Attach the owning document and page
    pub fn in_document(mut self, doc_id: impl Into<String>, page: Option<u32>) -> Self {
        self.doc_id = Some(doc_id.into());
        self.page = page;
        self
    }

    /// Narrow to a data row
    pub fn at_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    /// Narrow to a column
    pub fn at_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }

    /// Narrow to a single cell
    pub fn at_cell(self, row: usize, column: usize) -> Self {
        self.at_row(row).at_column(column)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table_id)?;
        if let Some(page) = self.page {
            write!(f, " p.{}", page)?;
        }
        match (self.row, self.column) {
            (Some(row), Some(col)) => write!(f, " [{}, {}]", row, col),
            (Some(row), None) => write!(f, " row {}", row),
            (None, Some(col)) => write!(f, " col {}", col),
            (None, None) => Ok(()),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Expected value (for comparison diagnostics)
    pub expected: Option<String>,

    /// Actual value (for comparison diagnostics)
    pub actual: Option<String>,

    /// Graph node the issue refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            expected: None,
            actual: None,
            node_id: None,
        }
    }

    /// Create a diagnostic at the code's default severity
    pub fn of(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, code.default_severity(), message)
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set expected/actual values
    pub fn with_comparison(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    /// Set the graph node
    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        // Ensure codes are stable strings
        assert_eq!(DiagnosticCode::UnresolvedHeader.as_str(), "UNRESOLVED_HEADER");
        assert_eq!(DiagnosticCode::NodeConflict.as_str(), "NODE_CONFLICT");
        assert_eq!(DiagnosticCode::TemporalMismatch.as_str(), "TEMPORAL_MISMATCH");
    }

    #[test]
    fn serde_names_match_as_str() {
        let json = serde_json::to_string(&DiagnosticCode::CandidateAutoCorrected).unwrap();
        assert_eq!(json, "\"CANDIDATE_AUTO_CORRECTED\"");

        let json = serde_json::to_string(&DiagnosticCode::CandidateYearMismatch).unwrap();
        assert_eq!(json, format!("\"{}\"", DiagnosticCode::CandidateYearMismatch.as_str()));
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::of(DiagnosticCode::ValueParseFailure, "Cell 'n.m.' is not numeric")
            .with_location(Location::table("VW2022_T1").at_cell(3, 2));

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("VALUE_PARSE_FAILURE"));
        assert!(json.contains("warn"));
        assert!(json.contains("\"row\":3"));
    }

    #[test]
    fn location_display() {
        let loc = Location::table("T1").in_document("VW2022", Some(14)).at_cell(0, 2);
        assert_eq!(loc.to_string(), "T1 p.14 [0, 2]");
    }
}
