//! Validation of externally extracted KPI candidates
//!
//! Candidate records come from an upstream extractor (typically a language
//! model) and point at a source cell by row and column index. Each record is
//! checked against the table it names: indices in bounds, row and column
//! names agreeing with the table, and the value agreeing with the cell.
//! Records that pass can be turned into observations and ingested next to
//! the table observations. The year of such an observation is the source
//! column's year whenever the column header states one.

use std::collections::BTreeMap;
use std::path::Path;

use kpigraph_core::{Diagnostic, DiagnosticCode, Evidence, Location, Observation, RawTable};
use kpigraph_extract::text::strip_parenthetical;
use kpigraph_extract::{CellValue, EntityNormalizer, KpiExtractor};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Absolute difference under which two values are equal
const EXACT_TOLERANCE: f64 = 1e-6;

/// Relative difference under which a value still counts as matching
const RELATIVE_TOLERANCE: f64 = 0.01;

/// A value as the upstream extractor wrote it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CandidateValue {
    Number(f64),
    Text(String),
}

/// One candidate KPI record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateKpi {
    #[serde(default)]
    pub table_id: String,

    /// Metric name as the extractor phrased it
    #[serde(default)]
    pub name: String,

    /// Extractor's own metric key, if any
    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub year: Option<i32>,

    #[serde(default)]
    pub value: Option<CandidateValue>,

    #[serde(default)]
    pub units: Option<String>,

    /// Data row index in the source table
    #[serde(default)]
    pub row_idx: Option<i64>,

    /// Column index in the source table (0 is the stub column)
    #[serde(default)]
    pub col_idx: Option<i64>,

    /// Stub label the extractor read
    #[serde(default)]
    pub row_name: Option<String>,

    /// Column header the extractor read
    #[serde(default)]
    pub col_name: Option<String>,
}

/// Outcome for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub candidate: CandidateKpi,
    pub valid: bool,

    /// Row actually read, when the indices were usable
    pub row_idx: Option<usize>,

    /// Column actually read, after any auto-correction
    pub col_idx: Option<usize>,

    /// Source cell text
    pub source_text: Option<String>,

    /// Source cell value, when the cell is numeric
    pub source_value: Option<f64>,

    /// Year the candidate is filed under: the source column's year when
    /// its header resolves one, else the candidate's own
    #[serde(default)]
    pub year: Option<i32>,

    pub diagnostics: Vec<Diagnostic>,
}

impl CandidateResult {
    fn new(candidate: CandidateKpi) -> Self {
        Self {
            candidate,
            valid: true,
            row_idx: None,
            col_idx: None,
            source_text: None,
            source_value: None,
            year: None,
            diagnostics: Vec::new(),
        }
    }

    fn reject(&mut self, diagnostic: Diagnostic) {
        self.valid = false;
        self.diagnostics.push(diagnostic);
    }

    /// The column index was shifted to find the value
    pub fn auto_corrected(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::CandidateAutoCorrected)
    }

    fn has(&self, code: DiagnosticCode) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }
}

/// Counts over a validation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub auto_corrected: usize,
    pub label_mismatches: usize,
    pub tables_not_found: usize,

    /// valid / total, `None` when there were no candidates
    pub accuracy: Option<f64>,
}

/// Result of validating a set of candidates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateValidation {
    pub summary: CandidateSummary,
    pub results: Vec<CandidateResult>,
}

impl CandidateValidation {
    fn from_results(results: Vec<CandidateResult>) -> Self {
        let mut summary = CandidateSummary {
            total: results.len(),
            ..CandidateSummary::default()
        };

        for result in &results {
            if result.valid {
                summary.valid += 1;
            } else {
                summary.invalid += 1;
            }
            if result.auto_corrected() {
                summary.auto_corrected += 1;
            }
            if result.has(DiagnosticCode::CandidateLabelMismatch) {
                summary.label_mismatches += 1;
            }
            if result.has(DiagnosticCode::CandidateTableNotFound) {
                summary.tables_not_found += 1;
            }
        }

        if summary.total > 0 {
            summary.accuracy = Some(summary.valid as f64 / summary.total as f64);
        }

        Self { summary, results }
    }

    /// Results that passed validation
    pub fn valid(&self) -> impl Iterator<Item = &CandidateResult> {
        self.results.iter().filter(|result| result.valid)
    }

    /// Every diagnostic, in candidate order
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.results.iter().flat_map(|result| result.diagnostics.iter())
    }

    pub fn to_json(&self) -> Result<String, CandidateError> {
        serde_json::to_string_pretty(self).map_err(|e| CandidateError::ParseError(e.to_string()))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), CandidateError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| CandidateError::IoError(e.to_string()))
    }
}

/// Checks candidates against their source tables
pub struct CandidateValidator<'t> {
    tables: BTreeMap<&'t str, &'t RawTable>,
    extractor: &'t KpiExtractor,
}

impl<'t> CandidateValidator<'t> {
    pub fn new(tables: &'t [RawTable], extractor: &'t KpiExtractor) -> Self {
        Self {
            tables: tables.iter().map(|table| (table.table_id.as_str(), table)).collect(),
            extractor,
        }
    }

    /// Validate every candidate, keeping input order
    pub fn validate_all(&self, candidates: Vec<CandidateKpi>) -> CandidateValidation {
        let results: Vec<CandidateResult> = candidates
            .into_iter()
            .map(|candidate| self.validate(candidate))
            .collect();
        let validation = CandidateValidation::from_results(results);

        tracing::info!(
            total = validation.summary.total,
            valid = validation.summary.valid,
            auto_corrected = validation.summary.auto_corrected,
            "validated candidates"
        );

        validation
    }

    /// Validate one candidate against its table
    pub fn validate(&self, candidate: CandidateKpi) -> CandidateResult {
        let mut result = CandidateResult::new(candidate);

        let Some(table) = self.tables.get(result.candidate.table_id.as_str()).copied() else {
            let diagnostic = Diagnostic::of(
                DiagnosticCode::CandidateTableNotFound,
                format!("Table {} was not supplied", result.candidate.table_id),
            )
            .with_location(Location::table(&result.candidate.table_id));
            result.reject(diagnostic);
            return result;
        };

        let (row, column) = match self.resolve_indices(table, &result.candidate) {
            Ok(indices) => indices,
            Err(message) => {
                result.reject(Diagnostic::of(DiagnosticCode::CandidateOutOfBounds, message).with_location(table.location()));
                return result;
            }
        };

        let claimed = self.candidate_value(&result.candidate);
        let mut column = column;
        let mut source = self.cell_value(table, row, column);

        // A stub-column index usually means the extractor counted from the first value
        if source.is_none() && column == 0 {
            let next_matches_name = match (&result.candidate.col_name, header_label(table, 1)) {
                (Some(name), Some(header)) => name.trim() == header,
                _ => false,
            };
            if let Some(next) = self.cell_value(table, row, 1).filter(|_| next_matches_name) {
                result.diagnostics.push(auto_corrected(table, row, 0, 1));
                column = 1;
                source = Some(next);
            }
        }

        match (claimed, source) {
            (None, None) => {}
            (None, Some(source)) => {
                let message = format!("Candidate has no value but the cell holds {}", source);
                result.reject(
                    Diagnostic::of(DiagnosticCode::CandidateValueMismatch, message)
                        .with_location(table.location().at_cell(row, column))
                        .with_comparison(source.to_string(), "null"),
                );
            }
            (Some(claimed), None) => {
                let cell = table.cell(row, column).unwrap_or("").trim();
                let message = format!("Candidate value {} but the cell '{}' holds no number", claimed, cell);
                result.reject(
                    Diagnostic::of(DiagnosticCode::CandidateValueMismatch, message)
                        .with_location(table.location().at_cell(row, column))
                        .with_comparison(cell, claimed.to_string()),
                );
            }
            (Some(claimed), Some(value)) => {
                let relative = relative_diff(claimed, value);
                if relative >= RELATIVE_TOLERANCE {
                    let better = self
                        .cell_value(table, row, column + 1)
                        .filter(|next| {
                            let next_relative = relative_diff(claimed, *next);
                            (claimed - next).abs() <= EXACT_TOLERANCE
                                || (next_relative < RELATIVE_TOLERANCE && next_relative < relative * 0.5)
                        });

                    match better {
                        Some(_) => {
                            result.diagnostics.push(auto_corrected(table, row, column, column + 1));
                            column += 1;
                        }
                        None => {
                            let message = format!(
                                "Candidate value {} differs from cell value {} by {:.1}%",
                                claimed,
                                value,
                                relative * 100.0
                            );
                            result.reject(
                                Diagnostic::of(DiagnosticCode::CandidateValueMismatch, message)
                                    .with_location(table.location().at_cell(row, column))
                                    .with_comparison(value.to_string(), claimed.to_string()),
                            );
                        }
                    }
                }
            }
        }

        self.check_labels(table, row, column, &mut result);
        self.resolve_year(table, column, &mut result);

        result.row_idx = Some(row);
        result.col_idx = Some(column);
        result.source_text = table.cell(row, column).map(|cell| cell.trim().to_string());
        result.source_value = self.cell_value(table, row, column);

        if !result.valid {
            tracing::debug!(
                table_id = %table.table_id,
                row,
                column,
                name = %result.candidate.name,
                "candidate rejected"
            );
        }

        result
    }

    /// Turn validated candidates into observations
    ///
    /// Metric and entity go through the same taxonomy and entity rules as
    /// table cells. Candidates whose metric or year cannot be resolved are
    /// skipped.
    pub fn observations(&self, validation: &CandidateValidation) -> Vec<Observation> {
        validation
            .valid()
            .filter_map(|result| self.to_observation(result))
            .collect()
    }

    fn to_observation(&self, result: &CandidateResult) -> Option<Observation> {
        let candidate = &result.candidate;
        let table = self.tables.get(candidate.table_id.as_str()).copied()?;
        let (row, column) = (result.row_idx?, result.col_idx?);
        let taxonomy = self.extractor.taxonomy();

        let row_label = table.stub_labels().get(row).cloned().unwrap_or_default();
        let (row_text, _) = strip_parenthetical(&row_label);
        let row_metric = taxonomy.classify(&row_text);

        let metric = taxonomy
            .classify(&candidate.name)
            .or_else(|| candidate.key.as_deref().and_then(|key| taxonomy.classify(&key.replace('_', " "))))
            .or_else(|| row_metric.clone())
            .or_else(|| taxonomy.classify(&table.section_name))
            .or_else(|| taxonomy.classify(&table.title));
        let Some(metric) = metric else {
            tracing::debug!(name = %candidate.name, table_id = %table.table_id, "candidate matches no metric");
            return None;
        };

        let year = result.year?;
        let normalized = self.extractor.normalizer().normalize(table);
        let binding = normalized.binding(column);

        let entity_label = if row_metric.is_some() {
            EntityNormalizer::context_label(table)
        } else {
            row_text
        };
        let entity_key = self.extractor.entities().normalize(&entity_label);
        if entity_key.is_empty() {
            return None;
        }

        let raw = table.cell(row, column).unwrap_or("").trim();
        let parsed_value = match self.extractor.values().parse(raw) {
            CellValue::Number(mut value) => {
                if value.unit.is_none() {
                    value.unit = candidate
                        .units
                        .clone()
                        .or_else(|| binding.and_then(|b| b.unit.clone()));
                }
                Some(value)
            }
            CellValue::Missing => None,
            CellValue::Blank | CellValue::Invalid(_) => return None,
        };

        Some(Observation {
            metric_name: metric.metric,
            entity_key,
            entity_label,
            raw_value: raw.to_string(),
            parsed_value,
            year,
            evidence: Evidence {
                doc_id: table.doc_id.clone(),
                table_id: table.table_id.clone(),
                page: table.page,
                section_name: table.section_name.clone(),
                title: table.title.clone(),
                table_year: table.year,
                row_idx: row,
                col_idx: column,
                row_label,
                column_label: binding
                    .map(|b| b.label.clone())
                    .or_else(|| header_label(table, column))
                    .unwrap_or_default(),
            },
        })
    }

    fn resolve_indices(&self, table: &RawTable, candidate: &CandidateKpi) -> Result<(usize, usize), String> {
        let row_idx = candidate.row_idx.ok_or("Candidate has no row_idx")?;
        let col_idx = candidate.col_idx.ok_or("Candidate has no col_idx")?;

        let row = usize::try_from(row_idx)
            .ok()
            .filter(|row| *row < table.rows.len())
            .ok_or_else(|| format!("row_idx {} out of bounds (table has {} rows)", row_idx, table.rows.len()))?;

        let row_width = table.rows[row].len();
        let column = usize::try_from(col_idx)
            .ok()
            .filter(|column| *column < row_width)
            .ok_or_else(|| format!("col_idx {} out of bounds (row has {} columns)", col_idx, row_width))?;

        Ok((row, column))
    }

    fn check_labels(&self, table: &RawTable, row: usize, column: usize, result: &mut CandidateResult) {
        let expected_row = table.stub_labels().get(row).cloned();
        if let (Some(name), Some(expected)) = (result.candidate.row_name.clone(), expected_row) {
            if !labels_agree(&name, &expected) {
                let message = format!("row_name '{}' does not match row {} label '{}'", name.trim(), row, expected);
                result.reject(
                    Diagnostic::of(DiagnosticCode::CandidateLabelMismatch, message)
                        .with_location(table.location().at_row(row))
                        .with_comparison(expected, name.trim()),
                );
            }
        }

        if let (Some(name), Some(expected)) = (result.candidate.col_name.clone(), header_label(table, column)) {
            if !labels_agree(&name, &expected) {
                let message = format!("col_name '{}' does not match column {} header '{}'", name.trim(), column, expected);
                result.reject(
                    Diagnostic::of(DiagnosticCode::CandidateLabelMismatch, message)
                        .with_location(table.location().at_column(column))
                        .with_comparison(expected, name.trim()),
                );
            }
        }
    }

    /// The source column's year wins over the candidate's; a candidate year
    /// is only used for columns without one, and only when plausible
    fn resolve_year(&self, table: &RawTable, column: usize, result: &mut CandidateResult) {
        let normalizer = self.extractor.normalizer();
        let column_year = normalizer.normalize(table).binding(column).and_then(|b| b.year);
        let location = table.location().at_column(column);

        match (column_year, result.candidate.year) {
            (Some(year), Some(claimed)) if claimed != year => {
                let message = format!("Candidate year {} but column {} reports {}", claimed, column, year);
                result.diagnostics.push(
                    Diagnostic::of(DiagnosticCode::CandidateYearMismatch, message)
                        .with_location(location)
                        .with_comparison(year.to_string(), claimed.to_string()),
                );
                result.year = Some(year);
            }
            (Some(year), _) => result.year = Some(year),
            (None, Some(claimed)) if normalizer.headers().is_plausible_year(claimed) => {
                result.year = Some(claimed);
            }
            (None, Some(claimed)) => {
                let headers = normalizer.headers();
                let message = format!(
                    "Candidate year {} is outside {}..={}",
                    claimed, headers.min_year, headers.max_year
                );
                result.reject(
                    Diagnostic::of(DiagnosticCode::CandidateYearMismatch, message)
                        .with_location(location)
                        .with_comparison(format!("{}..={}", headers.min_year, headers.max_year), claimed.to_string()),
                );
            }
            (None, None) => {
                let message = format!("Candidate has no year and column {} header states none", column);
                result.reject(
                    Diagnostic::of(DiagnosticCode::CandidateYearMismatch, message).with_location(location),
                );
            }
        }
    }

    fn candidate_value(&self, candidate: &CandidateKpi) -> Option<f64> {
        match candidate.value.as_ref()? {
            CandidateValue::Number(value) => Some(*value),
            CandidateValue::Text(text) => self.numeric(text),
        }
    }

    fn cell_value(&self, table: &RawTable, row: usize, column: usize) -> Option<f64> {
        self.numeric(table.cell(row, column)?)
    }

    fn numeric(&self, text: &str) -> Option<f64> {
        match self.extractor.values().parse(text) {
            CellValue::Number(value) => value.magnitude.to_f64(),
            _ => None,
        }
    }
}

/// Header text of a column: the merged header if present, else the header rows joined
fn header_label(table: &RawTable, column: usize) -> Option<String> {
    if let Some(merged) = &table.merged_headers {
        return merged.get(column).map(|label| label.trim().to_string());
    }

    let mut parts: Vec<&str> = Vec::new();
    for header_row in &table.header_rows {
        if let Some(cell) = header_row.get(column).map(|cell| cell.trim()) {
            if !cell.is_empty() && parts.last() != Some(&cell) {
                parts.push(cell);
            }
        }
    }

    if table.header_rows.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Exact or case-insensitive agreement after trimming
fn labels_agree(claimed: &str, expected: &str) -> bool {
    let claimed = claimed.trim();
    let expected = expected.trim();
    claimed == expected || claimed.to_lowercase() == expected.to_lowercase()
}

fn relative_diff(claimed: f64, source: f64) -> f64 {
    let diff = (claimed - source).abs();
    if diff <= EXACT_TOLERANCE {
        0.0
    } else {
        diff / source.abs().max(1e-9)
    }
}

fn auto_corrected(table: &RawTable, row: usize, from: usize, to: usize) -> Diagnostic {
    Diagnostic::of(
        DiagnosticCode::CandidateAutoCorrected,
        format!("col_idx {} corrected to {}", from, to),
    )
    .with_location(table.location().at_cell(row, to))
}

/// Upstream extraction file: candidates grouped per table
#[derive(Debug, Deserialize)]
struct ExtractionFile {
    tables: Vec<ExtractionTable>,
}

#[derive(Debug, Deserialize)]
struct ExtractionTable {
    table_id: String,
    #[serde(default)]
    extraction_result: ExtractionResult,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionResult {
    #[serde(default)]
    kpis: Vec<CandidateKpi>,
}

/// Parse candidates from a JSON array, newline-delimited JSON, or a grouped
/// extraction file (`{"tables": [{"table_id", "extraction_result": {"kpis"}}]}`)
pub fn parse_candidates(input: &str) -> Result<Vec<CandidateKpi>, CandidateError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| CandidateError::ParseError(e.to_string()));
    }

    if let Ok(file) = serde_json::from_str::<ExtractionFile>(trimmed) {
        let candidates = file
            .tables
            .into_iter()
            .flat_map(|table| {
                let table_id = table.table_id;
                table.extraction_result.kpis.into_iter().map(move |mut kpi| {
                    if kpi.table_id.is_empty() {
                        kpi.table_id = table_id.clone();
                    }
                    kpi
                })
            })
            .collect();
        return Ok(candidates);
    }

    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| CandidateError::ParseError(format!("line {}: {}", idx + 1, e)))
        })
        .collect()
}

/// Read candidates from a file
pub fn read_candidates(path: &Path) -> Result<Vec<CandidateKpi>, CandidateError> {
    let contents = std::fs::read_to_string(path).map_err(|e| CandidateError::IoError(e.to_string()))?;
    parse_candidates(&contents)
}

/// Candidate loading errors
#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}
