//! Raw table records as supplied by the extraction source
//!
//! Tables arrive as newline-delimited JSON, one table per line. Upstream
//! extractors are not consistent about header layout, so both a list of
//! header rows and a single pre-flattened `merged_headers` row are accepted.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::diagnostic::{Diagnostic, DiagnosticCode, Location};

/// A table exactly as extracted from a report page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    /// Unique table identifier (e.g., "VW2022_T4e9153")
    pub table_id: String,

    /// Source document identifier
    #[serde(default)]
    pub doc_id: String,

    /// Table-level reporting year, if the source recorded one
    #[serde(default)]
    pub year: Option<i32>,

    /// Page number in the source document
    #[serde(default)]
    pub page: Option<u32>,

    /// Section the table appears in
    #[serde(default)]
    pub section_name: String,

    /// Table caption
    #[serde(default)]
    pub title: String,

    /// Header rows, top to bottom; spanned cells are repeated or left blank
    #[serde(default, alias = "headers", deserialize_with = "lenient_header_rows")]
    pub header_rows: Vec<Vec<String>>,

    /// Single flattened header row, used when `header_rows` is empty
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_optional_row")]
    pub merged_headers: Option<Vec<String>>,

    /// Data rows; the first cell of each row is the stub label
    #[serde(default, deserialize_with = "lenient_rows")]
    pub rows: Vec<Vec<String>>,

    /// Explicit stub labels, overriding the first cell of each row
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_optional_row")]
    pub stub_col: Option<Vec<String>>,
}

impl RawTable {
    /// Create an empty table with the given identifier
    pub fn new(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            doc_id: String::new(),
            year: None,
            page: None,
            section_name: String::new(),
            title: String::new(),
            header_rows: Vec::new(),
            merged_headers: None,
            rows: Vec::new(),
            stub_col: None,
        }
    }

    /// Header rows to resolve, falling back to `merged_headers`
    pub fn effective_header_rows(&self) -> Vec<Vec<String>> {
        if !self.header_rows.is_empty() {
            return self.header_rows.clone();
        }

        match &self.merged_headers {
            Some(row) if !row.is_empty() => vec![row.clone()],
            _ => Vec::new(),
        }
    }

    /// Stub label of every data row, one per row
    pub fn stub_labels(&self) -> Vec<String> {
        self.rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                self.stub_col
                    .as_ref()
                    .and_then(|stubs| stubs.get(idx))
                    .or_else(|| row.first())
                    .map(|label| label.trim().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Number of columns, stub column included
    pub fn width(&self) -> usize {
        let header_width = self
            .effective_header_rows()
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0);
        let row_width = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        header_width.max(row_width)
    }

    /// Cell text at a data row and column, if present
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    /// Location of the whole table for diagnostics
    pub fn location(&self) -> Location {
        Location::table(&self.table_id).in_document(&self.doc_id, self.page)
    }

    /// Reject tables that cannot be attempted at all
    ///
    /// A table with data rows but not a single stub label has no row
    /// identity to attach values to.
    pub fn validate(&self) -> Result<(), TableError> {
        if !self.rows.is_empty() && self.stub_labels().iter().all(|label| label.is_empty()) {
            return Err(TableError::MissingStubColumn(self.table_id.clone()));
        }
        Ok(())
    }
}

/// Parse newline-delimited JSON tables, failing on the first bad line
pub fn parse_tables(jsonl: &str) -> Result<Vec<RawTable>, TableError> {
    let mut tables = Vec::new();

    for (idx, line) in jsonl.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let table = serde_json::from_str(line).map_err(|e| TableError::ParseError {
            line: idx + 1,
            message: e.to_string(),
        })?;
        tables.push(table);
    }

    Ok(tables)
}

/// Parse newline-delimited JSON tables, skipping bad lines
///
/// Each skipped line yields an `INVALID_TABLE` diagnostic so that one
/// malformed record never stops the rest of the batch.
pub fn parse_tables_lenient(jsonl: &str, source: &str) -> (Vec<RawTable>, Vec<Diagnostic>) {
    let mut tables = Vec::new();
    let mut diagnostics = Vec::new();

    for (idx, line) in jsonl.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<RawTable>(line) {
            Ok(table) => tables.push(table),
            Err(e) => {
                tracing::warn!(source, line = idx + 1, error = %e, "skipping malformed table record");
                diagnostics.push(
                    Diagnostic::of(
                        DiagnosticCode::InvalidTable,
                        format!("Malformed table record at {}:{}: {}", source, idx + 1, e),
                    )
                    .with_location(Location::table(format!("{}:{}", source, idx + 1))),
                );
            }
        }
    }

    (tables, diagnostics)
}

/// Load tables from a newline-delimited JSON file
pub fn read_tables(path: &Path) -> Result<Vec<RawTable>, TableError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TableError::IoError(path.display().to_string(), e.to_string()))?;

    parse_tables(&contents)
}

/// Stable-sort tables by identifier so that ingestion order is reproducible
pub fn sort_for_ingestion(tables: &mut [RawTable]) {
    tables.sort_by(|a, b| a.table_id.cmp(&b.table_id));
}

/// Table loading errors
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("Failed to read {0}: {1}")]
    IoError(String, String),

    #[error("Malformed table record on line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Table {0} has data rows but no stub column")]
    MissingStubColumn(String),
}

/// Cells may be strings, numbers or null depending on the extractor
fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn row_text(row: Vec<serde_json::Value>) -> Vec<String> {
    row.into_iter().map(cell_text).collect()
}

fn lenient_rows<'de, D>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Vec<serde_json::Value>>> = Option::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default().into_iter().map(row_text).collect())
}

fn lenient_optional_row<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(row_text))
}

/// Accept either a list of header rows or a single flat header row
fn lenient_header_rows<'de, D>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Rows(Vec<Vec<serde_json::Value>>),
        Single(Vec<serde_json::Value>),
    }

    let raw: Option<Repr> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(Repr::Rows(rows)) => rows.into_iter().map(row_text).collect(),
        Some(Repr::Single(row)) if !row.is_empty() => vec![row_text(row)],
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUDI_TABLE: &str = r#"{"table_id":"VW2022_T1","doc_id":"VW2022","year":2022,"page":14,"section_name":"SALES REVENUE","title":"Sales revenue by brand","header_rows":[["€ million","2022","2021"]],"rows":[["Audi","61753","55914"]]}"#;

    #[test]
    fn parses_table_record() {
        let tables = parse_tables(AUDI_TABLE).unwrap();
        assert_eq!(tables.len(), 1);

        let table = &tables[0];
        assert_eq!(table.table_id, "VW2022_T1");
        assert_eq!(table.year, Some(2022));
        assert_eq!(table.width(), 3);
        assert_eq!(table.stub_labels(), vec!["Audi".to_string()]);
        assert_eq!(table.cell(0, 1), Some("61753"));
    }

    #[test]
    fn accepts_flat_headers_and_numeric_cells() {
        let line = r#"{"table_id":"T2","headers":["", "2023", "2022"],"rows":[["Deliveries", 409, null]]}"#;
        let table = &parse_tables(line).unwrap()[0];

        assert_eq!(table.header_rows, vec![vec!["".to_string(), "2023".into(), "2022".into()]]);
        assert_eq!(table.rows[0], vec!["Deliveries".to_string(), "409".into(), "".into()]);
    }

    #[test]
    fn merged_headers_fallback() {
        let line = r#"{"table_id":"T3","merged_headers":["Units","2023"],"rows":[["Golf","12"]]}"#;
        let table = &parse_tables(line).unwrap()[0];

        assert_eq!(table.effective_header_rows(), vec![vec!["Units".to_string(), "2023".into()]]);
    }

    #[test]
    fn stub_col_overrides_first_cell() {
        let mut table = RawTable::new("T4");
        table.rows = vec![vec!["".into(), "1".into()]];
        table.stub_col = Some(vec!["Audi".into()]);

        assert_eq!(table.stub_labels(), vec!["Audi".to_string()]);
        assert!(table.validate().is_ok());
    }

    #[test]
    fn missing_stub_column_rejected() {
        let mut table = RawTable::new("T5");
        table.rows = vec![vec!["".into(), "1".into()], vec![" ".into(), "2".into()]];

        assert!(matches!(table.validate(), Err(TableError::MissingStubColumn(id)) if id == "T5"));
    }

    #[test]
    fn strict_parse_reports_line() {
        let input = format!("{}\n\nnot json\n", AUDI_TABLE);
        match parse_tables(&input) {
            Err(TableError::ParseError { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn lenient_parse_skips_bad_lines() {
        let input = format!("{}\nnot json\n{}", AUDI_TABLE, AUDI_TABLE.replace("VW2022_T1", "VW2022_T0"));
        let (mut tables, diagnostics) = parse_tables_lenient(&input, "tables.jsonl");

        assert_eq!(tables.len(), 2);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, DiagnosticCode::InvalidTable);

        sort_for_ingestion(&mut tables);
        assert_eq!(tables[0].table_id, "VW2022_T0");
    }
}
