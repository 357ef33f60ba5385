//! Table normalization: header resolution and stub separation
//!
//! A report table may carry several header rows with horizontally merged
//! cells. The normalizer flattens them into one binding per data column:
//! the concatenated label, the fiscal year the column reports and, when the
//! headers state one, the unit of its values.

use std::collections::BTreeMap;

use kpigraph_core::{Diagnostic, DiagnosticCode, HeaderConfig, RawTable, ValueConfig};

use crate::text::{collapse_whitespace, strip_parenthetical, strip_years, UnitLexicon};

/// Resolved header of one data column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    /// Column index in the raw table (0 is the stub column)
    pub column: usize,

    /// Fiscal year, `None` when the header carries no plausible year
    pub year: Option<i32>,

    /// Header fragments joined top to bottom
    pub label: String,

    /// Unit stated by the headers
    pub unit: Option<String>,
}

impl ColumnBinding {
    pub fn is_resolved(&self) -> bool {
        self.year.is_some()
    }
}

/// Output of [`TableNormalizer::normalize`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTable {
    /// Stub label per data row
    pub stub: Vec<String>,

    /// Header text above the stub column
    pub stub_header: String,

    /// One binding per data column, in column order
    pub bindings: Vec<ColumnBinding>,

    /// `UNRESOLVED_HEADER` diagnostics for dropped columns
    pub diagnostics: Vec<Diagnostic>,
}

impl NormalizedTable {
    /// Bindings usable for extraction
    pub fn resolved(&self) -> impl Iterator<Item = &ColumnBinding> {
        self.bindings.iter().filter(|b| b.is_resolved())
    }

    /// Number of data columns dropped for lack of a year
    pub fn unresolved_count(&self) -> usize {
        self.bindings.iter().filter(|b| !b.is_resolved()).count()
    }

    pub fn binding(&self, column: usize) -> Option<&ColumnBinding> {
        self.bindings.iter().find(|b| b.column == column)
    }
}

/// Resolves multi-row headers into column bindings
#[derive(Debug, Clone)]
pub struct TableNormalizer {
    headers: HeaderConfig,
    units: UnitLexicon,
}

impl TableNormalizer {
    pub fn new(headers: &HeaderConfig, values: &ValueConfig) -> Self {
        Self {
            headers: headers.clone(),
            units: UnitLexicon::new(&values.unit_keywords),
        }
    }

    pub fn headers(&self) -> &HeaderConfig {
        &self.headers
    }

    /// Normalize one table
    ///
    /// A table without header rows yields no bindings; it is up to the
    /// caller to treat it as contributing nothing.
    pub fn normalize(&self, table: &RawTable) -> NormalizedTable {
        let stub = table.stub_labels();
        let header_rows = table.effective_header_rows();
        let width = table.width();

        if header_rows.is_empty() || width < 2 {
            return NormalizedTable {
                stub,
                ..NormalizedTable::default()
            };
        }

        let grid = self.header_grid(&header_rows, width);
        let positional = self.positional_years(&grid);
        let stub_header = column_fragments(&grid, 0).join(" ");

        let mut bindings: Vec<ColumnBinding> = (1..width)
            .map(|column| {
                let fragments = column_fragments(&grid, column);
                ColumnBinding {
                    column,
                    year: self.column_year(&grid, &positional, column),
                    unit: self.header_unit(&fragments),
                    label: fragments.join(" "),
                }
            })
            .collect();

        self.assign_stub_units(&stub_header, &mut bindings);

        let mut diagnostics = Vec::new();
        for binding in bindings.iter().filter(|b| !b.is_resolved()) {
            tracing::debug!(
                table_id = %table.table_id,
                column = binding.column,
                label = %binding.label,
                "dropping column without a year"
            );
            diagnostics.push(
                Diagnostic::of(
                    DiagnosticCode::UnresolvedHeader,
                    format!("Column {} ('{}') has no recognizable year", binding.column, binding.label),
                )
                .with_location(table.location().at_column(binding.column)),
            );
        }

        NormalizedTable {
            stub,
            stub_header,
            bindings,
            diagnostics,
        }
    }

    /// Header cells padded to the table width, with merged cells filled in
    fn header_grid(&self, header_rows: &[Vec<String>], width: usize) -> Vec<Vec<String>> {
        let mut grid: Vec<Vec<String>> = header_rows
            .iter()
            .map(|row| {
                (0..width)
                    .map(|col| row.get(col).map(|cell| collapse_whitespace(cell)).unwrap_or_default())
                    .collect()
            })
            .collect();

        // The lowest row names individual columns; only rows above it span.
        if self.headers.fill_merged_cells && grid.len() > 1 {
            let spanning = grid.len() - 1;
            for row in grid.iter_mut().take(spanning) {
                for col in 2..width {
                    if row[col].is_empty() && !row[col - 1].is_empty() {
                        row[col] = row[col - 1].clone();
                    }
                }
            }
        }

        grid
    }

    /// Years assigned by position inside merged cells
    ///
    /// A run of N equal cells whose text holds exactly N years (e.g.
    /// "2022 vs 2021" spanning two columns) gives the i-th year to the
    /// i-th column.
    fn positional_years(&self, grid: &[Vec<String>]) -> BTreeMap<(usize, usize), i32> {
        let mut assigned = BTreeMap::new();

        for (row_idx, row) in grid.iter().enumerate() {
            let mut start = 1;
            while start < row.len() {
                let mut end = start + 1;
                while end < row.len() && row[end] == row[start] {
                    end += 1;
                }

                let span = end - start;
                if span > 1 && !row[start].is_empty() {
                    let years = self.year_tokens(&row[start]);
                    if years.len() == span {
                        for (offset, year) in years.into_iter().enumerate() {
                            assigned.insert((row_idx, start + offset), year);
                        }
                    }
                }

                start = end;
            }
        }

        assigned
    }

    /// Plausible 4-digit years in order of appearance
    fn year_tokens(&self, text: &str) -> Vec<i32> {
        crate::text::year_tokens(text, &self.headers).collect()
    }

    /// Year of a column, taken from the lowest header row that has one
    fn column_year(
        &self,
        grid: &[Vec<String>],
        positional: &BTreeMap<(usize, usize), i32>,
        column: usize,
    ) -> Option<i32> {
        (0..grid.len()).rev().find_map(|row| {
            positional
                .get(&(row, column))
                .copied()
                .or_else(|| self.year_tokens(&grid[row][column]).last().copied())
        })
    }

    /// Unit stated in a column's own header fragments
    fn header_unit(&self, fragments: &[String]) -> Option<String> {
        let from_parenthetical = fragments.iter().rev().find_map(|fragment| {
            let (_, inner) = strip_parenthetical(fragment);
            inner.filter(|inner| self.units.mentions_unit(inner))
        });

        from_parenthetical.or_else(|| {
            fragments.iter().rev().find_map(|fragment| {
                let text = strip_years(fragment);
                self.units.is_unit_phrase(&text).then_some(text)
            })
        })
    }

    /// Fill units left open from the header above the stub column
    ///
    /// "Thousand vehicles/€ million" over columns labelled "Deliveries" and
    /// "Sales revenue" gives each label its own unit.
    fn assign_stub_units(&self, stub_header: &str, bindings: &mut [ColumnBinding]) {
        if stub_header.is_empty() || !self.units.mentions_unit(stub_header) {
            return;
        }

        let parts: Vec<String> = stub_header
            .split('/')
            .map(collapse_whitespace)
            .filter(|part| !part.is_empty())
            .collect();

        let mut labels: Vec<String> = Vec::new();
        for binding in bindings.iter() {
            let label = strip_years(&binding.label);
            if !labels.contains(&label) {
                labels.push(label);
            }
        }

        let per_label = parts.len() > 1 && parts.len() == labels.len();

        for binding in bindings.iter_mut().filter(|b| b.unit.is_none()) {
            binding.unit = if per_label {
                let label = strip_years(&binding.label);
                labels
                    .iter()
                    .position(|l| *l == label)
                    .and_then(|idx| parts.get(idx).cloned())
            } else {
                Some(collapse_whitespace(stub_header))
            };
        }
    }
}

/// Non-empty header cells of one column, consecutive repeats removed
fn column_fragments(grid: &[Vec<String>], column: usize) -> Vec<String> {
    let mut fragments: Vec<String> = Vec::new();
    for row in grid {
        let cell = &row[column];
        if cell.is_empty() || fragments.last() == Some(cell) {
            continue;
        }
        fragments.push(cell.clone());
    }
    fragments
}
