//! KPI extraction from normalized tables
//!
//! Every (row, column) cell under a resolved column is classified against
//! the taxonomy, its value typed, and an [`Observation`] emitted with full
//! provenance. Problems never abort a table: they become diagnostics next to
//! whatever observations the table still yields.

use kpigraph_core::{
    Config, Diagnostic, DiagnosticCode, Evidence, Observation, RawTable,
};

use crate::entity::EntityNormalizer;
use crate::normalizer::{ColumnBinding, NormalizedTable, TableNormalizer};
use crate::taxonomy::{MetricMatch, Taxonomy};
use crate::text::{strip_parenthetical, strip_years, UnitLexicon};
use crate::value::{CellValue, ValueParser};

/// Everything one table produced
#[derive(Debug, Clone, Default)]
pub struct TableExtraction {
    pub table_id: String,
    pub observations: Vec<Observation>,
    pub diagnostics: Vec<Diagnostic>,

    /// Data columns dropped for lack of a year
    pub unresolved_columns: usize,

    /// The table was rejected or yielded no observations
    pub invalid: bool,
}

/// Classifies and types table cells
#[derive(Debug, Clone)]
pub struct KpiExtractor {
    normalizer: TableNormalizer,
    taxonomy: Taxonomy,
    entities: EntityNormalizer,
    values: ValueParser,
    units: UnitLexicon,
}

impl KpiExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            normalizer: TableNormalizer::new(&config.headers, &config.values),
            taxonomy: Taxonomy::new(&config.taxonomy),
            entities: EntityNormalizer::new(&config.entities),
            values: ValueParser::new(&config.values),
            units: UnitLexicon::new(&config.values.unit_keywords),
        }
    }

    pub fn normalizer(&self) -> &TableNormalizer {
        &self.normalizer
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn entities(&self) -> &EntityNormalizer {
        &self.entities
    }

    pub fn values(&self) -> &ValueParser {
        &self.values
    }

    /// Lazily extract observations from an already normalized table
    ///
    /// The returned iterator makes a single pass over the rows. Diagnostics
    /// raised along the way are collected and handed back by
    /// [`Extraction::into_diagnostics`] once iteration is done.
    pub fn extract<'t>(&'t self, table: &'t RawTable, normalized: &'t NormalizedTable) -> Extraction<'t> {
        Extraction::new(self, table, normalized)
    }

    /// Normalize and extract one table, collecting everything it yields
    pub fn extract_table(&self, table: &RawTable) -> TableExtraction {
        let mut result = TableExtraction {
            table_id: table.table_id.clone(),
            ..TableExtraction::default()
        };

        if let Err(e) = table.validate() {
            tracing::warn!(table_id = %table.table_id, error = %e, "rejecting table");
            result.invalid = true;
            result
                .diagnostics
                .push(Diagnostic::of(DiagnosticCode::MissingStubColumn, e.to_string()).with_location(table.location()));
            return result;
        }

        let normalized = self.normalizer.normalize(table);
        result.unresolved_columns = normalized.unresolved_count();
        result.diagnostics.extend(normalized.diagnostics.iter().cloned());

        let mut extraction = self.extract(table, &normalized);
        result.observations.extend(extraction.by_ref());
        result.diagnostics.extend(extraction.into_diagnostics());

        if result.observations.is_empty() {
            let reason = if normalized.bindings.is_empty() {
                "no parseable header rows"
            } else if normalized.resolved().next().is_none() {
                "no column resolves to a year"
            } else {
                "no row yields a KPI value"
            };
            tracing::warn!(table_id = %table.table_id, reason, "table contributed no observations");
            result.invalid = true;
            result.diagnostics.push(
                Diagnostic::of(
                    DiagnosticCode::InvalidTable,
                    format!("Table {} contributed no observations: {}", table.table_id, reason),
                )
                .with_location(table.location()),
            );
        }

        tracing::info!(
            table_id = %table.table_id,
            observations = result.observations.len(),
            diagnostics = result.diagnostics.len(),
            "extracted table"
        );

        result
    }

    fn classify(&self, label: &str) -> Option<MetricMatch> {
        self.taxonomy.classify(label)
    }
}

/// Column metric classification, computed once per table
struct ColumnPlan<'t> {
    binding: &'t ColumnBinding,
    metric: Option<MetricMatch>,
}

/// Row classification, computed when the row is reached
struct RowPlan {
    row: usize,
    label: String,
    unit: Option<String>,
    metric: Option<MetricMatch>,
    entity_label: String,
}

/// One-pass iterator over the observations of a table
pub struct Extraction<'t> {
    extractor: &'t KpiExtractor,
    table: &'t RawTable,
    normalized: &'t NormalizedTable,
    columns: Vec<ColumnPlan<'t>>,
    context_metric: Option<MetricMatch>,
    context_entity: String,
    next_row: usize,
    next_column: usize,
    current: Option<RowPlan>,
    diagnostics: Vec<Diagnostic>,
}

impl<'t> Extraction<'t> {
    fn new(extractor: &'t KpiExtractor, table: &'t RawTable, normalized: &'t NormalizedTable) -> Self {
        let mut diagnostics = Vec::new();

        let columns = normalized
            .resolved()
            .map(|binding| ColumnPlan {
                binding,
                metric: extractor.classify(&strip_years(&binding.label)),
            })
            .collect::<Vec<_>>();

        for plan in &columns {
            if let Some(m) = plan.metric.as_ref().filter(|m| m.is_ambiguous()) {
                diagnostics.push(ambiguous(m, &plan.binding.label).with_location(table.location().at_column(plan.binding.column)));
            }
        }

        let context_metric = extractor
            .classify(&table.section_name)
            .or_else(|| extractor.classify(&table.title));
        if let Some(m) = context_metric.as_ref().filter(|m| m.is_ambiguous()) {
            diagnostics.push(ambiguous(m, "table context").with_location(table.location()));
        }

        let context_entity = match EntityNormalizer::context_label(table) {
            label if label.is_empty() => table.table_id.clone(),
            label => label,
        };

        Self {
            extractor,
            table,
            normalized,
            columns,
            context_metric,
            context_entity,
            next_row: 0,
            next_column: 0,
            current: None,
            diagnostics,
        }
    }

    /// Diagnostics raised so far
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Consume the iterator, keeping only its diagnostics
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Plan the next data row, or `None` when it yields nothing
    fn plan_row(&mut self, row: usize) -> Option<RowPlan> {
        let label = self.normalized.stub.get(row).cloned().unwrap_or_default();
        if label.is_empty() {
            tracing::debug!(table_id = %self.table.table_id, row, "skipping row without label");
            return None;
        }

        let is_separator = self.columns.iter().all(|plan| {
            self.table
                .cell(row, plan.binding.column)
                .map_or(true, |cell| cell.trim().is_empty())
        });
        if is_separator {
            tracing::debug!(table_id = %self.table.table_id, row, "skipping separator row");
            return None;
        }

        let (text, remark) = strip_parenthetical(&label);
        let unit = remark.filter(|remark| self.extractor.units.mentions_unit(remark));
        let metric = self.extractor.classify(&text);

        if let Some(m) = metric.as_ref().filter(|m| m.is_ambiguous()) {
            self.diagnostics
                .push(ambiguous(m, &label).with_location(self.table.location().at_row(row)));
        }

        if metric.is_none()
            && self.context_metric.is_none()
            && self.columns.iter().all(|plan| plan.metric.is_none())
        {
            tracing::debug!(table_id = %self.table.table_id, row, label = %label, "row matches no metric");
            self.diagnostics.push(
                Diagnostic::of(
                    DiagnosticCode::UnmatchedRow,
                    format!("Row '{}' matches no metric", label),
                )
                .with_location(self.table.location().at_row(row)),
            );
            return None;
        }

        let entity_label = if metric.is_some() {
            self.context_entity.clone()
        } else {
            text
        };

        Some(RowPlan {
            row,
            label,
            unit,
            metric,
            entity_label,
        })
    }

    /// Turn one cell into an observation, if it holds one
    fn observe(&mut self, plan: &RowPlan, column: usize) -> Option<Observation> {
        let column_plan = &self.columns[column];
        let binding = column_plan.binding;
        let year = binding.year?;

        let metric = plan
            .metric
            .as_ref()
            .or(column_plan.metric.as_ref())
            .or(self.context_metric.as_ref())?
            .metric
            .clone();

        let raw = self.table.cell(plan.row, binding.column).unwrap_or("").trim();
        let parsed_value = match self.extractor.values.parse(raw) {
            CellValue::Blank => return None,
            CellValue::Missing => None,
            CellValue::Number(mut value) => {
                if value.unit.is_none() {
                    value.unit = plan.unit.clone().or_else(|| binding.unit.clone());
                }
                Some(value)
            }
            CellValue::Invalid(reason) => {
                tracing::debug!(
                    table_id = %self.table.table_id,
                    row = plan.row,
                    column = binding.column,
                    reason = %reason,
                    "cell is not a value"
                );
                self.diagnostics.push(
                    Diagnostic::of(DiagnosticCode::ValueParseFailure, format!("Cannot parse cell: {}", reason))
                        .with_location(self.table.location().at_cell(plan.row, binding.column))
                        .with_comparison("number or missing-value marker", raw),
                );
                return None;
            }
        };

        let entity_key = self.extractor.entities.normalize(&plan.entity_label);
        if entity_key.is_empty() {
            return None;
        }

        Some(Observation {
            metric_name: metric,
            entity_key,
            entity_label: plan.entity_label.clone(),
            raw_value: raw.to_string(),
            parsed_value,
            year,
            evidence: Evidence {
                doc_id: self.table.doc_id.clone(),
                table_id: self.table.table_id.clone(),
                page: self.table.page,
                section_name: self.table.section_name.clone(),
                title: self.table.title.clone(),
                table_year: self.table.year,
                row_idx: plan.row,
                col_idx: binding.column,
                row_label: plan.label.clone(),
                column_label: binding.label.clone(),
            },
        })
    }
}

impl Iterator for Extraction<'_> {
    type Item = Observation;

    fn next(&mut self) -> Option<Observation> {
        loop {
            if self.current.is_none() {
                if self.columns.is_empty() || self.next_row >= self.normalized.stub.len() {
                    return None;
                }
                let row = self.next_row;
                self.next_row += 1;
                self.next_column = 0;
                self.current = self.plan_row(row);
                continue;
            }

            if self.next_column >= self.columns.len() {
                self.current = None;
                continue;
            }

            let column = self.next_column;
            self.next_column += 1;

            if let Some(plan) = self.current.take() {
                let observation = self.observe(&plan, column);
                self.current = Some(plan);
                if observation.is_some() {
                    return observation;
                }
            }
        }
    }
}

fn ambiguous(m: &MetricMatch, label: &str) -> Diagnostic {
    Diagnostic::of(
        DiagnosticCode::AmbiguousMetric,
        format!(
            "'{}' matches {} and {} equally; using {}",
            label,
            m.metric,
            m.tied_with.join(", "),
            m.metric
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn table(section: &str, title: &str, headers: Vec<&str>, rows: Vec<Vec<&str>>) -> RawTable {
        let mut table = RawTable::new("VW2022_T1");
        table.doc_id = "VW2022".into();
        table.year = Some(2022);
        table.page = Some(14);
        table.section_name = section.into();
        table.title = title.into();
        table.header_rows = vec![headers.into_iter().map(String::from).collect()];
        table.rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(String::from).collect())
            .collect();
        table
    }

    fn extractor() -> KpiExtractor {
        KpiExtractor::new(&Config::default())
    }

    #[test]
    fn metric_from_section_entity_from_row() {
        let t = table(
            "SALES REVENUE",
            "Sales revenue by brand",
            vec!["€ million", "2022", "2021"],
            vec![vec!["Audi", "61,753", "55,914"]],
        );
        let result = extractor().extract_table(&t);

        let ids: Vec<_> = result.observations.iter().map(|o| o.identity().to_string()).collect();
        assert_eq!(ids, vec!["sales_revenue|audi|2022", "sales_revenue|audi|2021"]);

        let first = &result.observations[0];
        let value = first.parsed_value.as_ref().unwrap();
        assert_eq!(value.magnitude, Decimal::from(61753));
        assert_eq!(value.unit.as_deref(), Some("€ million"));
        assert_eq!(first.evidence.row_idx, 0);
        assert_eq!(first.evidence.col_idx, 1);
        assert_eq!(first.evidence.table_year, Some(2022));
        assert_eq!(first.evidence.page, Some(14));
        assert!(!result.invalid);
    }

    #[test]
    fn metric_from_row_entity_from_title() {
        let t = table(
            "Brands",
            "VOLKSWAGEN COMMERCIAL VEHICLES – KEY FIGURES",
            vec!["", "2023", "2022"],
            vec![
                vec!["Deliveries (thousand units)", "409", "331"],
                vec!["Sales revenue (€ million)", "16,234", "13,042"],
            ],
        );
        let result = extractor().extract_table(&t);

        assert_eq!(result.observations.len(), 4);
        let first = &result.observations[0];
        assert_eq!(first.identity().as_str(), "deliveries|volkswagen commercial vehicles|2023");
        assert_eq!(first.parsed_value.as_ref().unwrap().unit.as_deref(), Some("thousand units"));
        assert_eq!(result.observations[2].metric_name, "sales_revenue");
    }

    #[test]
    fn dash_glyph_value_is_negative() {
        let t = table("Operating result", "", vec!["", "2022"], vec![vec!["Audi", "–233"]]);
        let result = extractor().extract_table(&t);

        assert_eq!(result.observations.len(), 1);
        assert_eq!(result.observations[0].metric_name, "operating_result");
        assert_eq!(
            result.observations[0].parsed_value.as_ref().unwrap().magnitude,
            Decimal::from(-233)
        );
    }

    #[test]
    fn missing_marker_keeps_observation() {
        let t = table("Deliveries", "", vec!["", "2022", "2021"], vec![vec!["Audi", "–", "1,681"]]);
        let result = extractor().extract_table(&t);

        assert_eq!(result.observations.len(), 2);
        assert!(result.observations[0].is_missing());
        assert_eq!(result.observations[0].raw_value, "–");
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn separator_and_blank_cells_are_skipped() {
        let t = table(
            "Deliveries",
            "",
            vec!["", "2022", "2021"],
            vec![vec!["Europe", "", ""], vec!["Audi", "1,614", ""]],
        );
        let result = extractor().extract_table(&t);

        assert_eq!(result.observations.len(), 1);
        assert_eq!(result.observations[0].entity_key, "audi");
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn unparseable_cell_is_reported() {
        let t = table("Deliveries", "", vec!["", "2022", "2021"], vec![vec!["Audi", "n.m.", "12"]]);
        let result = extractor().extract_table(&t);

        assert_eq!(result.observations.len(), 1);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].code, DiagnosticCode::ValueParseFailure);
        assert_eq!(result.diagnostics[0].actual.as_deref(), Some("n.m."));
    }

    #[test]
    fn unmatched_rows_and_invalid_table() {
        let t = table("Notes", "Miscellaneous", vec!["", "2022"], vec![vec!["Employees", "120"]]);
        let result = extractor().extract_table(&t);

        assert!(result.observations.is_empty());
        assert!(result.invalid);
        let codes: Vec<_> = result.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::UnmatchedRow, DiagnosticCode::InvalidTable]);
    }

    #[test]
    fn missing_stub_column_is_rejected() {
        let t = table("Deliveries", "", vec!["", "2022"], vec![vec!["", "12"]]);
        let result = extractor().extract_table(&t);

        assert!(result.invalid);
        assert_eq!(result.diagnostics[0].code, DiagnosticCode::MissingStubColumn);
    }

    #[test]
    fn iterator_is_lazy_and_collects_diagnostics() {
        let t = table("Deliveries", "", vec!["", "2022", "x2"], vec![vec!["Audi", "1", "2"], vec!["Seat", "bad", "3"]]);
        let extractor = extractor();
        let normalized = extractor.normalizer().normalize(&t);

        let mut extraction = extractor.extract(&t, &normalized);
        assert_eq!(extraction.next().map(|o| o.entity_key), Some("audi".to_string()));
        assert!(extraction.diagnostics().is_empty());
        assert_eq!(extraction.next(), None);
        assert_eq!(extraction.into_diagnostics().len(), 1);
    }
}
