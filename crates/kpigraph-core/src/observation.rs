//! KPI observations: one extracted fact with its provenance

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::diagnostic::Location;

/// Separator between the parts of a [`NodeId`]
pub const NODE_ID_SEPARATOR: char = '|';

/// Composite node identity: `metric|entity|year`
///
/// Metric names and entity keys never contain [`NODE_ID_SEPARATOR`]; config
/// validation and entity normalization keep it out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Build the identity from its three components
    pub fn new(metric_name: &str, entity_key: &str, year: i32) -> Self {
        let sep = NODE_ID_SEPARATOR;
        Self(format!("{}{sep}{}{sep}{}", metric_name, entity_key, year))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed cell value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedValue {
    /// Signed magnitude with thousands separators removed
    pub magnitude: Decimal,

    /// Unit from the cell, the row label, or the headers
    pub unit: Option<String>,
}

impl ParsedValue {
    pub fn new(magnitude: Decimal, unit: Option<String>) -> Self {
        Self { magnitude, unit }
    }
}

impl std::fmt::Display for ParsedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.unit {
            Some(unit) => write!(f, "{} {}", self.magnitude, unit),
            None => write!(f, "{}", self.magnitude),
        }
    }
}

/// Where an observation came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub doc_id: String,
    pub table_id: String,
    pub page: Option<u32>,
    pub section_name: String,
    pub title: String,

    /// Table-level year, when the source recorded one
    #[serde(default)]
    pub table_year: Option<i32>,

    /// Data row index of the cell
    #[serde(default)]
    pub row_idx: usize,

    /// Column index of the cell (0 is the stub column)
    #[serde(default)]
    pub col_idx: usize,

    /// Row label as printed
    #[serde(default)]
    pub row_label: String,

    /// Resolved column header as printed
    #[serde(default)]
    pub column_label: String,
}

impl Evidence {
    /// Location of the originating cell
    pub fn location(&self) -> Location {
        Location::table(&self.table_id)
            .in_document(&self.doc_id, self.page)
            .at_cell(self.row_idx, self.col_idx)
    }
}

/// One extracted (metric, entity, year, value) fact
///
/// Observations are value objects: they are created once by an extractor
/// and consumed by the graph builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Canonical metric name from the taxonomy
    pub metric_name: String,

    /// Normalized entity key
    pub entity_key: String,

    /// Entity label before normalization
    #[serde(default)]
    pub entity_label: String,

    /// Cell text as printed, kept for audit
    pub raw_value: String,

    /// Typed value, `None` for missing-value markers
    pub parsed_value: Option<ParsedValue>,

    /// Reporting year of the column
    pub year: i32,

    pub evidence: Evidence,
}

impl Observation {
    /// Node identity this observation maps to
    pub fn identity(&self) -> NodeId {
        NodeId::new(&self.metric_name, &self.entity_key, self.year)
    }

    /// Whether the cell carried a missing-value marker
    pub fn is_missing(&self) -> bool {
        self.parsed_value.is_none()
    }
}
