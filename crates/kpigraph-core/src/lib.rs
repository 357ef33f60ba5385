//! KPI Graph Core
//!
//! Core domain model with stable, versioned types.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod table;
pub mod observation;
pub mod report;
pub mod config;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use table::{RawTable, TableError, parse_tables, parse_tables_lenient, read_tables, sort_for_ingestion};
pub use observation::{Observation, ParsedValue, Evidence, NodeId, NODE_ID_SEPARATOR};
pub use report::{QualityReport, QualitySummary, ReportVersion};
pub use config::{
    Config, ConfigError, MetricDefinition, TaxonomyConfig, EntityConfig, HeaderConfig, ValueConfig,
    ValueRule, EdgeCadence, GraphConfig, RateBasis, VerifierConfig, SeverityThreshold,
};
