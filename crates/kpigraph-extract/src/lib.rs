//! Table normalization and KPI extraction
//!
//! This crate handles:
//! - Resolving multi-row, merged table headers into per-column years and units
//! - Parsing printed cell values (separators, signs, units, missing markers)
//! - Matching row and context labels against the metric taxonomy
//! - Normalizing entity labels into stable keys
//! - Emitting KPI observations with provenance

pub mod text;
pub mod value;
pub mod taxonomy;
pub mod entity;
pub mod normalizer;
pub mod extractor;

pub use value::{CellValue, ValueParser};
pub use taxonomy::{MetricMatch, Taxonomy};
pub use entity::EntityNormalizer;
pub use normalizer::{ColumnBinding, NormalizedTable, TableNormalizer};
pub use extractor::{Extraction, KpiExtractor, TableExtraction};
