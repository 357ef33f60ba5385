//! KPI graph construction
//!
//! This crate handles:
//! - Accumulating observations into nodes keyed by (metric, entity, year)
//! - Recording conflicting values under first-write-wins
//! - Synthesizing temporal edges between years of the same series
//! - Graph queries and statistics
//! - Exporting and re-importing the graph as JSON

pub mod graph;
pub mod builder;
pub mod shared;
pub mod export;

pub use graph::{Conflict, GraphStatistics, Insertion, KpiGraph, KpiNode, TemporalEdge};
pub use builder::GraphBuilder;
pub use shared::SharedGraphBuilder;
pub use export::{ExportError, GraphExport, EXPORT_VERSION};
