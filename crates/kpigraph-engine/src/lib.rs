//! KPI graph verification and ingestion
//!
//! This crate implements the business logic on top of the graph:
//! - Semantic verification (value rules, temporal consistency, conflicts)
//! - Validation of externally extracted KPI candidates
//! - Table-parallel ingestion from raw tables to a finished graph

pub mod verifier;
pub mod candidates;
pub mod pipeline;

pub use verifier::{NodeStatus, NodeVerdict, SemanticVerifier, TEMPORAL_RULE};
pub use candidates::{
    parse_candidates, read_candidates, CandidateError, CandidateKpi, CandidateResult, CandidateSummary,
    CandidateValidation, CandidateValidator, CandidateValue,
};
pub use pipeline::{Ingestion, IngestionPipeline};
