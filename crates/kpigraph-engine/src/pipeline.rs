//! Table-parallel ingestion
//!
//! Normalization and extraction are pure per table, so tables are extracted
//! on the rayon pool. The graph builder stays single-writer: extraction
//! results are fed to it one table at a time, in `table_id` order, so the
//! first-write-wins outcome does not depend on thread scheduling.

use kpigraph_core::{sort_for_ingestion, Config, Diagnostic, GraphConfig, Observation, RawTable};
use kpigraph_extract::{KpiExtractor, TableExtraction};
use kpigraph_graph::{GraphBuilder, KpiGraph};
use rayon::prelude::*;

/// Result of ingesting a batch of tables
#[derive(Debug, Clone, Default)]
pub struct Ingestion {
    pub graph: KpiGraph,

    /// Tables that reached the extractor
    pub tables_ingested: usize,

    /// Tables rejected, unreadable or without observations
    pub invalid_tables: usize,

    /// Data columns dropped for lack of a year
    pub unresolved_columns: usize,

    /// Ingestion diagnostics, in table order
    pub diagnostics: Vec<Diagnostic>,
}

impl Ingestion {
    /// Account for records that could not be read at all
    pub fn record_unreadable(&mut self, diagnostics: Vec<Diagnostic>) {
        self.invalid_tables += diagnostics.len();
        self.diagnostics.splice(0..0, diagnostics);
    }
}

/// Normalizer, extractor and builder wired together
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    extractor: KpiExtractor,
    graph: GraphConfig,
}

impl IngestionPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            extractor: KpiExtractor::new(config),
            graph: config.graph.clone(),
        }
    }

    pub fn extractor(&self) -> &KpiExtractor {
        &self.extractor
    }

    /// Extract every table concurrently; results come back in `table_id` order
    pub fn extract_all(&self, tables: &mut [RawTable]) -> Vec<TableExtraction> {
        sort_for_ingestion(tables);

        tables
            .par_iter()
            .map(|table| self.extractor.extract_table(table))
            .collect()
    }

    /// Ingest tables into a fresh graph
    pub fn ingest(&self, tables: Vec<RawTable>) -> Ingestion {
        self.ingest_with(tables, Vec::new())
    }

    /// Ingest tables, then extra observations (e.g. validated candidates)
    pub fn ingest_with(&self, mut tables: Vec<RawTable>, extra: Vec<Observation>) -> Ingestion {
        let extractions = self.extract_all(&mut tables);
        let mut builder = GraphBuilder::from_config(&self.graph);
        let mut ingestion = Ingestion {
            tables_ingested: extractions.len(),
            ..Ingestion::default()
        };

        for extraction in extractions {
            if extraction.invalid {
                ingestion.invalid_tables += 1;
            }
            ingestion.unresolved_columns += extraction.unresolved_columns;
            ingestion.diagnostics.extend(extraction.diagnostics);
            builder.add(extraction.observations);
        }

        if !extra.is_empty() {
            builder.add(extra);
        }

        ingestion.graph = builder.finish();

        tracing::info!(
            tables = ingestion.tables_ingested,
            invalid_tables = ingestion.invalid_tables,
            nodes = ingestion.graph.node_count(),
            "ingestion complete"
        );

        ingestion
    }
}
