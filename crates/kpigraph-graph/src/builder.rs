//! Graph builder: the single writer of a KPI graph

use kpigraph_core::{EdgeCadence, GraphConfig, Observation};

use crate::graph::{Conflict, GraphStatistics, Insertion, KpiGraph};

/// Accumulates observations into a [`KpiGraph`]
///
/// Node insertion follows first-write-wins; feed observations in a stable
/// order (tables sorted by id) to make conflict outcomes reproducible.
/// Under [`EdgeCadence::PerBatch`] edges are recomputed after every `add`;
/// under [`EdgeCadence::Deferred`] they are recomputed on the next read
/// through [`GraphBuilder::graph`] or on [`GraphBuilder::finish`].
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    graph: KpiGraph,
    cadence: EdgeCadence,
    edges_stale: bool,
}

impl GraphBuilder {
    pub fn new(cadence: EdgeCadence) -> Self {
        Self {
            graph: KpiGraph::new(),
            cadence,
            edges_stale: false,
        }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(config.edge_cadence)
    }

    pub fn cadence(&self) -> EdgeCadence {
        self.cadence
    }

    /// Add a batch of observations, returning the conflicts it produced
    ///
    /// Re-adding an observation identical to an existing node is a no-op.
    pub fn add<I>(&mut self, observations: I) -> Vec<Conflict>
    where
        I: IntoIterator<Item = Observation>,
    {
        let mut conflicts = Vec::new();
        let mut created = 0;

        for observation in observations {
            match self.graph.insert(observation) {
                Insertion::Created(_) => created += 1,
                Insertion::Unchanged(_) => {}
                Insertion::Conflict(conflict) => {
                    tracing::warn!(
                        node_id = %conflict.existing,
                        kept = %conflict.existing_raw_value,
                        rejected = %conflict.rejected.raw_value,
                        table_id = %conflict.rejected.evidence.table_id,
                        "conflicting value for existing node"
                    );
                    conflicts.push(conflict);
                }
            }
        }

        if created > 0 {
            self.edges_stale = true;
        }
        if self.cadence == EdgeCadence::PerBatch {
            self.synthesize_edges();
        }

        tracing::debug!(created, conflicts = conflicts.len(), "added observation batch");
        conflicts
    }

    /// Recompute edges now, whatever the cadence
    pub fn synthesize_edges(&mut self) {
        if self.edges_stale {
            self.graph.synthesize_edges();
            self.edges_stale = false;
        }
    }

    /// The graph with an up-to-date edge set
    pub fn graph(&mut self) -> &KpiGraph {
        self.synthesize_edges();
        &self.graph
    }

    /// The graph as it stands; edges may lag behind under deferred cadence
    pub fn current(&self) -> &KpiGraph {
        &self.graph
    }

    pub fn statistics(&mut self) -> GraphStatistics {
        self.graph().statistics()
    }

    /// Finish ingestion and hand over the graph
    pub fn finish(mut self) -> KpiGraph {
        self.synthesize_edges();
        tracing::info!(
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            conflicts = self.graph.conflicts().len(),
            "graph complete"
        );
        self.graph
    }
}
