//! Serializable graph export (graph.json)
//!
//! The export is what a presentation layer consumes: a flat node list, a
//! flat edge list and the conflicts recorded while building. Importing an
//! export rebuilds the graph and checks that its edges agree with its nodes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::graph::{Conflict, Insertion, KpiGraph, KpiNode, TemporalEdge};

/// Current export format version
pub const EXPORT_VERSION: &str = "1.0";

/// Record-set form of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    /// Export format version
    pub version: String,

    /// SHA-256 (hex) over the node identities and raw values
    pub fingerprint: String,

    pub nodes: Vec<KpiNode>,

    pub edges: Vec<TemporalEdge>,

    #[serde(default)]
    pub conflicts: Vec<Conflict>,

    /// Entity key -> surface labels merged into it
    #[serde(default)]
    pub entity_labels: BTreeMap<String, BTreeSet<String>>,
}

impl GraphExport {
    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, ExportError> {
        serde_json::to_string_pretty(self).map_err(|e| ExportError::ParseError(e.to_string()))
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, ExportError> {
        serde_json::from_str(json).map_err(|e| ExportError::ParseError(e.to_string()))
    }

    /// Save to file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ExportError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| ExportError::IoError(e.to_string()))
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, ExportError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ExportError::IoError(e.to_string()))?;
        Self::from_json(&contents)
    }
}

impl KpiGraph {
    /// Export the graph as a record set
    pub fn to_export(&self) -> GraphExport {
        GraphExport {
            version: EXPORT_VERSION.to_string(),
            fingerprint: self.fingerprint(),
            nodes: self.nodes().cloned().collect(),
            edges: self.edges().cloned().collect(),
            conflicts: self.conflicts().to_vec(),
            entity_labels: self.entity_labels().clone(),
        }
    }

    /// Content hash of the node set
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for node in self.nodes() {
            hasher.update(node.id.as_str().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(node.raw_value().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Rebuild a graph from an export
    ///
    /// Edges are recomputed from the nodes; an export whose edge list or
    /// node identities disagree with its nodes is rejected.
    pub fn from_export(export: GraphExport) -> Result<Self, ExportError> {
        let mut graph = KpiGraph::new();

        for node in export.nodes {
            let expected = node.observation.identity();
            if node.id != expected {
                return Err(ExportError::Inconsistent(format!(
                    "node {} carries observation for {}",
                    node.id, expected
                )));
            }
            match graph.insert(node.observation) {
                Insertion::Created(_) => {}
                Insertion::Unchanged(id) | Insertion::Conflict(Conflict { existing: id, .. }) => {
                    return Err(ExportError::Inconsistent(format!("duplicate node {}", id)));
                }
            }
        }

        graph.synthesize_edges();

        let edges: BTreeSet<TemporalEdge> = export.edges.into_iter().collect();
        let recomputed: BTreeSet<TemporalEdge> = graph.edges().cloned().collect();
        if edges != recomputed {
            return Err(ExportError::Inconsistent(format!(
                "export lists {} edges, nodes imply {}",
                edges.len(),
                recomputed.len()
            )));
        }

        graph.restore(export.conflicts, export.entity_labels);

        if graph.fingerprint() != export.fingerprint {
            return Err(ExportError::Inconsistent("fingerprint does not match nodes".to_string()));
        }

        Ok(graph)
    }
}

/// Graph export errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Inconsistent graph export: {0}")]
    Inconsistent(String),
}
