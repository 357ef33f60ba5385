//! KPI graph: nodes keyed by (metric, entity, year) and temporal edges
//!
//! Edges are derived data. For every pair of nodes sharing a metric and an
//! entity there is exactly one edge, pointing from the earlier year to the
//! later one.

use std::collections::{BTreeMap, BTreeSet};

use kpigraph_core::{NodeId, Observation};
use serde::{Deserialize, Serialize};

/// A graph node, holding the observation that created it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiNode {
    pub id: NodeId,
    pub observation: Observation,
}

impl KpiNode {
    pub fn new(observation: Observation) -> Self {
        Self {
            id: observation.identity(),
            observation,
        }
    }

    pub fn metric_name(&self) -> &str {
        &self.observation.metric_name
    }

    pub fn entity_key(&self) -> &str {
        &self.observation.entity_key
    }

    pub fn year(&self) -> i32 {
        self.observation.year
    }

    pub fn raw_value(&self) -> &str {
        &self.observation.raw_value
    }
}

/// Directed link from an earlier to a later year of the same series
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemporalEdge {
    pub from: NodeId,
    pub to: NodeId,

    /// Later year minus earlier year, always positive
    pub year_diff: u32,
}

/// An observation rejected because its node already held another value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Node that kept its first value
    pub existing: NodeId,

    /// Raw value of the kept node
    pub existing_raw_value: String,

    /// The observation that lost
    pub rejected: Observation,
}

/// What happened to one inserted observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// A new node was created
    Created(NodeId),

    /// The node already held the same raw value
    Unchanged(NodeId),

    /// The node already held a different raw value
    Conflict(Conflict),
}

/// Summary figures, computed on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub distinct_metrics: usize,
    pub distinct_entities: usize,

    /// Earliest and latest node year
    pub year_range: Option<(i32, i32)>,
}

type SeriesKey = (String, String);

/// Time-indexed KPI graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KpiGraph {
    nodes: BTreeMap<NodeId, KpiNode>,

    /// (metric, entity) -> year -> node
    series: BTreeMap<SeriesKey, BTreeMap<i32, NodeId>>,

    edges: BTreeSet<TemporalEdge>,

    conflicts: Vec<Conflict>,

    /// Entity key -> every surface label seen for it
    entity_labels: BTreeMap<String, BTreeSet<String>>,
}

impl KpiGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one observation under the first-write-wins policy
    ///
    /// Edges are not touched; call [`KpiGraph::synthesize_edges`] once the
    /// node set is complete for the current batch.
    pub fn insert(&mut self, observation: Observation) -> Insertion {
        if !observation.entity_label.is_empty() {
            self.entity_labels
                .entry(observation.entity_key.clone())
                .or_default()
                .insert(observation.entity_label.clone());
        }

        let id = observation.identity();

        if let Some(existing) = self.nodes.get(&id) {
            if existing.raw_value() == observation.raw_value {
                return Insertion::Unchanged(id);
            }

            let conflict = Conflict {
                existing: id,
                existing_raw_value: existing.raw_value().to_string(),
                rejected: observation,
            };
            self.conflicts.push(conflict.clone());
            return Insertion::Conflict(conflict);
        }

        self.series
            .entry((observation.metric_name.clone(), observation.entity_key.clone()))
            .or_default()
            .insert(observation.year, id.clone());
        self.nodes.insert(id.clone(), KpiNode::new(observation));

        Insertion::Created(id)
    }

    /// Recompute the edge set from the current nodes
    ///
    /// Running it twice in a row leaves the graph unchanged.
    pub fn synthesize_edges(&mut self) {
        self.edges = self.expected_edges();
    }

    /// The full temporal ordering implied by the current nodes
    fn expected_edges(&self) -> BTreeSet<TemporalEdge> {
        let mut edges = BTreeSet::new();

        for years in self.series.values() {
            let ordered: Vec<(&i32, &NodeId)> = years.iter().collect();
            for (i, (earlier_year, earlier)) in ordered.iter().enumerate() {
                for (later_year, later) in &ordered[i + 1..] {
                    edges.insert(TemporalEdge {
                        from: (*earlier).clone(),
                        to: (*later).clone(),
                        year_diff: (**later_year).abs_diff(**earlier_year),
                    });
                }
            }
        }

        edges
    }

    /// Whether the edge set matches the node set
    pub fn edges_consistent(&self) -> bool {
        self.edges == self.expected_edges()
    }

    /// Get a node by identity
    pub fn node(&self, id: &str) -> Option<&KpiNode> {
        self.nodes.get(id)
    }

    /// All nodes, ordered by identity
    pub fn nodes(&self) -> impl Iterator<Item = &KpiNode> {
        self.nodes.values()
    }

    /// All edges, ordered by (from, to)
    pub fn edges(&self) -> impl Iterator<Item = &TemporalEdge> {
        self.edges.iter()
    }

    /// Conflicts in the order they were recorded
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Surface labels merged into each entity key
    pub fn entity_labels(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.entity_labels
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Nodes of one (metric, entity) pair, ordered by year
    pub fn series(&self, metric_name: &str, entity_key: &str) -> Vec<&KpiNode> {
        self.series
            .get(&(metric_name.to_string(), entity_key.to_string()))
            .map(|years| years.values().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Nodes reached by an outgoing edge (later years)
    pub fn successors(&self, id: &str) -> Vec<&KpiNode> {
        self.edges
            .iter()
            .filter(|edge| edge.from.as_str() == id)
            .filter_map(|edge| self.nodes.get(&edge.to))
            .collect()
    }

    /// Nodes with an edge into this one (earlier years)
    pub fn predecessors(&self, id: &str) -> Vec<&KpiNode> {
        self.edges
            .iter()
            .filter(|edge| edge.to.as_str() == id)
            .filter_map(|edge| self.nodes.get(&edge.from))
            .collect()
    }

    /// Distinct metric names
    pub fn metrics(&self) -> BTreeSet<&str> {
        self.series.keys().map(|(metric, _)| metric.as_str()).collect()
    }

    /// Distinct entity keys
    pub fn entities(&self) -> BTreeSet<&str> {
        self.series.keys().map(|(_, entity)| entity.as_str()).collect()
    }

    pub fn statistics(&self) -> GraphStatistics {
        let years = self.nodes.values().map(KpiNode::year);
        let year_range = years
            .clone()
            .min()
            .zip(years.max());

        GraphStatistics {
            total_nodes: self.nodes.len(),
            total_edges: self.edges.len(),
            distinct_metrics: self.metrics().len(),
            distinct_entities: self.entities().len(),
            year_range,
        }
    }

    /// Restore recorded conflicts and labels (used by import)
    pub(crate) fn restore(
        &mut self,
        conflicts: Vec<Conflict>,
        entity_labels: BTreeMap<String, BTreeSet<String>>,
    ) {
        self.conflicts = conflicts;
        for (key, labels) in entity_labels {
            self.entity_labels.entry(key).or_default().extend(labels);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kpigraph_core::{Evidence, ParsedValue};
    use rust_decimal::Decimal;

    pub(crate) fn observation(metric: &str, entity: &str, year: i32, raw: &str) -> Observation {
        Observation {
            metric_name: metric.into(),
            entity_key: entity.into(),
            entity_label: entity.to_uppercase(),
            raw_value: raw.into(),
            parsed_value: raw.replace(',', "").parse::<i64>().ok().map(|v| ParsedValue::new(Decimal::from(v), None)),
            year,
            evidence: Evidence {
                table_id: format!("T{}", year),
                ..Evidence::default()
            },
        }
    }

    #[test]
    fn identity_is_deterministic() {
        let mut graph = KpiGraph::new();
        assert!(matches!(graph.insert(observation("sales_revenue", "audi", 2022, "61753")), Insertion::Created(_)));
        assert!(matches!(graph.insert(observation("sales_revenue", "audi", 2022, "61753")), Insertion::Unchanged(_)));
        assert_eq!(graph.node_count(), 1);
        assert!(graph.conflicts().is_empty());
    }

    #[test]
    fn first_write_wins() {
        let mut graph = KpiGraph::new();
        graph.insert(observation("sales_revenue", "audi", 2022, "61753"));
        let outcome = graph.insert(observation("sales_revenue", "audi", 2022, "61754"));

        match outcome {
            Insertion::Conflict(conflict) => {
                assert_eq!(conflict.existing.as_str(), "sales_revenue|audi|2022");
                assert_eq!(conflict.existing_raw_value, "61753");
                assert_eq!(conflict.rejected.raw_value, "61754");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(graph.node("sales_revenue|audi|2022").unwrap().raw_value(), "61753");
        assert_eq!(graph.conflicts().len(), 1);
    }

    #[test]
    fn edges_connect_every_year_pair_forward() {
        let mut graph = KpiGraph::new();
        for year in [2022, 2020, 2021] {
            graph.insert(observation("deliveries", "audi", year, "1"));
        }
        graph.insert(observation("deliveries", "seat", 2021, "1"));
        graph.synthesize_edges();

        assert_eq!(graph.edge_count(), 3);
        for edge in graph.edges() {
            let from = graph.node(edge.from.as_str()).unwrap();
            let to = graph.node(edge.to.as_str()).unwrap();
            assert!(from.year() < to.year());
            assert_eq!(edge.year_diff as i32, to.year() - from.year());
        }
        assert!(graph.edges_consistent());

        let edges_before: Vec<_> = graph.edges().cloned().collect();
        graph.synthesize_edges();
        assert_eq!(graph.edges().cloned().collect::<Vec<_>>(), edges_before);
    }

    #[test]
    fn extreme_years_do_not_overflow_edges() {
        let mut graph = KpiGraph::new();
        graph.insert(observation("deliveries", "audi", i32::MIN, "1"));
        graph.insert(observation("deliveries", "audi", i32::MAX, "1"));
        graph.synthesize_edges();

        let edges: Vec<_> = graph.edges().collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].year_diff, u32::MAX);
    }

    #[test]
    fn stale_edges_are_detected() {
        let mut graph = KpiGraph::new();
        graph.insert(observation("deliveries", "audi", 2021, "1"));
        graph.insert(observation("deliveries", "audi", 2022, "1"));
        assert!(!graph.edges_consistent());
        graph.synthesize_edges();
        assert!(graph.edges_consistent());
    }

    #[test]
    fn queries() {
        let mut graph = KpiGraph::new();
        for year in [2020, 2021, 2022] {
            graph.insert(observation("deliveries", "audi", year, "1"));
        }
        graph.insert(observation("sales_revenue", "porsche", 2022, "1"));
        graph.synthesize_edges();

        let years: Vec<_> = graph.series("deliveries", "audi").iter().map(|n| n.year()).collect();
        assert_eq!(years, vec![2020, 2021, 2022]);

        let later: Vec<_> = graph.successors("deliveries|audi|2020").iter().map(|n| n.year()).collect();
        assert_eq!(later, vec![2021, 2022]);
        let earlier: Vec<_> = graph.predecessors("deliveries|audi|2022").iter().map(|n| n.year()).collect();
        assert_eq!(earlier, vec![2020, 2021]);

        assert_eq!(graph.metrics().into_iter().collect::<Vec<_>>(), vec!["deliveries", "sales_revenue"]);
        assert_eq!(graph.entities().len(), 2);

        let stats = graph.statistics();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.total_edges, 3);
        assert_eq!(stats.distinct_metrics, 2);
        assert_eq!(stats.distinct_entities, 2);
        assert_eq!(stats.year_range, Some((2020, 2022)));
    }

    #[test]
    fn empty_statistics() {
        let stats = KpiGraph::new().statistics();
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.year_range, None);
    }

    #[test]
    fn entity_labels_accumulate() {
        let mut graph = KpiGraph::new();
        let mut first = observation("deliveries", "audi", 2021, "1");
        first.entity_label = "Audi".into();
        let mut second = observation("deliveries", "audi", 2022, "1");
        second.entity_label = "AUDI AG".into();
        graph.insert(first);
        graph.insert(second);

        assert_eq!(graph.entity_labels()["audi"].len(), 2);
    }
}
