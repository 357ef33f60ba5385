//! Thread-safe handle funnelling concurrent producers into one builder

use std::sync::{Arc, Mutex, PoisonError};

use kpigraph_core::{EdgeCadence, Observation};

use crate::builder::GraphBuilder;
use crate::graph::{Conflict, GraphStatistics, KpiGraph};

/// Cloneable handle to a single [`GraphBuilder`]
///
/// Every `add` takes the lock for the whole batch, so conflict detection
/// always sees a consistent node set.
///
/// ## Usage
///
/// ```rust,ignore
/// let shared = SharedGraphBuilder::new(EdgeCadence::Deferred);
///
/// tables.par_iter().for_each(|table| {
///     shared.add(extractor.extract_table(table).observations);
/// });
///
/// let graph = shared.finish();
/// ```
#[derive(Debug, Clone, Default)]
pub struct SharedGraphBuilder {
    inner: Arc<Mutex<GraphBuilder>>,
}

impl SharedGraphBuilder {
    pub fn new(cadence: EdgeCadence) -> Self {
        Self::from_builder(GraphBuilder::new(cadence))
    }

    pub fn from_builder(builder: GraphBuilder) -> Self {
        Self {
            inner: Arc::new(Mutex::new(builder)),
        }
    }

    /// Add a batch of observations under the lock
    pub fn add<I>(&self, observations: I) -> Vec<Conflict>
    where
        I: IntoIterator<Item = Observation>,
    {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(observations)
    }

    pub fn statistics(&self) -> GraphStatistics {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .statistics()
    }

    /// Take the finished graph out of the shared builder
    ///
    /// Other handles keep working but see an empty builder afterwards.
    pub fn finish(self) -> KpiGraph {
        let builder = match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => {
                let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                let cadence = guard.cadence();
                std::mem::replace(&mut *guard, GraphBuilder::new(cadence))
            }
        };

        builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::observation;
    use std::thread;

    #[test]
    fn concurrent_writers_share_one_graph() {
        let shared = SharedGraphBuilder::new(EdgeCadence::Deferred);

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let batch: Vec<_> = (2018..2023)
                        .map(|year| observation("deliveries", &format!("brand{}", worker), year, "1"))
                        .collect();
                    shared.add(batch)
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_empty());
        }

        let graph = shared.finish();
        assert_eq!(graph.node_count(), 20);
        // 5 years per series: 10 pairs each
        assert_eq!(graph.edge_count(), 40);
    }

    #[test]
    fn racing_conflicts_are_all_recorded() {
        let shared = SharedGraphBuilder::new(EdgeCadence::PerBatch);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let shared = shared.clone();
                thread::spawn(move || {
                    shared.add(vec![observation("sales_revenue", "audi", 2022, &worker.to_string())])
                })
            })
            .collect();

        let conflicts: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();
        assert_eq!(conflicts, 7);

        let graph = shared.finish();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.conflicts().len(), 7);
    }
}
