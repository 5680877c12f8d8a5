//! Tracking of published series per entity
//!
//! The tracker remembers, for every node and pod, exactly which label tuples
//! it last published. Republishing deletes the whole previous set before
//! writing the new one, so a renamed dimension can never leave a stale
//! series behind. The map and the gauge writes share one mutex: concurrent
//! reconciliations of different entities each see a consistent
//! delete/upsert/record sequence.

use crate::gauges::{GaugeRegistry, NodeFamily};
use crate::labels::{NodeSeriesLabels, PodSeriesLabels};
use crate::models::ObjectKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// One node sample ready to be published
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSample {
    pub family: NodeFamily,
    pub labels: NodeSeriesLabels,
    pub value: f64,
}

/// Label tuples published for one node, per family
pub type NodeSeriesSet = BTreeMap<NodeFamily, Vec<NodeSeriesLabels>>;

#[derive(Default)]
struct TrackerState {
    nodes: HashMap<ObjectKey, NodeSeriesSet>,
    pods: HashMap<ObjectKey, PodSeriesLabels>,
}

/// Owner of the gauge registry and of the per-entity published tuple sets
pub struct SeriesTracker {
    gauges: GaugeRegistry,
    state: Mutex<TrackerState>,
}

impl SeriesTracker {
    pub fn new(gauges: GaugeRegistry) -> Self {
        Self {
            gauges,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn gauges(&self) -> &GaugeRegistry {
        &self.gauges
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // A poisoned lock still guards a consistent map
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace everything published for `key` with `samples`
    ///
    /// Returns the number of samples now published for the node.
    pub fn publish_node(&self, key: &ObjectKey, samples: Vec<NodeSample>) -> usize {
        let mut state = self.lock();

        if let Some(previous) = state.nodes.remove(key) {
            self.delete_node_series(&previous);
        }

        let mut published = NodeSeriesSet::new();
        for sample in samples {
            self.gauges
                .upsert_node(sample.family, &sample.labels, sample.value);
            published.entry(sample.family).or_default().push(sample.labels);
        }

        let count = published.values().map(Vec::len).sum();
        state.nodes.insert(key.clone(), published);
        debug!(node = %key, series = count, "Published node series");
        count
    }

    /// Delete every series published for `key`; returns how many were removed
    pub fn forget_node(&self, key: &ObjectKey) -> usize {
        let mut state = self.lock();
        match state.nodes.remove(key) {
            Some(previous) => self.delete_node_series(&previous),
            None => 0,
        }
    }

    fn delete_node_series(&self, set: &NodeSeriesSet) -> usize {
        let mut removed = 0;
        for (family, tuples) in set {
            for labels in tuples {
                if self.gauges.delete_node(*family, labels) {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Replace the state series of the pod `key` with `labels`
    pub fn publish_pod(&self, key: &ObjectKey, labels: PodSeriesLabels) {
        let mut state = self.lock();
        if let Some(previous) = state.pods.remove(key) {
            self.gauges.delete_pod(&previous);
        }
        self.gauges.upsert_pod(&labels, 1.0);
        state.pods.insert(key.clone(), labels);
    }

    /// Delete the state series of the pod `key`; returns whether one existed
    pub fn forget_pod(&self, key: &ObjectKey) -> bool {
        let mut state = self.lock();
        match state.pods.remove(key) {
            Some(previous) => self.gauges.delete_pod(&previous),
            None => false,
        }
    }

    /// Tuple sets currently recorded for a node
    pub fn node_series(&self, key: &ObjectKey) -> Option<NodeSeriesSet> {
        self.lock().nodes.get(key).cloned()
    }

    /// Tuple currently recorded for a pod
    pub fn pod_series(&self, key: &ObjectKey) -> Option<PodSeriesLabels> {
        self.lock().pods.get(key).cloned()
    }

    /// Keys of every node with published series
    pub fn node_keys(&self) -> Vec<ObjectKey> {
        self.lock().nodes.keys().cloned().collect()
    }

    /// Keys of every pod with a published state series
    pub fn pod_keys(&self) -> Vec<ObjectKey> {
        self.lock().pods.keys().cloned().collect()
    }

    pub fn tracked_nodes(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn tracked_pods(&self) -> usize {
        self.lock().pods.len()
    }
}
