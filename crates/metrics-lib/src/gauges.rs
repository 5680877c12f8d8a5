//! Gauge families exported to the monitoring system
//!
//! One multi-series gauge per reported quantity, created against a registry
//! the caller owns. Scrapes read the registry directly; the engine only
//! writes.

use crate::labels::{NodeSeriesLabels, PodSeriesLabels, NODE_LABEL_NAMES, POD_LABEL_NAMES};
use prometheus::core::Collector;
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::BTreeMap;

const NAMESPACE: &str = "karpenter";

/// The node-level gauge families
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeFamily {
    Allocatable,
    PodRequests,
    PodLimits,
    DaemonRequests,
    DaemonLimits,
    SystemOverhead,
}

impl NodeFamily {
    pub const ALL: [NodeFamily; 6] = [
        NodeFamily::Allocatable,
        NodeFamily::PodRequests,
        NodeFamily::PodLimits,
        NodeFamily::DaemonRequests,
        NodeFamily::DaemonLimits,
        NodeFamily::SystemOverhead,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn metric_name(self) -> &'static str {
        match self {
            NodeFamily::Allocatable => "allocatable",
            NodeFamily::PodRequests => "total_pod_requests",
            NodeFamily::PodLimits => "total_pod_limits",
            NodeFamily::DaemonRequests => "total_daemon_requests",
            NodeFamily::DaemonLimits => "total_daemon_limits",
            NodeFamily::SystemOverhead => "system_overhead",
        }
    }

    fn help(self) -> &'static str {
        match self {
            NodeFamily::Allocatable => "Node allocatable",
            NodeFamily::PodRequests => "Node total pod requests",
            NodeFamily::PodLimits => "Node total pod limits",
            NodeFamily::DaemonRequests => "Node total daemon requests",
            NodeFamily::DaemonLimits => "Node total daemon limits",
            NodeFamily::SystemOverhead => "Node system daemon overhead",
        }
    }
}

/// One published sample: label name/value pairs and the current value
pub type SeriesSample = (BTreeMap<String, String>, f64);

/// Node and pod gauges registered in a caller-provided registry
#[derive(Clone)]
pub struct GaugeRegistry {
    nodes: [GaugeVec; 6],
    pod_state: GaugeVec,
}

impl GaugeRegistry {
    /// Create every gauge family and register it in `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let node_gauge = |family: NodeFamily| -> Result<GaugeVec, prometheus::Error> {
            let gauge = GaugeVec::new(
                Opts::new(family.metric_name(), family.help())
                    .namespace(NAMESPACE)
                    .subsystem("nodes"),
                &NODE_LABEL_NAMES,
            )?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        let nodes = [
            node_gauge(NodeFamily::Allocatable)?,
            node_gauge(NodeFamily::PodRequests)?,
            node_gauge(NodeFamily::PodLimits)?,
            node_gauge(NodeFamily::DaemonRequests)?,
            node_gauge(NodeFamily::DaemonLimits)?,
            node_gauge(NodeFamily::SystemOverhead)?,
        ];

        let pod_state = GaugeVec::new(
            Opts::new("state", "Pod state.")
                .namespace(NAMESPACE)
                .subsystem("pods"),
            &POD_LABEL_NAMES,
        )?;
        registry.register(Box::new(pod_state.clone()))?;

        Ok(Self { nodes, pod_state })
    }

    fn node_vec(&self, family: NodeFamily) -> &GaugeVec {
        &self.nodes[family.index()]
    }

    /// Create or replace the node sample identified by `labels`
    pub fn upsert_node(&self, family: NodeFamily, labels: &NodeSeriesLabels, value: f64) {
        self.node_vec(family)
            .with_label_values(&labels.values())
            .set(value);
    }

    /// Remove a node sample; returns false when it was not present
    pub fn delete_node(&self, family: NodeFamily, labels: &NodeSeriesLabels) -> bool {
        self.node_vec(family)
            .remove_label_values(&labels.values())
            .is_ok()
    }

    /// Create or replace the pod state sample identified by `labels`
    pub fn upsert_pod(&self, labels: &PodSeriesLabels, value: f64) {
        self.pod_state.with_label_values(&labels.values()).set(value);
    }

    /// Remove a pod sample; returns false when it was not present
    pub fn delete_pod(&self, labels: &PodSeriesLabels) -> bool {
        self.pod_state.remove_label_values(&labels.values()).is_ok()
    }

    /// Current samples of a node family
    pub fn node_samples(&self, family: NodeFamily) -> Vec<SeriesSample> {
        samples(self.node_vec(family))
    }

    /// Current samples of the pod state family
    pub fn pod_samples(&self) -> Vec<SeriesSample> {
        samples(&self.pod_state)
    }
}

fn samples(vec: &GaugeVec) -> Vec<SeriesSample> {
    vec.collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .map(|metric| {
            let labels = metric
                .get_label()
                .iter()
                .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
                .collect();
            (labels, metric.get_gauge().get_value())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_labels(node: &str, resource: &str) -> NodeSeriesLabels {
        NodeSeriesLabels {
            resource_type: resource.into(),
            node_name: node.into(),
            provisioner: "default".into(),
            zone: String::new(),
            arch: String::new(),
            capacity_type: "N/A".into(),
            instance_type: String::new(),
            phase: String::new(),
        }
    }

    #[test]
    fn test_registers_every_family() {
        let registry = Registry::new();
        let gauges = GaugeRegistry::new(&registry).unwrap();
        gauges.upsert_node(NodeFamily::Allocatable, &node_labels("n1", "cpu"), 1.0);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"karpenter_nodes_allocatable".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        assert!(GaugeRegistry::new(&registry).is_ok());
        assert!(GaugeRegistry::new(&registry).is_err());
    }

    #[test]
    fn test_upsert_replaces_and_delete_is_idempotent() {
        let registry = Registry::new();
        let gauges = GaugeRegistry::new(&registry).unwrap();
        let labels = node_labels("n1", "cpu");

        gauges.upsert_node(NodeFamily::PodRequests, &labels, 1.0);
        gauges.upsert_node(NodeFamily::PodRequests, &labels, 2.5);

        let samples = gauges.node_samples(NodeFamily::PodRequests);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].1, 2.5);
        assert_eq!(samples[0].0["node_name"], "n1");
        assert!(gauges.node_samples(NodeFamily::PodLimits).is_empty());

        assert!(gauges.delete_node(NodeFamily::PodRequests, &labels));
        assert!(!gauges.delete_node(NodeFamily::PodRequests, &labels));
        assert!(gauges.node_samples(NodeFamily::PodRequests).is_empty());
    }
}
