//! Label projection for published series
//!
//! Every series of a family carries the same fixed set of label names. A
//! dimension with no value is published as an explicit sentinel rather than
//! omitted, otherwise delete-by-labels would stop matching.

use crate::error::ReconcileError;
use crate::models::{NodeSnapshot, PodSnapshot};
use crate::store::PROVISIONER_NAME_LABEL;

pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const ARCH_LABEL: &str = "kubernetes.io/arch";
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";
pub const CAPACITY_TYPE_LABEL: &str = "karpenter.sh/capacity-type";

/// Value published for node dimensions that are expected but missing
pub const NOT_APPLICABLE: &str = "N/A";

/// Label names of every node gauge, in value order
pub const NODE_LABEL_NAMES: [&str; 8] = [
    "resource_type",
    "node_name",
    "provisioner",
    "zone",
    "arch",
    "capacity_type",
    "instance_type",
    "phase",
];

/// Label names of the pod state gauge, in value order
pub const POD_LABEL_NAMES: [&str; 11] = [
    "name",
    "namespace",
    "owner",
    "node",
    "provisioner",
    "zone",
    "arch",
    "capacity_type",
    "instance_type",
    "phase",
    "pod_labels",
];

/// Identity of one node series within a node gauge family
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeSeriesLabels {
    pub resource_type: String,
    pub node_name: String,
    pub provisioner: String,
    pub zone: String,
    pub arch: String,
    pub capacity_type: String,
    pub instance_type: String,
    pub phase: String,
}

impl NodeSeriesLabels {
    pub fn values(&self) -> [&str; 8] {
        [
            self.resource_type.as_str(),
            self.node_name.as_str(),
            self.provisioner.as_str(),
            self.zone.as_str(),
            self.arch.as_str(),
            self.capacity_type.as_str(),
            self.instance_type.as_str(),
            self.phase.as_str(),
        ]
    }
}

/// Identity of one pod series in the pod state gauge
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodSeriesLabels {
    pub name: String,
    pub namespace: String,
    pub owner: String,
    pub node: String,
    pub provisioner: String,
    pub zone: String,
    pub arch: String,
    pub capacity_type: String,
    pub instance_type: String,
    pub phase: String,
    pub pod_labels: String,
}

impl PodSeriesLabels {
    pub fn values(&self) -> [&str; 11] {
        [
            self.name.as_str(),
            self.namespace.as_str(),
            self.owner.as_str(),
            self.node.as_str(),
            self.provisioner.as_str(),
            self.zone.as_str(),
            self.arch.as_str(),
            self.capacity_type.as_str(),
            self.instance_type.as_str(),
            self.phase.as_str(),
            self.pod_labels.as_str(),
        ]
    }
}

/// Metric-safe form of a resource name: lower case, `-` replaced by `_`
pub fn normalize_resource_name(name: &str) -> String {
    name.to_lowercase().replace('-', "_")
}

/// Labels of the series reporting `resource_name` for `node`
pub fn project_node(node: &NodeSnapshot, resource_name: &str) -> NodeSeriesLabels {
    let label_or = |key: &str, fallback: &str| node.label(key).unwrap_or(fallback).to_string();

    NodeSeriesLabels {
        resource_type: normalize_resource_name(resource_name),
        node_name: node.name.clone(),
        provisioner: label_or(PROVISIONER_NAME_LABEL, NOT_APPLICABLE),
        zone: label_or(ZONE_LABEL, ""),
        arch: label_or(ARCH_LABEL, ""),
        capacity_type: label_or(CAPACITY_TYPE_LABEL, NOT_APPLICABLE),
        instance_type: label_or(INSTANCE_TYPE_LABEL, ""),
        phase: node.phase.clone(),
    }
}

/// Path of the pod's first owner, in the form the API server uses for self links
pub fn owner_link(pod: &PodSnapshot) -> String {
    pod.owners
        .first()
        .map(|owner| {
            format!(
                "/apis/{}/namespaces/{}/{}s/{}",
                owner.api_version,
                pod.namespace,
                owner.kind.to_lowercase(),
                owner.name
            )
        })
        .unwrap_or_default()
}

/// Labels of the state series for `pod`
///
/// Host dimensions come from `node` when it was found. Without it they are
/// empty and the provisioner falls back to the pod's node selector.
pub fn project_pod(
    pod: &PodSnapshot,
    node: Option<&NodeSnapshot>,
) -> Result<PodSeriesLabels, ReconcileError> {
    let pod_labels =
        serde_json::to_string(&pod.labels).map_err(|e| ReconcileError::Projection {
            what: format!("pod {}", pod.key()),
            reason: format!("serializing pod labels: {e}"),
        })?;

    let host = |key: &str| {
        node.and_then(|n| n.label(key))
            .unwrap_or_default()
            .to_string()
    };
    let provisioner = match node {
        Some(n) => n.label(PROVISIONER_NAME_LABEL).unwrap_or_default().to_string(),
        None => pod
            .node_selector
            .get(PROVISIONER_NAME_LABEL)
            .cloned()
            .unwrap_or_default(),
    };

    Ok(PodSeriesLabels {
        name: pod.name.clone(),
        namespace: pod.namespace.clone(),
        owner: owner_link(pod),
        node: pod.node_name.clone().unwrap_or_default(),
        provisioner,
        zone: host(ZONE_LABEL),
        arch: host(ARCH_LABEL),
        capacity_type: host(CAPACITY_TYPE_LABEL),
        instance_type: host(INSTANCE_TYPE_LABEL),
        phase: pod.phase.as_str().to_string(),
        pod_labels,
    })
}
