//! Object store backed by the Kubernetes API

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use metrics_lib::models::{ContainerResources, NodeSnapshot, OwnerReference, PodPhase, PodSnapshot};
use metrics_lib::quantity::{parse_quantity, ResourceList};
use metrics_lib::store::{ObjectStore, PROVISIONER_NAME_LABEL};
use metrics_lib::StoreError;
use std::collections::BTreeMap;
use std::path::Path;

/// Client from an explicit kubeconfig, or in-cluster / default discovery
pub async fn kube_client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .context("Failed to create Kubernetes client");
    };

    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("Failed to read kubeconfig file: {}", path.display()))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("Failed to create config from kubeconfig: {}", path.display()))?;
    Client::try_from(config).context("Failed to create Kubernetes client from kubeconfig")
}

#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn unavailable(what: &str, e: kube::Error) -> StoreError {
    StoreError::unavailable(format!("{what}: {e}"))
}

fn resource_list(
    kind: &'static str,
    name: &str,
    raw: Option<&BTreeMap<String, KubeQuantity>>,
) -> Result<ResourceList, StoreError> {
    let Some(raw) = raw else {
        return Ok(ResourceList::new());
    };
    raw.iter()
        .map(|(resource, quantity)| {
            parse_quantity(&quantity.0)
                .map(|parsed| (resource.clone(), parsed))
                .map_err(|e| StoreError::Malformed {
                    kind,
                    name: name.to_string(),
                    reason: format!("resource {resource}: {e}"),
                })
        })
        .collect()
}

/// Convert an API node into the engine's view of it
pub fn node_snapshot(node: &Node) -> Result<NodeSnapshot, StoreError> {
    let name = node.metadata.name.clone().unwrap_or_default();
    let status = node.status.as_ref();

    Ok(NodeSnapshot {
        labels: node.metadata.labels.clone().unwrap_or_default(),
        capacity: resource_list("Node", &name, status.and_then(|s| s.capacity.as_ref()))?,
        allocatable: resource_list("Node", &name, status.and_then(|s| s.allocatable.as_ref()))?,
        phase: status.and_then(|s| s.phase.clone()).unwrap_or_default(),
        name,
    })
}

/// Convert an API pod into the engine's view of it
pub fn pod_snapshot(pod: &Pod) -> Result<PodSnapshot, StoreError> {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let qualified = format!("{namespace}/{name}");
    let spec = pod.spec.as_ref();

    let containers = spec
        .map(|s| s.containers.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|container| {
            let resources = container.resources.as_ref();
            Ok(ContainerResources {
                requests: resource_list(
                    "Pod",
                    &qualified,
                    resources.and_then(|r| r.requests.as_ref()),
                )?,
                limits: resource_list("Pod", &qualified, resources.and_then(|r| r.limits.as_ref()))?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    let overhead = match spec.and_then(|s| s.overhead.as_ref()) {
        Some(raw) => Some(resource_list("Pod", &qualified, Some(raw))?),
        None => None,
    };

    let owners = pod
        .metadata
        .owner_references
        .iter()
        .flatten()
        .map(|owner| OwnerReference {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.name.clone(),
            controller: owner.controller.unwrap_or(false),
        })
        .collect();

    Ok(PodSnapshot {
        name,
        namespace,
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        node_name: spec.and_then(|s| s.node_name.clone()),
        node_selector: spec
            .and_then(|s| s.node_selector.clone())
            .unwrap_or_default(),
        phase: PodPhase::parse(
            pod.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or_default(),
        ),
        owners,
        containers,
        overhead,
    })
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get_node(&self, name: &str) -> Result<Option<NodeSnapshot>, StoreError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api
            .get_opt(name)
            .await
            .map_err(|e| unavailable(&format!("get node {name}"), e))?;
        node.as_ref().map(node_snapshot).transpose()
    }

    async fn get_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodSnapshot>, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api
            .get_opt(name)
            .await
            .map_err(|e| unavailable(&format!("get pod {namespace}/{name}"), e))?;
        pod.as_ref().map(pod_snapshot).transpose()
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodSnapshot>, StoreError> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        let pods = api
            .list(&params)
            .await
            .map_err(|e| unavailable(&format!("list pods on node {node_name}"), e))?;
        pods.items.iter().map(pod_snapshot).collect()
    }

    async fn list_nodes_for_provisioner(
        &self,
        provisioner: &str,
    ) -> Result<Vec<NodeSnapshot>, StoreError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let params =
            ListParams::default().labels(&format!("{PROVISIONER_NAME_LABEL}={provisioner}"));
        let nodes = api
            .list(&params)
            .await
            .map_err(|e| unavailable(&format!("list nodes of provisioner {provisioner}"), e))?;
        nodes.items.iter().map(node_snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, NodeStatus, PodSpec, PodStatus, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        ObjectMeta, OwnerReference as KubeOwnerReference,
    };
    use metrics_lib::Quantity;

    fn quantities(entries: &[(&str, &str)]) -> Option<BTreeMap<String, KubeQuantity>> {
        Some(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), KubeQuantity(v.to_string())))
                .collect(),
        )
    }

    fn api_node(capacity: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some("n1".into()),
                labels: Some(BTreeMap::from([(
                    PROVISIONER_NAME_LABEL.to_string(),
                    "default".to_string(),
                )])),
                ..Default::default()
            },
            status: Some(NodeStatus {
                capacity: quantities(capacity),
                allocatable: quantities(&[("cpu", "3800m")]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn api_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("agent-x7".into()),
                namespace: Some("kube-system".into()),
                owner_references: Some(vec![KubeOwnerReference {
                    api_version: "apps/v1".into(),
                    kind: "DaemonSet".into(),
                    name: "agent".into(),
                    controller: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("n1".into()),
                containers: vec![Container {
                    name: "agent".into(),
                    resources: Some(ResourceRequirements {
                        requests: quantities(&[("cpu", "200m"), ("memory", "128Mi")]),
                        limits: quantities(&[("memory", "256Mi")]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                overhead: quantities(&[("cpu", "10m")]),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".into()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_node_conversion() {
        let node = node_snapshot(&api_node(&[("cpu", "4"), ("memory", "16Gi")])).unwrap();

        assert_eq!(node.name, "n1");
        assert_eq!(node.label(PROVISIONER_NAME_LABEL), Some("default"));
        assert_eq!(node.capacity["cpu"], Quantity::from_units(4));
        assert_eq!(node.capacity["memory"].value(), 16 * 1024 * 1024 * 1024);
        assert_eq!(node.allocatable["cpu"], Quantity::from_millis(3800));
        assert_eq!(node.phase, "");
    }

    #[test]
    fn test_node_with_bad_quantity_is_malformed() {
        let err = node_snapshot(&api_node(&[("cpu", "four")])).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { kind: "Node", .. }));
    }

    #[test]
    fn test_pod_conversion() {
        let pod = pod_snapshot(&api_pod()).unwrap();

        assert_eq!(pod.key().to_string(), "kube-system/agent-x7");
        assert_eq!(pod.assigned_node(), Some("n1"));
        assert_eq!(pod.phase, PodPhase::Running);
        assert!(pod.is_daemon_owned());
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].requests["cpu"], Quantity::from_millis(200));
        assert_eq!(
            pod.containers[0].limits["memory"].value(),
            256 * 1024 * 1024
        );
        assert_eq!(
            pod.overhead.as_ref().map(|o| o["cpu"]),
            Some(Quantity::from_millis(10))
        );
    }

    #[test]
    fn test_pod_without_spec_or_status() {
        let pod = pod_snapshot(&Pod {
            metadata: ObjectMeta {
                name: Some("bare".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        assert_eq!(pod.assigned_node(), None);
        assert_eq!(pod.phase, PodPhase::Unknown);
        assert!(pod.containers.is_empty());
        assert!(pod.overhead.is_none());
    }
}
