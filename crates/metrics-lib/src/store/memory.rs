//! In-memory object store
//!
//! Backs tests and offline runs. Failures can be injected per operation to
//! exercise the retry paths of the reconcilers.

use super::{ObjectStore, PROVISIONER_NAME_LABEL};
use crate::error::StoreError;
use crate::models::{NodeSnapshot, ObjectKey, PodSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Object store holding snapshots in concurrent maps
#[derive(Default)]
pub struct MemoryObjectStore {
    nodes: DashMap<String, NodeSnapshot>,
    pods: DashMap<ObjectKey, PodSnapshot>,
    fail_node_reads: AtomicBool,
    fail_pod_reads: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node
    pub fn upsert_node(&self, node: NodeSnapshot) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn remove_node(&self, name: &str) -> Option<NodeSnapshot> {
        self.nodes.remove(name).map(|(_, v)| v)
    }

    /// Insert or replace a pod
    pub fn upsert_pod(&self, pod: PodSnapshot) {
        self.pods.insert(pod.key(), pod);
    }

    pub fn remove_pod(&self, key: &ObjectKey) -> Option<PodSnapshot> {
        self.pods.remove(key).map(|(_, v)| v)
    }

    /// Make node reads (get and list) fail with `Unavailable`
    pub fn set_fail_node_reads(&self, fail: bool) {
        self.fail_node_reads.store(fail, Ordering::SeqCst);
    }

    /// Make pod reads (get and list) fail with `Unavailable`
    pub fn set_fail_pod_reads(&self, fail: bool) {
        self.fail_pod_reads.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::unavailable(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_node(&self, name: &str) -> Result<Option<NodeSnapshot>, StoreError> {
        Self::check(&self.fail_node_reads, "node read")?;
        Ok(self.nodes.get(name).map(|r| r.clone()))
    }

    async fn get_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodSnapshot>, StoreError> {
        Self::check(&self.fail_pod_reads, "pod read")?;
        Ok(self
            .pods
            .get(&ObjectKey::new(namespace, name))
            .map(|r| r.clone()))
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodSnapshot>, StoreError> {
        Self::check(&self.fail_pod_reads, "pod list")?;
        Ok(self
            .pods
            .iter()
            .filter(|r| r.value().node_name.as_deref() == Some(node_name))
            .map(|r| r.value().clone())
            .collect())
    }

    async fn list_nodes_for_provisioner(
        &self,
        provisioner: &str,
    ) -> Result<Vec<NodeSnapshot>, StoreError> {
        Self::check(&self.fail_node_reads, "node list")?;
        Ok(self
            .nodes
            .iter()
            .filter(|r| r.value().label(PROVISIONER_NAME_LABEL) == Some(provisioner))
            .map(|r| r.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, provisioner: Option<&str>) -> NodeSnapshot {
        let mut node = NodeSnapshot {
            name: name.into(),
            ..Default::default()
        };
        if let Some(p) = provisioner {
            node.labels.insert(PROVISIONER_NAME_LABEL.into(), p.into());
        }
        node
    }

    #[tokio::test]
    async fn test_get_and_remove_node() {
        let store = MemoryObjectStore::new();
        store.upsert_node(node("n1", None));

        assert!(store.get_node("n1").await.unwrap().is_some());
        assert!(store.get_node("n2").await.unwrap().is_none());

        store.remove_node("n1");
        assert!(store.get_node("n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_pods_on_node() {
        let store = MemoryObjectStore::new();
        for (name, node_name) in [("a", Some("n1")), ("b", Some("n2")), ("c", None)] {
            store.upsert_pod(PodSnapshot {
                name: name.into(),
                namespace: "default".into(),
                node_name: node_name.map(Into::into),
                ..Default::default()
            });
        }

        let pods = store.list_pods_on_node("n1").await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "a");
    }

    #[tokio::test]
    async fn test_list_nodes_for_provisioner() {
        let store = MemoryObjectStore::new();
        store.upsert_node(node("n1", Some("default")));
        store.upsert_node(node("n2", Some("gpu")));
        store.upsert_node(node("n3", None));

        let nodes = store.list_nodes_for_provisioner("default").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "n1");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryObjectStore::new();
        store.set_fail_node_reads(true);
        assert!(store.get_node("n1").await.is_err());

        store.set_fail_node_reads(false);
        store.set_fail_pod_reads(true);
        assert!(store.get_node("n1").await.is_ok());
        assert!(store.list_pods_on_node("n1").await.is_err());
    }
}
