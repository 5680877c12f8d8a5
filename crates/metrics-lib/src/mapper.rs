//! Translation of change events into the keys they affect
//!
//! A pod change dirties its host node; a provisioner change dirties every
//! node it launched.

use crate::error::ReconcileError;
use crate::models::ObjectKey;
use crate::reconciler::ReconcileContext;
use crate::store::ObjectStore;
use std::sync::Arc;

pub struct DependencyMapper {
    store: Arc<dyn ObjectStore>,
}

impl DependencyMapper {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Node keys labeled with the provisioner `name`
    pub async fn nodes_for_provisioner(
        &self,
        name: &str,
        ctx: &ReconcileContext,
    ) -> Result<Vec<ObjectKey>, ReconcileError> {
        let nodes = ctx
            .run(self.store.list_nodes_for_provisioner(name))
            .await?
            .map_err(|e| ReconcileError::from_store(format!("nodes of provisioner {name}"), e))?;

        let mut keys: Vec<ObjectKey> = nodes.iter().map(|node| node.key()).collect();
        keys.sort();
        Ok(keys)
    }

    /// Host node key of a pod; unscheduled pods map to nothing
    pub fn node_for_pod(node_name: Option<&str>) -> Option<ObjectKey> {
        node_name
            .filter(|name| !name.is_empty())
            .map(ObjectKey::cluster_scoped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeSnapshot;
    use crate::store::{MemoryObjectStore, PROVISIONER_NAME_LABEL};

    fn labeled_node(name: &str, provisioner: &str) -> NodeSnapshot {
        let mut node = NodeSnapshot {
            name: name.into(),
            ..Default::default()
        };
        node.labels
            .insert(PROVISIONER_NAME_LABEL.into(), provisioner.into());
        node
    }

    #[tokio::test]
    async fn test_nodes_for_provisioner() {
        let store = Arc::new(MemoryObjectStore::new());
        store.upsert_node(labeled_node("b", "default"));
        store.upsert_node(labeled_node("a", "default"));
        store.upsert_node(labeled_node("c", "gpu"));
        store.upsert_node(NodeSnapshot {
            name: "static".into(),
            ..Default::default()
        });

        let mapper = DependencyMapper::new(store);
        let keys = mapper
            .nodes_for_provisioner("default", &ReconcileContext::background())
            .await
            .unwrap();
        assert_eq!(
            keys,
            vec![ObjectKey::cluster_scoped("a"), ObjectKey::cluster_scoped("b")]
        );

        let none = mapper
            .nodes_for_provisioner("missing", &ReconcileContext::background())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_nodes_for_provisioner_propagates_failure() {
        let store = Arc::new(MemoryObjectStore::new());
        store.set_fail_node_reads(true);

        let mapper = DependencyMapper::new(store);
        let err = mapper
            .nodes_for_provisioner("default", &ReconcileContext::background())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "fetch");
    }

    #[test]
    fn test_node_for_pod() {
        assert_eq!(
            DependencyMapper::node_for_pod(Some("n1")),
            Some(ObjectKey::cluster_scoped("n1"))
        );
        assert_eq!(DependencyMapper::node_for_pod(Some("")), None);
        assert_eq!(DependencyMapper::node_for_pod(None), None);
    }
}
