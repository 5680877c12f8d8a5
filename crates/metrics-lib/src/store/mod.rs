//! Read access to cluster state
//!
//! Reconcilers never trust event payloads. They read current state through
//! an [`ObjectStore`] on every pass.

mod memory;

pub use memory::MemoryObjectStore;

use crate::error::StoreError;
use crate::models::{NodeSnapshot, PodSnapshot};
use async_trait::async_trait;

/// Label carrying the name of the provisioner that created a node
pub const PROVISIONER_NAME_LABEL: &str = "karpenter.sh/provisioner-name";

/// Trait for cluster state lookups
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a node by name, `None` when it does not exist
    async fn get_node(&self, name: &str) -> Result<Option<NodeSnapshot>, StoreError>;

    /// Fetch a pod by namespace and name, `None` when it does not exist
    async fn get_pod(&self, namespace: &str, name: &str)
        -> Result<Option<PodSnapshot>, StoreError>;

    /// List every pod whose node assignment equals `node_name`
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodSnapshot>, StoreError>;

    /// List every node labeled with the given provisioner name
    async fn list_nodes_for_provisioner(
        &self,
        provisioner: &str,
    ) -> Result<Vec<NodeSnapshot>, StoreError>;
}
