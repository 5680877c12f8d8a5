//! Control loops that republish the series of one entity per trigger
//!
//! Both reconcilers recompute from live state on every call, so repeated or
//! late triggers for the same key are harmless.

mod context;
mod node;
mod pod;


pub use context::ReconcileContext;
pub use node::{node_samples, NodeReconciler};
pub use pod::PodReconciler;

use crate::error::ReconcileError;
use crate::models::ObjectKey;
use async_trait::async_trait;

/// Controller name of the node reconciler, used in logs and metrics
pub const NODE_CONTROLLER: &str = "node_metrics";
/// Controller name of the pod reconciler, used in logs and metrics
pub const POD_CONTROLLER: &str = "pod_metrics";

/// Result of a successful reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The entity exists and `series` samples are now published for it
    Published { series: usize },
    /// The entity is gone and `series` previously published samples were removed
    Deleted { series: usize },
}

/// Trait implemented by both reconcilers
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Recompute and republish everything for `key`
    async fn reconcile(
        &self,
        key: &ObjectKey,
        ctx: &ReconcileContext,
    ) -> Result<Outcome, ReconcileError>;

    /// Number of entities with published series
    fn tracked(&self) -> usize;
}
