//! Node reconciler
//!
//! Publishes six gauge families per node: allocatable, pod requests and
//! limits, daemon requests and limits, and system overhead.

use super::{Outcome, ReconcileContext, Reconciler, NODE_CONTROLLER};
use crate::aggregate::{summarize_node, NodeUsage};
use crate::error::ReconcileError;
use crate::gauges::NodeFamily;
use crate::labels::project_node;
use crate::models::{NodeSnapshot, ObjectKey};
use crate::observability::StructuredLogger;
use crate::quantity::ResourceList;
use crate::store::ObjectStore;
use crate::tracker::{NodeSample, SeriesTracker};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct NodeReconciler {
    store: Arc<dyn ObjectStore>,
    tracker: Arc<SeriesTracker>,
    logger: StructuredLogger,
}

impl NodeReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, tracker: Arc<SeriesTracker>) -> Self {
        Self {
            store,
            tracker,
            logger: StructuredLogger::new(NODE_CONTROLLER),
        }
    }
}

/// One sample per (family, resource) entry of `usage`
pub fn node_samples(node: &NodeSnapshot, usage: &NodeUsage) -> Vec<NodeSample> {
    let families: [(NodeFamily, &ResourceList); 6] = [
        (NodeFamily::SystemOverhead, &usage.overhead),
        (NodeFamily::PodRequests, &usage.pod_requests),
        (NodeFamily::PodLimits, &usage.pod_limits),
        (NodeFamily::DaemonRequests, &usage.daemon_requests),
        (NodeFamily::DaemonLimits, &usage.daemon_limits),
        (NodeFamily::Allocatable, &usage.allocatable),
    ];

    families
        .into_iter()
        .flat_map(|(family, resources)| {
            resources.iter().map(move |(name, quantity)| NodeSample {
                family,
                labels: project_node(node, name),
                value: quantity.as_reported(name),
            })
        })
        .collect()
}

#[async_trait]
impl Reconciler for NodeReconciler {
    fn name(&self) -> &'static str {
        NODE_CONTROLLER
    }

    #[instrument(skip(self, ctx), fields(node = %key))]
    async fn reconcile(
        &self,
        key: &ObjectKey,
        ctx: &ReconcileContext,
    ) -> Result<Outcome, ReconcileError> {
        let node = ctx
            .run(self.store.get_node(&key.name))
            .await?
            .map_err(|e| ReconcileError::from_store(format!("node {key}"), e))?;

        let Some(node) = node else {
            ctx.ensure_active()?;
            let removed = self.tracker.forget_node(key);
            self.logger.log_deleted(key, removed);
            return Ok(Outcome::Deleted { series: removed });
        };

        let pods = ctx
            .run(self.store.list_pods_on_node(&node.name))
            .await?
            .map_err(|e| ReconcileError::from_store(format!("pods on node {key}"), e))?;
        debug!(pods = pods.len(), "Listed pods on node");

        let usage = summarize_node(&node, &pods);
        let samples = node_samples(&node, &usage);

        ctx.ensure_active()?;
        let series = self.tracker.publish_node(key, samples);
        self.logger.log_published(key, series);
        Ok(Outcome::Published { series })
    }

    fn tracked(&self) -> usize {
        self.tracker.tracked_nodes()
    }
}
