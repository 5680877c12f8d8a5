//! Pod reconciler
//!
//! Publishes one presence sample per pod in the pod state gauge.

use super::{Outcome, ReconcileContext, Reconciler, POD_CONTROLLER};
use crate::error::ReconcileError;
use crate::labels::project_pod;
use crate::models::ObjectKey;
use crate::observability::StructuredLogger;
use crate::store::ObjectStore;
use crate::tracker::SeriesTracker;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct PodReconciler {
    store: Arc<dyn ObjectStore>,
    tracker: Arc<SeriesTracker>,
    logger: StructuredLogger,
}

impl PodReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, tracker: Arc<SeriesTracker>) -> Self {
        Self {
            store,
            tracker,
            logger: StructuredLogger::new(POD_CONTROLLER),
        }
    }
}

#[async_trait]
impl Reconciler for PodReconciler {
    fn name(&self) -> &'static str {
        POD_CONTROLLER
    }

    #[instrument(skip(self, ctx), fields(pod = %key))]
    async fn reconcile(
        &self,
        key: &ObjectKey,
        ctx: &ReconcileContext,
    ) -> Result<Outcome, ReconcileError> {
        let pod = ctx
            .run(self.store.get_pod(&key.namespace, &key.name))
            .await?
            .map_err(|e| ReconcileError::from_store(format!("pod {key}"), e))?;

        let Some(pod) = pod else {
            ctx.ensure_active()?;
            let removed = usize::from(self.tracker.forget_pod(key));
            self.logger.log_deleted(key, removed);
            return Ok(Outcome::Deleted { series: removed });
        };

        // A missing host node only degrades the labels; a failed lookup is retried
        let node = match pod.assigned_node() {
            Some(node_name) => ctx
                .run(self.store.get_node(node_name))
                .await?
                .map_err(|e| {
                    ReconcileError::from_store(format!("node {node_name} of pod {key}"), e)
                })?,
            None => None,
        };
        if node.is_none() {
            debug!(node = ?pod.node_name, "Host node not found, publishing without host labels");
        }

        let labels = project_pod(&pod, node.as_ref())?;

        ctx.ensure_active()?;
        self.tracker.publish_pod(key, labels);
        self.logger.log_published(key, 1);
        Ok(Outcome::Published { series: 1 })
    }

    fn tracked(&self) -> usize {
        self.tracker.tracked_pods()
    }
}
