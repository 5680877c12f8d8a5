//! Watch streams that turn cluster changes into dispatcher requests
//!
//! Events only mark keys dirty. The reconcilers re-read current state, so an
//! event carries no data beyond the key it names.

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::watcher::{self, watcher, Event};
use kube::{Client, ResourceExt};
use metrics_lib::health::{components, HealthRegistry};
use metrics_lib::{DependencyMapper, Dispatcher, ReconcileContext, Request, SeriesTracker};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const NODE_STREAM: &str = "nodes";
pub const POD_STREAM: &str = "pods";
pub const PROVISIONER_STREAM: &str = "provisioners";

/// Resource of the provisioners whose nodes carry the provisioner name label
pub fn provisioner_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "karpenter.sh",
        "v1alpha5",
        "Provisioner",
    ))
}

/// Requests caused by a change to `pod`: the pod itself and its host node
pub fn pod_requests(pod: &Pod) -> Vec<Request> {
    let mut requests = vec![Request::pod(
        pod.namespace().unwrap_or_default(),
        pod.name_any(),
    )];
    let node_name = pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref());
    if let Some(node) = DependencyMapper::node_for_pod(node_name) {
        requests.push(Request::Node(node));
    }
    requests
}

pub struct Watchers {
    client: Client,
    dispatcher: Arc<Dispatcher>,
    mapper: DependencyMapper,
    tracker: Arc<SeriesTracker>,
    health: HealthRegistry,
    retry: Duration,
    shutdown: CancellationToken,
}

impl Watchers {
    pub fn new(
        client: Client,
        dispatcher: Arc<Dispatcher>,
        mapper: DependencyMapper,
        tracker: Arc<SeriesTracker>,
        health: HealthRegistry,
        retry: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            dispatcher,
            mapper,
            tracker,
            health,
            retry,
            shutdown,
        }
    }

    /// Run every watch stream until shutdown
    pub async fn run(self) {
        self.health
            .expect_sync([NODE_STREAM, POD_STREAM, PROVISIONER_STREAM])
            .await;
        self.health.register(components::WATCHERS).await;
        info!("Starting watchers");

        tokio::join!(self.watch_nodes(), self.watch_pods(), self.watch_provisioners());
        info!("Watchers stopped");
    }

    async fn watch_nodes(&self) {
        let api: Api<Node> = Api::all(self.client.clone());
        self.watch(
            NODE_STREAM,
            api,
            |node| async move {
                self.dispatcher.enqueue(Request::node(node.name_any()));
            },
            || {
                for key in self.tracker.node_keys() {
                    self.dispatcher.enqueue(Request::Node(key));
                }
            },
        )
        .await;
    }

    async fn watch_pods(&self) {
        let api: Api<Pod> = Api::all(self.client.clone());
        self.watch(
            POD_STREAM,
            api,
            |pod| async move {
                for request in pod_requests(&pod) {
                    self.dispatcher.enqueue(request);
                }
            },
            || {
                for key in self.tracker.pod_keys() {
                    self.dispatcher.enqueue(Request::Pod(key));
                }
            },
        )
        .await;
    }

    async fn watch_provisioners(&self) {
        let resource = provisioner_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        self.watch(
            PROVISIONER_STREAM,
            api,
            |provisioner| async move { self.enqueue_provisioner_nodes(&provisioner.name_any()).await },
            || {},
        )
        .await;
    }

    async fn enqueue_provisioner_nodes(&self, provisioner: &str) {
        let ctx = ReconcileContext::new(
            self.shutdown.child_token(),
            self.dispatcher.config().reconcile_timeout,
        );
        match self.mapper.nodes_for_provisioner(provisioner, &ctx).await {
            Ok(nodes) => {
                debug!(provisioner, nodes = nodes.len(), "Provisioner changed");
                for node in nodes {
                    self.dispatcher.enqueue(Request::Node(node));
                }
            }
            Err(e) => {
                warn!(provisioner, error = %e, "Failed to map provisioner to nodes");
                self.health
                    .record_failure(components::WATCHERS, e.to_string())
                    .await;
            }
        }
    }

    /// Drive one watch stream, restarting it after failures
    ///
    /// `on_relist` runs after every full list so keys whose deletion was
    /// missed while disconnected are reconciled too.
    async fn watch<K, H, Fut, R>(&self, stream: &'static str, api: Api<K>, handle: H, on_relist: R)
    where
        K: kube::Resource + Clone + DeserializeOwned + Debug + Send + 'static,
        H: Fn(K) -> Fut,
        Fut: Future<Output = ()>,
        R: Fn(),
    {
        loop {
            let mut events = watcher(api.clone(), watcher::Config::default()).boxed();

            loop {
                let next = tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    next = events.next() => next,
                };

                match next {
                    Some(Ok(Event::Applied(object))) | Some(Ok(Event::Deleted(object))) => {
                        handle(object).await;
                    }
                    Some(Ok(Event::Restarted(objects))) => {
                        debug!(stream, objects = objects.len(), "Watch stream listed");
                        for object in objects {
                            handle(object).await;
                        }
                        on_relist();
                        self.health.mark_synced(stream).await;
                        self.health.record_success(components::WATCHERS).await;
                    }
                    Some(Err(e)) => {
                        warn!(stream, error = %e, "Watch stream failed");
                        self.health
                            .record_failure(components::WATCHERS, format!("{stream}: {e}"))
                            .await;
                        break;
                    }
                    None => {
                        warn!(stream, "Watch stream ended");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.retry) => {}
            }
        }
    }
}
