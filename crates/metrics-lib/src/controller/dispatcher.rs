//! Work queue that runs reconcilers for dirty keys
//!
//! Requests for a key that is already queued are coalesced. At most one
//! reconciliation per key runs at a time, and failed keys are retried with
//! exponential backoff until they succeed or the dispatcher shuts down.

use super::keyed_lock::KeyedLock;
use crate::error::ReconcileError;
use crate::health::HealthRegistry;
use crate::models::ObjectKey;
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::reconciler::{Outcome, ReconcileContext, Reconciler};
use anyhow::Result;
use dashmap::{DashMap, DashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// A key marked dirty for one of the two reconcilers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    Node(ObjectKey),
    Pod(ObjectKey),
}

impl Request {
    pub fn node(name: impl Into<String>) -> Self {
        Request::Node(ObjectKey::cluster_scoped(name))
    }

    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Request::Pod(ObjectKey::new(namespace, name))
    }

    pub fn key(&self) -> &ObjectKey {
        match self {
            Request::Node(key) | Request::Pod(key) => key,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Node(key) => write!(f, "node {key}"),
            Request::Pod(key) => write!(f, "pod {key}"),
        }
    }
}

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on one reconciliation; `None` disables the deadline
    pub reconcile_timeout: Option<Duration>,
    /// Delay before the first retry of a failed key (default: 100ms)
    pub retry_base_delay: Duration,
    /// Cap on the retry delay (default: 5 minutes)
    pub retry_max_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: Some(Duration::from_secs(30)),
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(300),
        }
    }
}

impl DispatchConfig {
    /// Delay before the retry following the `failures`-th consecutive failure
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.retry_base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.retry_max_delay)
    }
}

pub struct Dispatcher {
    nodes: Arc<dyn Reconciler>,
    pods: Arc<dyn Reconciler>,
    config: DispatchConfig,
    locks: KeyedLock<Request>,
    queued: DashSet<Request>,
    failures: DashMap<Request, u32>,
    metrics: Option<EngineMetrics>,
    health: Option<HealthRegistry>,
    queue: mpsc::UnboundedSender<Request>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher and the receiving end of its queue
    pub fn new(
        nodes: Arc<dyn Reconciler>,
        pods: Arc<dyn Reconciler>,
        config: DispatchConfig,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Request>) {
        Self::with_observers(nodes, pods, config, shutdown, None, None)
    }

    fn with_observers(
        nodes: Arc<dyn Reconciler>,
        pods: Arc<dyn Reconciler>,
        config: DispatchConfig,
        shutdown: CancellationToken,
        metrics: Option<EngineMetrics>,
        health: Option<HealthRegistry>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Request>) {
        let (queue, requests) = mpsc::unbounded_channel();
        let dispatcher = Self {
            nodes,
            pods,
            config,
            locks: KeyedLock::new(),
            queued: DashSet::new(),
            failures: DashMap::new(),
            metrics,
            health,
            queue,
            shutdown,
        };
        (Arc::new(dispatcher), requests)
    }

    /// Mark `request` dirty; returns false when it was already queued
    pub fn enqueue(&self, request: Request) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        if !self.queued.insert(request.clone()) {
            trace!(request = %request, "Request already queued");
            return false;
        }
        if self.queue.send(request.clone()).is_err() {
            self.queued.remove(&request);
            return false;
        }
        true
    }

    /// Process queued requests until shutdown, then wait for in-flight work
    pub async fn run(self: Arc<Self>, mut requests: mpsc::UnboundedReceiver<Request>) {
        info!("Starting reconcile dispatcher");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Reconcile task failed");
                    }
                }
                request = requests.recv() => match request {
                    Some(request) => {
                        let this = Arc::clone(&self);
                        tasks.spawn(async move { this.process(request).await });
                    }
                    None => break,
                },
            }
        }

        info!(in_flight = tasks.len(), "Shutting down reconcile dispatcher");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Reconcile task failed");
            }
        }
    }

    async fn process(&self, request: Request) {
        match self.reconcile_now(&request).await {
            Ok(_) | Err(ReconcileError::Cancelled) => {}
            Err(_) => {
                let delay = self.config.retry_delay(self.failure_count(&request));
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        self.enqueue(request);
                    }
                }
            }
        }
    }

    /// Reconcile `request` immediately, serialized with other work on its key
    pub async fn reconcile_now(&self, request: &Request) -> Result<Outcome, ReconcileError> {
        let _guard = self.locks.lock(request).await;
        // Triggers arriving from here on need a fresh pass
        self.queued.remove(request);

        let reconciler = match request {
            Request::Node(_) => &self.nodes,
            Request::Pod(_) => &self.pods,
        };
        let controller = reconciler.name();
        let ctx = ReconcileContext::new(self.shutdown.child_token(), self.config.reconcile_timeout);

        let started = Instant::now();
        let result = reconciler.reconcile(request.key(), &ctx).await;

        if let Some(metrics) = &self.metrics {
            metrics.observe_reconcile(controller, started.elapsed());
            metrics.set_tracked_entities(controller, reconciler.tracked());
            if let Err(e) = &result {
                metrics.inc_reconcile_errors(controller, e.reason());
            }
        }

        match &result {
            Ok(outcome) => {
                if let Some(health) = &self.health {
                    health.record_success(controller).await;
                }
                self.failures.remove(request);
                debug!(request = %request, outcome = ?outcome, "Reconciled");
            }
            Err(ReconcileError::Cancelled) => {
                debug!(request = %request, "Reconcile cancelled");
            }
            Err(e) => {
                if let Some(health) = &self.health {
                    health.record_failure(controller, e.to_string()).await;
                }
                let failures = {
                    let mut count = self.failures.entry(request.clone()).or_insert(0);
                    *count = count.saturating_add(1);
                    *count
                };
                StructuredLogger::new(controller).log_reconcile_failed(
                    request.key(),
                    e,
                    self.config.retry_delay(failures),
                );
            }
        }

        result
    }

    /// Consecutive failures of `request` since its last success
    pub fn failure_count(&self, request: &Request) -> u32 {
        self.failures.get(request).map(|count| *count).unwrap_or(0)
    }

    /// Number of requests waiting to start
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }
}

/// Builder for the dispatcher
pub struct DispatcherBuilder {
    nodes: Option<Arc<dyn Reconciler>>,
    pods: Option<Arc<dyn Reconciler>>,
    config: DispatchConfig,
    metrics: Option<EngineMetrics>,
    health: Option<HealthRegistry>,
    shutdown: CancellationToken,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            nodes: None,
            pods: None,
            config: DispatchConfig::default(),
            metrics: None,
            health: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn node_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.nodes = Some(reconciler);
        self
    }

    pub fn pod_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.pods = Some(reconciler);
        self
    }

    pub fn reconcile_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.reconcile_timeout = timeout;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    /// Record reconcile durations, errors and tracked entities
    pub fn metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report per-controller failure streaks
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Token whose cancellation stops the dispatcher and aborts reconciliations
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn build(self) -> Result<(Arc<Dispatcher>, mpsc::UnboundedReceiver<Request>)> {
        let nodes = self
            .nodes
            .ok_or_else(|| anyhow::anyhow!("Node reconciler is required"))?;
        let pods = self
            .pods
            .ok_or_else(|| anyhow::anyhow!("Pod reconciler is required"))?;
        if self.config.retry_base_delay.is_zero() {
            anyhow::bail!("Retry base delay must be positive");
        }

        Ok(Dispatcher::with_observers(
            nodes,
            pods,
            self.config,
            self.shutdown,
            self.metrics,
            self.health,
        ))
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
