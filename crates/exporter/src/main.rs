//! Resource metrics exporter
//!
//! Runs as a single deployment per cluster, projecting node and pod resource
//! accounting into Prometheus gauges.

use anyhow::Result;
use metrics_lib::{
    health::{components, HealthRegistry},
    DependencyMapper, DispatcherBuilder, EngineMetrics, GaugeRegistry, NodeReconciler,
    ObjectStore, PodReconciler, SeriesTracker, StructuredLogger,
};
use prometheus::Registry;
use resource_metrics_exporter::{api, config, kube_store, watch};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::ExporterConfig::load()?;
    info!(api_port = config.api_port, "Exporter configured");

    let logger = StructuredLogger::new("exporter");
    logger.log_startup(EXPORTER_VERSION);

    let health_registry = HealthRegistry::new();
    health_registry.register(components::NODE_METRICS).await;
    health_registry.register(components::POD_METRICS).await;

    // Projected gauges and engine metrics share one registry
    let registry = Registry::new();
    let gauges = GaugeRegistry::new(&registry)?;
    let engine_metrics = EngineMetrics::new(&registry)?;
    let tracker = Arc::new(SeriesTracker::new(gauges));

    let client = kube_store::kube_client(config.kubeconfig.as_deref()).await?;
    let store: Arc<dyn ObjectStore> = Arc::new(kube_store::KubeObjectStore::new(client.clone()));

    let shutdown = CancellationToken::new();
    let dispatch = config.dispatch();
    let (dispatcher, requests) = DispatcherBuilder::new()
        .node_reconciler(Arc::new(NodeReconciler::new(store.clone(), tracker.clone())))
        .pod_reconciler(Arc::new(PodReconciler::new(store.clone(), tracker.clone())))
        .reconcile_timeout(dispatch.reconcile_timeout)
        .retry_base_delay(dispatch.retry_base_delay)
        .retry_max_delay(dispatch.retry_max_delay)
        .metrics(engine_metrics)
        .health(health_registry.clone())
        .shutdown(shutdown.clone())
        .build()?;
    let dispatcher_handle = tokio::spawn(dispatcher.clone().run(requests));

    let watchers = watch::Watchers::new(
        client,
        dispatcher,
        DependencyMapper::new(store),
        tracker,
        health_registry.clone(),
        config.watch_retry(),
        shutdown.clone(),
    );
    let watchers_handle = tokio::spawn(watchers.run());

    let app_state = Arc::new(api::AppState::new(health_registry, registry));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    shutdown.cancel();

    let (dispatched, watched, served) =
        tokio::join!(dispatcher_handle, watchers_handle, api_handle);
    dispatched?;
    watched?;
    if let Err(e) = served? {
        warn!(error = %e, "API server exited with error");
    }

    info!("Shutdown complete");
    Ok(())
}
