//! Observability infrastructure for the projection engine
//!
//! Provides:
//! - Prometheus metrics about the reconcilers themselves (latency, errors, tracked entities)
//! - Structured logging of reconciliation outcomes with tracing

use crate::models::ObjectKey;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for reconcile latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Engine metrics for Prometheus exposition
///
/// Cheap to clone; clones share the underlying collectors.
#[derive(Clone)]
pub struct EngineMetrics {
    reconcile_duration_seconds: HistogramVec,
    reconcile_errors: IntCounterVec,
    tracked_entities: IntGaugeVec,
}

impl EngineMetrics {
    /// Create the engine metrics and register them in `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "resource_metrics_reconcile_duration_seconds",
                "Time spent in one reconciliation",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["controller"],
        )?;
        let reconcile_errors = IntCounterVec::new(
            Opts::new(
                "resource_metrics_reconcile_errors_total",
                "Total number of failed reconciliations",
            ),
            &["controller", "reason"],
        )?;
        let tracked_entities = IntGaugeVec::new(
            Opts::new(
                "resource_metrics_tracked_entities",
                "Number of entities with published series",
            ),
            &["controller"],
        )?;

        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(reconcile_errors.clone()))?;
        registry.register(Box::new(tracked_entities.clone()))?;

        Ok(Self {
            reconcile_duration_seconds,
            reconcile_errors,
            tracked_entities,
        })
    }

    /// Record how long one reconciliation took
    pub fn observe_reconcile(&self, controller: &str, elapsed: Duration) {
        self.reconcile_duration_seconds
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    /// Increment the error counter for `controller`
    pub fn inc_reconcile_errors(&self, controller: &str, reason: &str) {
        self.reconcile_errors
            .with_label_values(&[controller, reason])
            .inc();
    }

    /// Update the number of entities a controller currently publishes for
    pub fn set_tracked_entities(&self, controller: &str, count: usize) {
        self.tracked_entities
            .with_label_values(&[controller])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn reconcile_errors(&self, controller: &str, reason: &str) -> u64 {
        self.reconcile_errors
            .with_label_values(&[controller, reason])
            .get()
    }
}

/// Structured logger for reconciliation events
///
/// Emits event-named records so log pipelines can filter on `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    controller: &'static str,
}

impl StructuredLogger {
    pub fn new(controller: &'static str) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &'static str {
        self.controller
    }

    /// Log a successful republish
    pub fn log_published(&self, key: &ObjectKey, series: usize) {
        info!(
            event = "series_published",
            controller = self.controller,
            key = %key,
            series = series,
            "Published series"
        );
    }

    /// Log removal of an entity that no longer exists
    pub fn log_deleted(&self, key: &ObjectKey, series: usize) {
        info!(
            event = "entity_deleted",
            controller = self.controller,
            key = %key,
            series = series,
            "Entity gone, removed its series"
        );
    }

    /// Log a failed reconciliation that will be retried
    pub fn log_reconcile_failed(&self, key: &ObjectKey, error: &dyn std::error::Error, retry_in: Duration) {
        warn!(
            event = "reconcile_failed",
            controller = self.controller,
            key = %key,
            error = %error,
            retry_in_ms = retry_in.as_millis() as u64,
            "Reconciliation failed, previous series left untouched"
        );
    }

    /// Log exporter startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "exporter_started",
            controller = self.controller,
            version = %version,
            "Resource metrics exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            controller = self.controller,
            reason = %reason,
            "Resource metrics exporter shutting down"
        );
    }
}
