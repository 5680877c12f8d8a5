//! Health tracking for the exporter's controllers and watchers
//!
//! Liveness reflects the worst component status. Readiness additionally
//! waits until every registered watch stream has delivered its initial list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a degraded component is reported unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 5;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Recent operations failed but are being retried
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            updated_at: Utc::now(),
        }
    }

    /// Health after one more failure on top of `self`
    fn failed(&self, message: String) -> Self {
        let consecutive_failures = self.consecutive_failures.saturating_add(1);
        let status = if consecutive_failures >= UNHEALTHY_AFTER_FAILURES {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        Self {
            status,
            message: Some(message),
            consecutive_failures,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status among `components`; healthy when there are none
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        let mut status = ComponentStatus::Healthy;
        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => status = ComponentStatus::Degraded,
                ComponentStatus::Healthy => {}
            }
        }
        status
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const NODE_METRICS: &str = "node_metrics";
    pub const POD_METRICS: &str = "pod_metrics";
    pub const WATCHERS: &str = "watchers";
}

#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    awaiting_sync: Arc<RwLock<BTreeSet<String>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Reset the failure streak of `name`
    pub async fn record_success(&self, name: &str) {
        let mut components = self.components.write().await;
        let needs_reset = components
            .get(name)
            .map_or(true, |health| health.status != ComponentStatus::Healthy);
        if needs_reset {
            components.insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    /// Extend the failure streak of `name`
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let next = components
            .get(name)
            .cloned()
            .unwrap_or_else(ComponentHealth::healthy)
            .failed(message.into());
        components.insert(name.to_string(), next);
    }

    /// Hold readiness until `mark_synced` is called for each of `streams`
    pub async fn expect_sync<'a>(&self, streams: impl IntoIterator<Item = &'a str>) {
        let mut awaiting = self.awaiting_sync.write().await;
        awaiting.extend(streams.into_iter().map(str::to_string));
    }

    /// Record that `stream` delivered its initial list
    pub async fn mark_synced(&self, stream: &str) {
        self.awaiting_sync.write().await.remove(stream);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let awaiting = self.awaiting_sync.read().await.clone();
        if !awaiting.is_empty() {
            let streams: Vec<String> = awaiting.into_iter().collect();
            return ReadinessResponse {
                ready: false,
                reason: Some(format!("Waiting for initial sync of {}", streams.join(", "))),
            };
        }

        if self.health().await.status == ComponentStatus::Unhealthy {
            return ReadinessResponse {
                ready: false,
                reason: Some("Component unhealthy".to_string()),
            };
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy_and_ready() {
        let registry = HealthRegistry::new();

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_failures_degrade_then_fail() {
        let registry = HealthRegistry::new();
        registry.register(components::NODE_METRICS).await;
        registry.register(components::POD_METRICS).await;

        registry
            .record_failure(components::NODE_METRICS, "store unavailable")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::NODE_METRICS].consecutive_failures,
            1
        );

        for _ in 1..UNHEALTHY_AFTER_FAILURES {
            registry
                .record_failure(components::NODE_METRICS, "store unavailable")
                .await;
        }
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let registry = HealthRegistry::new();
        registry
            .record_failure(components::POD_METRICS, "timeout")
            .await;
        registry.record_success(components::POD_METRICS).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        let pod = &health.components[components::POD_METRICS];
        assert_eq!(pod.consecutive_failures, 0);
        assert!(pod.message.is_none());
    }

    #[tokio::test]
    async fn test_readiness_waits_for_initial_sync() {
        let registry = HealthRegistry::new();
        registry.expect_sync(["nodes", "pods"]).await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Waiting for initial sync of nodes, pods")
        );

        registry.mark_synced("nodes").await;
        assert!(!registry.readiness().await.ready);

        registry.mark_synced("pods").await;
        assert!(registry.readiness().await.ready);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ComponentStatus::Degraded).unwrap();
        assert_eq!(json, r#""degraded""#);
    }
}
