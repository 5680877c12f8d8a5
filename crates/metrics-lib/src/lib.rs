//! Resource metrics projection engine
//!
//! This crate turns the live state of cluster nodes and pods into Prometheus
//! gauge series:
//! - Per-node allocatable, pod and daemon requests/limits, and system overhead
//! - A presence series per pod carrying its placement and phase
//! - Reconcilers that republish an entity's series whenever it changes
//! - A dispatcher that serializes, coalesces and retries reconciliations
//! - Health checks and engine observability

pub mod aggregate;
pub mod controller;
pub mod error;
pub mod gauges;
pub mod health;
pub mod labels;
pub mod mapper;
pub mod models;
pub mod observability;
pub mod quantity;
pub mod reconciler;
pub mod store;
pub mod tracker;

pub use controller::{DispatchConfig, Dispatcher, DispatcherBuilder, Request};
pub use error::{ReconcileError, StoreError};
pub use gauges::{GaugeRegistry, NodeFamily};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use mapper::DependencyMapper;
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use quantity::{parse_quantity, Quantity, QuantityParseError, ResourceList};
pub use reconciler::{
    NodeReconciler, Outcome, PodReconciler, ReconcileContext, Reconciler, NODE_CONTROLLER,
    POD_CONTROLLER,
};
pub use store::{MemoryObjectStore, ObjectStore, PROVISIONER_NAME_LABEL};
pub use tracker::SeriesTracker;
