//! Process wiring for the resource metrics exporter
//!
//! Connects the projection engine to a live cluster: a kube-backed object
//! store, watch streams that enqueue dirty keys, and the HTTP endpoints.

pub mod api;
pub mod config;
pub mod kube_store;
pub mod watch;
