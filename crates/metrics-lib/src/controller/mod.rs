//! Dispatching of dirty keys to the reconcilers
//!
//! Watchers and mappers enqueue [`Request`]s; the [`Dispatcher`] runs them
//! with per-key serialization, coalescing and retry.

mod dispatcher;
mod keyed_lock;


pub use dispatcher::{DispatchConfig, Dispatcher, DispatcherBuilder, Request};
pub use keyed_lock::{KeyedLock, KeyedLockGuard};
