//! Error types for the projection engine

use thiserror::Error;

/// Failure reported by an [`ObjectStore`](crate::store::ObjectStore)
///
/// A missing object is not an error; stores report it as `Ok(None)`.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Transient failure talking to the backing store
    #[error("object store unavailable: {message}")]
    Unavailable { message: String },

    /// The object exists but its contents cannot be interpreted
    #[error("malformed {kind} {name}: {reason}")]
    Malformed {
        kind: &'static str,
        name: String,
        reason: String,
    },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            message: message.into(),
        }
    }
}

/// Why a reconciliation did not complete
///
/// Every variant is retryable. None of them leave partially published
/// series behind.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("fetching {what}: {message}")]
    Fetch { what: String, message: String },

    #[error("projecting {what}: {reason}")]
    Projection { what: String, reason: String },

    #[error("reconciliation cancelled")]
    Cancelled,

    #[error("reconciliation deadline exceeded")]
    DeadlineExceeded,
}

impl ReconcileError {
    /// Classify a store failure encountered while reading `what`
    pub fn from_store(what: impl Into<String>, err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { message } => ReconcileError::Fetch {
                what: what.into(),
                message,
            },
            malformed @ StoreError::Malformed { .. } => ReconcileError::Projection {
                what: what.into(),
                reason: malformed.to_string(),
            },
        }
    }

    /// Short label used for error counters
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Fetch { .. } => "fetch",
            ReconcileError::Projection { .. } => "projection",
            ReconcileError::Cancelled => "cancelled",
            ReconcileError::DeadlineExceeded => "deadline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        let fetch = ReconcileError::from_store("node n1", StoreError::unavailable("timeout"));
        assert_eq!(fetch.reason(), "fetch");
        assert_eq!(fetch.to_string(), "fetching node n1: timeout");

        let projection = ReconcileError::from_store(
            "pod default/web",
            StoreError::Malformed {
                kind: "pod",
                name: "default/web".into(),
                reason: "bad quantity".into(),
            },
        );
        assert_eq!(projection.reason(), "projection");
        assert!(projection.to_string().contains("bad quantity"));
    }
}
