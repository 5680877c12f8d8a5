//! Cancellation and deadlines for one reconciliation pass

use crate::error::ReconcileError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-supplied limits that every I/O call of a reconciliation honors
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ReconcileContext {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    /// Await `fut` unless the context is cancelled or its deadline passes first
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ReconcileError>
    where
        F: Future<Output = T>,
    {
        self.ensure_active()?;

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| ReconcileError::DeadlineExceeded),
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReconcileError::Cancelled),
            result = bounded => result,
        }
    }

    /// Fail if the context is already cancelled or past its deadline
    pub fn ensure_active(&self) -> Result<(), ReconcileError> {
        if self.cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ReconcileError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
