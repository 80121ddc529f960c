//! Background work that outlives the request that started it.

use std::future::Future;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info};

#[derive(Debug, thiserror::Error)]
#[error("{0} background task(s) still running after {1:?}")]
pub struct ShutdownTimeout(pub usize, pub Duration);

/// A joinable set of detached tasks.
///
/// Tasks are never cancelled by request teardown; they carry the span that
/// was current when they were started, so their logs keep the request's
/// fields.
#[derive(Clone, Default)]
pub struct TaskRunner {
    tracker: TaskTracker,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work`. Errors are logged; there is nobody left to return them to.
    pub fn run<F, E>(&self, name: &'static str, work: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let span = tracing::info_span!("background", task = name);
        self.tracker.spawn(
            async move {
                if let Err(e) = work.await {
                    error!(error = %e, "background task failed");
                }
            }
            .instrument(span),
        );
    }

    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Stop accepting work and wait for running tasks, up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownTimeout> {
        self.tracker.close();
        info!(running = self.tracker.len(), "waiting for background tasks");
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .map_err(|_| ShutdownTimeout(self.tracker.len(), timeout))
    }
}
