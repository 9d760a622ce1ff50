//! Unconditional release of the resources a workflow holds

use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::error::Result;
use crate::storage::VectorStore;

/// What the cleanup phase managed to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// `release_collection` returned successfully
    pub released: bool,
    /// `close` returned successfully
    pub closed: bool,
}

/// Result of a workflow run together with its cleanup report
///
/// Cleanup has always run by the time one of these exists.
#[derive(Debug)]
pub struct WorkflowOutcome<T> {
    /// Outcome of the workflow steps
    pub result: Result<T>,
    /// Outcome of the cleanup phase
    pub cleanup: CleanupReport,
}

impl<T> WorkflowOutcome<T> {
    /// Whether the workflow steps succeeded
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Discard the cleanup report
    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

/// Release `collection`, then close the store connection
///
/// Each call is made exactly once. Failures are logged and reported but never
/// propagated, so the caller's own error is the one that surfaces.
pub async fn release_and_close<S>(store: &S, collection: &str) -> CleanupReport
where
    S: VectorStore + ?Sized,
{
    let mut report = CleanupReport::default();

    match store.release_collection(collection).await {
        Ok(()) => {
            info!("Released collection {}", collection);
            report.released = true;
        }
        Err(e) => warn!("Failed to release collection {}: {}", collection, e),
    }

    match store.close().await {
        Ok(()) => {
            info!("Closed store connection");
            report.closed = true;
        }
        Err(e) => warn!("Failed to close store connection: {}", e),
    }

    report
}
