//! Fire-and-forget work owned by a portal.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use liaison_shared::PortalKey;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Background tasks of one portal.
///
/// Failures are logged with `tracing::warn!` and never reach the caller
/// that scheduled the work. Everything still running is aborted when the
/// portal is torn down.
#[derive(Default)]
pub struct BackgroundTasks {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    pub fn spawn<F>(&self, name: &'static str, portal: PortalKey, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match task.await {
                Ok(()) => tracing::debug!(task = name, portal = %portal, "background task finished"),
                Err(e) => tracing::warn!(
                    task = name,
                    portal = %portal,
                    error = %e,
                    "background task failed"
                ),
            }
        });

        let mut handles = self.handles();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait until every task scheduled so far, and any they schedule, has
    /// finished.
    pub async fn wait_idle(&self) {
        loop {
            let drained: Vec<_> = std::mem::take(&mut *self.handles());
            if drained.is_empty() {
                return;
            }
            for handle in drained {
                // Aborted tasks resolve with a cancellation error.
                let _ = handle.await;
            }
        }
    }

    pub fn abort_all(&self) {
        for handle in self.handles().drain(..) {
            handle.abort();
        }
    }

    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}
