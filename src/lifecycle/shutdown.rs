//! Shutdown coordination for the engine loops.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for `handles` to finish, giving up after `deadline`.
///
/// Returns `false` if the deadline passed with tasks still running; those
/// tasks are aborted.
pub async fn join_all(handles: Vec<JoinHandle<()>>, deadline: Duration) -> bool {
    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    match tokio::time::timeout(deadline, futures_util::future::join_all(handles)).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Task panicked during shutdown");
                    }
                }
            }
            true
        }
        Err(_) => {
            tracing::warn!(tasks = aborts.len(), "Shutdown deadline passed, aborting tasks");
            for abort in aborts {
                abort.abort();
            }
            false
        }
    }
}
