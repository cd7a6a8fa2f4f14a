//! Background liveness monitor.
//!
//! A single tokio task that periodically sweeps the registry and demotes
//! agents whose heartbeat lapsed. Demotion releases held locks and fires
//! lifecycle notifications through the same path a disconnect takes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::hub::Coordinator;

/// Handle to the running sweep task.
pub struct LivenessMonitor {
    handle: JoinHandle<()>,
}

impl LivenessMonitor {
    /// Spawn the sweep loop against a shared coordinator.
    pub fn spawn(hub: Arc<Coordinator>) -> Self {
        let interval = Duration::from_secs(hub.config().sweep_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh hub
            // does not sweep before anyone has had a chance to heartbeat.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let demoted = hub.sweep_stale_agents().await;
                if demoted > 0 {
                    tracing::info!(demoted, "liveness sweep demoted stale agents");
                }
            }
        });
        Self { handle }
    }

    /// Stop the sweep loop.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
