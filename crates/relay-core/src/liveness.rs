//! Two independent periodic background tasks: a ping broadcaster and an
//! idle-connection sweeper. Both run for the lifetime of the process and
//! are aborted together on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

use crate::config::IDLE_SWEEP_PERIOD;
use crate::registry::Registry;

/// Holds the join handles for the two background loops so the caller can
/// abort them on shutdown.
pub struct LivenessMonitor {
    ping_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
}

impl LivenessMonitor {
    /// Spawns the ping loop (every `ping_interval`) and the idle sweep loop
    /// (every [`IDLE_SWEEP_PERIOD`], fixed) against `registry`.
    pub fn spawn(registry: Arc<Registry>, ping_interval: Duration, connection_timeout: Duration) -> Self {
        let ping_registry = registry.clone();
        let ping_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                ping_registry.ping_all_connected().await;
            }
        });

        let sweep_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_SWEEP_PERIOD);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.sweep_idle(connection_timeout).await;
            }
        });

        Self { ping_task, sweep_task }
    }

    /// Aborts both background loops. Errors joining an already-finished
    /// task are logged, never propagated — shutdown must proceed regardless.
    pub async fn shutdown(self) {
        self.ping_task.abort();
        self.sweep_task.abort();
        if let Err(err) = self.ping_task.await {
            if !err.is_cancelled() {
                error!(%err, "ping task exited abnormally");
            }
        }
        if let Err(err) = self.sweep_task.await {
            if !err.is_cancelled() {
                error!(%err, "idle sweep task exited abnormally");
            }
        }
    }
}
