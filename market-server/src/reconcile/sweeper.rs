//! Connection sweeper
//!
//! Dead TCP peers are only discovered on a failed write; a client that
//! connects and never speaks is never written to at all. This worker
//! closes both gaps on a timer.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::message::registry::ConnectionRegistry;

/// Periodic stale-connection eviction
///
/// Registered as `TaskKind::Periodic` in `start_background_tasks()`.
pub struct ConnectionSweeper {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    /// How long a connection may stay unauthenticated
    auth_grace: Duration,
    shutdown: CancellationToken,
}

impl ConnectionSweeper {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        auth_grace: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            interval,
            auth_grace,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            grace_secs = self.auth_grace.as_secs(),
            "Connection sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Connection sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    let removed = self.registry.sweep(self.auth_grace.as_millis() as i64);
                    if removed > 0 {
                        tracing::info!(
                            removed,
                            remaining = self.registry.connection_count(),
                            "Swept stale connections"
                        );
                    }
                }
            }
        }

        tracing::info!("Connection sweeper stopped");
    }
}
