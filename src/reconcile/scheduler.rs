//! Periodic driver for [`ReconcileService`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::service::ReconcileService;

/// Runs the sweep on a fixed interval until cancelled.
///
/// The first sweep starts immediately. A failed sweep is logged and the work
/// it left behind is retried on the next tick.
pub struct ReconcileScheduler {
    service: Arc<ReconcileService>,
    interval: Duration,
}

impl ReconcileScheduler {
    pub fn new(service: Arc<ReconcileService>, interval: Duration) -> Self {
        Self {
            service,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the loop; the handle resolves after `cancel_token` fires.
    pub fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel_token).await })
    }

    pub async fn run(self, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Reconciliation scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    tracing::info!("Reconciliation scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.service.run().await {
                        tracing::error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }
    }
}
