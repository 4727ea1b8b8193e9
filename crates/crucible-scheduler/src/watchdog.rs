//! Stale claim watchdog.
//!
//! Reports queue items claimed longer than a threshold without a terminal
//! status. It never requeues or cancels anything.

use chrono::Utc;
use crucible_core::Result;
use crucible_core::ports::QueueStore;
use crucible_core::run::QueueItem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

pub struct StaleClaimWatchdog {
    queue: Arc<dyn QueueStore>,
    threshold: Duration,
}

impl StaleClaimWatchdog {
    pub fn new(queue: Arc<dyn QueueStore>, threshold: Duration) -> Self {
        Self { queue, threshold }
    }

    /// List stale claims and log each one.
    pub async fn scan(&self) -> Result<Vec<QueueItem>> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(self.threshold.as_secs() as i64);
        let stale = self.queue.stale_claims(cutoff).await?;

        for item in &stale {
            let age = item
                .started_at
                .map(|at| (now - at).num_seconds())
                .unwrap_or_default();
            warn!(
                run_id = %item.run.id,
                run = %item.run.name,
                queue = %item.queue_name,
                worker = item.running_on.as_deref().unwrap_or_default(),
                age_secs = age,
                "Stale queue claim"
            );
        }
        Ok(stale)
    }

    /// Scan on an interval until shutdown.
    pub async fn run(&self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(every);

        info!(
            threshold_secs = self.threshold.as_secs(),
            interval_secs = every.as_secs(),
            "Starting stale claim watchdog"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        error!(error = %e, "Stale claim scan failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Stale claim watchdog shutting down");
                        break;
                    }
                }
            }
        }
    }
}
