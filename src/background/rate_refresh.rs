//! Rate Refresher - fixed-interval re-estimation of fill/drain rates
//!
//! Each tick pulls fresh feeds (when a source is attached) and recomputes
//! the rate table. The rate table swap is a single write, so readers are
//! never blocked for longer than one map replace.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingest::SnapshotSource;
use crate::pipeline::Coordinator;

/// Owns the periodic refresh task.
pub struct RateRefresher {
    interval: Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl RateRefresher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Refresher using `rates.refresh_interval_secs` from the coordinator's config.
    pub fn from_config(coordinator: &Coordinator) -> Self {
        Self::new(Duration::from_secs(coordinator.config().rates.refresh_interval_secs))
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the refresh loop. The first refresh runs immediately.
    ///
    /// Calling `start` while running is a no-op.
    pub fn start(&mut self, coordinator: Arc<Coordinator>, source: Option<Arc<dyn SnapshotSource>>) {
        if self.is_running() {
            warn!("[RateRefresher] Already running, ignoring start");
            return;
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        let cancel = self.cancel.clone();
        let period = self.interval;
        info!(interval_secs = period.as_secs_f64(), "[RateRefresher] Task starting");

        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cycles = 0u64;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(cycles, "[RateRefresher] Received shutdown signal");
                        return cycles;
                    }
                    _ = interval.tick() => {
                        let updated = match &source {
                            Some(src) => {
                                let report = coordinator.refresh_from_source(src.as_ref(), Utc::now()).await;
                                let stale = report.feeds.values().filter(|o| !o.is_updated()).count();
                                if stale > 0 {
                                    warn!(stale_feeds = stale, "[RateRefresher] Refreshed with stale feeds");
                                }
                                report.rates_updated
                            }
                            None => coordinator.refresh_rates().await,
                        };
                        cycles += 1;
                        debug!(cycle = cycles, rates_updated = updated, "[RateRefresher] Rates refreshed");
                    }
                }
            }
        }));
    }

    /// Cancel the loop and wait for it to exit. Returns the number of
    /// completed refresh cycles, or `None` if it was not running.
    pub async fn stop(&mut self) -> Option<u64> {
        self.cancel.cancel();
        let handle = self.handle.take()?;
        match handle.await {
            Ok(cycles) => Some(cycles),
            Err(e) => {
                warn!(error = %e, "[RateRefresher] Task ended abnormally");
                None
            }
        }
    }

    /// Token that fires when the refresher is stopped.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for RateRefresher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
