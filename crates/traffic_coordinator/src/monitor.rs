//! Health monitor.
//!
//! Sweeps the registry on a fixed period and marks zones whose heartbeat has
//! gone silent as UNHEALTHY.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::CoordinatorState;

#[derive(Debug, Clone)]
pub struct HealthMonitor {
    state: CoordinatorState,
    interval: Duration,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(state: CoordinatorState, interval: Duration) -> Self {
        Self { state, interval }
    }

    /// Sweep every `interval` until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "health monitor started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let newly = self.state.sweep().await;
            for zone in &newly {
                warn!(zone = %zone, "zone missed its heartbeat deadline; marked UNHEALTHY");
            }
            debug!(unhealthy = newly.len(), "sweep complete");
        }

        info!("health monitor stopped");
        Ok(())
    }
}
