//! Periodic liveness sweep over competitor systems.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CompetitionConfig;
use crate::dispatch::Dispatcher;
use crate::runner::TaskRunner;

/// Launch a status job for every tasked team each `interval` until `stop`
/// fires. A zero interval disables the loop.
pub fn start(
    runner: &TaskRunner,
    dispatcher: Arc<Dispatcher>,
    competition: CompetitionConfig,
    interval: Duration,
    stop: CancellationToken,
) {
    if interval.is_zero() {
        info!("status checks disabled");
        return;
    }
    runner.run("status-check", async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let targets = competition.tasked_targets();
                    if targets.is_empty() {
                        debug!("no tasked teams to check");
                        continue;
                    }
                    if let Err(e) = dispatcher
                        .status_check(&competition.current_round_id, &targets)
                        .await
                    {
                        warn!(error = %e, "failed to launch status check");
                    }
                }
            }
        }
        Ok::<(), Infallible>(())
    });
}
