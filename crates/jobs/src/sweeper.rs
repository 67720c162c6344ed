// crates/jobs/src/sweeper.rs
//! Periodic eviction of old finished jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::registry::JobRegistry;

/// How often to sweep and how old a finished job must be to go.
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub max_age: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Spawn a background loop calling `JobRegistry::cleanup` every
/// `config.interval` until `shutdown` is cancelled.
pub fn spawn_sweeper(
    registry: Arc<JobRegistry>,
    config: SweeperConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("job sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = registry.cleanup(config.max_age);
                    tracing::debug!(evicted, remaining = registry.len(), "job sweep finished");
                }
            }
        }
    })
}
