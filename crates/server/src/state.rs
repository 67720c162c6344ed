// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jobtrack_jobs::{Executor, JobRegistry};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job records, shared with the executor and the sweeper.
    pub registry: Arc<JobRegistry>,
    /// Launches background jobs against `registry`.
    pub executor: Executor,
    /// Default age for `POST /api/jobs/cleanup` when none is given.
    pub max_age: Duration,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(executor: Executor, max_age: Duration) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            registry: Arc::clone(executor.registry()),
            executor,
            max_age,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_shares_executor_registry() {
        let registry = Arc::new(JobRegistry::new());
        let state = AppState::new(Executor::new(Arc::clone(&registry)), Duration::from_secs(60));

        assert!(Arc::ptr_eq(&state.registry, &registry));
        assert!(state.uptime_secs() < 5);
    }
}
