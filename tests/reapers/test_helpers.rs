//! Shared fixtures for reaper BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use quickserver::RetryPolicy;
use quickserver::test_support::TestFleet;
use rstest::fixture;

/// Retries short enough for queued deletions to settle within a step.
pub const FAST_RETRY: RetryPolicy = RetryPolicy {
    max_retries: 2,
    initial_delay: Duration::from_millis(5),
    max_delay: Duration::from_millis(20),
    backoff_multiplier: 2,
};

#[derive(Clone)]
pub struct ReaperContext {
    pub fleet: Arc<TestFleet>,
}

impl std::fmt::Debug for ReaperContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaperContext").finish_non_exhaustive()
    }
}

/// Owner recorded for the server with id `server_id`.
pub fn owner_of(server_id: &str) -> String {
    format!("owner-{server_id}")
}

#[fixture]
pub fn reaper_context() -> ReaperContext {
    ReaperContext {
        fleet: Arc::new(TestFleet::new()),
    }
}
