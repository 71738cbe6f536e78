//! Shared fixtures for lifecycle BDD scenarios.

use std::sync::Arc;

use quickserver::test_support::TestFleet;
use quickserver::{Server, ServerId};
use rstest::fixture;

/// Discord-style user id of the player driving every scenario.
pub const PLAYER: &str = "player-1";
/// Game account id stored for [`PLAYER`].
pub const PLAYER_ACCOUNT: &str = "76561197960287930";

#[derive(Clone)]
pub struct LifecycleContext {
    pub fleet: Arc<TestFleet>,
    pub credits_enabled: bool,
    pub outcome: Option<RequestOutcome>,
}

impl std::fmt::Debug for LifecycleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleContext")
            .field("credits_enabled", &self.credits_enabled)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub enum RequestOutcome {
    Created(Box<Server>),
    Deleted(Vec<ServerId>),
    Refused(String),
    Failed(String),
}

impl LifecycleContext {
    /// Rows owned by [`PLAYER`].
    pub fn player_servers(&self) -> Vec<Server> {
        self.fleet
            .store
            .all_servers()
            .into_iter()
            .filter(|server| server.created_by == PLAYER)
            .collect()
    }
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    LifecycleContext {
        fleet: Arc::new(TestFleet::new()),
        credits_enabled: false,
        outcome: None,
    }
}
