//! Periodic reconciliation jobs that reclaim servers.
//!
//! Every job re-reads the store on each run, skips rows another actor is
//! already deleting, and attempts every candidate before reporting the
//! failures together. Jobs may overlap in time with each other and with
//! user-initiated deletions.

mod credits;
mod empty;
mod long_running;
mod metrics;
mod stuck_pending;

use std::sync::Arc;

use thiserror::Error;

use crate::catalog::{Catalog, DEFAULT_EMPTY_MINUTES};
use crate::console::Broadcaster;
use crate::domain::{Server, ServerStatus, VariantName};
use crate::future::BoxFuture;
use crate::lifecycle::ServerLifecycle;
use crate::probe::HealthProbe;
use crate::queue::BackgroundTaskQueue;
use crate::repository::{Notifier, RepositoryError, ServerStatusMetricsRepository};
use crate::settle::AggregateError;

pub use credits::{CreditExhaustionReaper, CreditMeter, CreditSweep};
pub use empty::{EmptyServerReaper, EmptySweep};
pub use long_running::{LongRunningReaper, LongRunningSweep};
pub use metrics::{MetricsSweep, ServerMetricsCollector};
pub use stuck_pending::{PendingSweep, StuckPendingReaper};

/// Errors returned by reconciliation jobs.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Raised when the candidates cannot be loaded.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Raised after a run in which some candidates failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Thresholds applied by the reapers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PolicySettings {
    /// Idle minutes for variants that do not configure their own.
    pub default_empty_minutes: u32,
    /// Maximum run time; a warning goes out during the final hour.
    pub max_runtime_hours: u32,
    /// Minutes a row may stay `pending` before it is reclaimed.
    pub pending_grace_minutes: u32,
    /// Balance at or below which owners are warned.
    pub low_credit_threshold: i64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            default_empty_minutes: DEFAULT_EMPTY_MINUTES,
            max_runtime_hours: 12,
            pending_grace_minutes: 15,
            low_credit_threshold: 10,
        }
    }
}

/// Collaborators shared by the reapers.
#[derive(Clone)]
pub struct PolicyDeps {
    /// Deletion use cases and the store behind them.
    pub lifecycle: ServerLifecycle,
    /// Variant configuration, for idle thresholds.
    pub catalog: Arc<Catalog>,
    /// Player-count probe.
    pub probe: HealthProbe,
    /// In-game chat broadcasts.
    pub broadcaster: Broadcaster,
    /// Direct messages to owners.
    pub notifier: Arc<dyn Notifier>,
    /// Status samples of ready servers.
    pub metrics: Arc<dyn ServerStatusMetricsRepository>,
    /// Deferred deletions.
    pub queue: BackgroundTaskQueue,
}

impl PolicyDeps {
    fn empty_minutes(
        &self,
        variant: &VariantName,
        guild_id: Option<&str>,
        settings: &PolicySettings,
    ) -> u32 {
        self.catalog
            .variant_for(variant, guild_id)
            .ok()
            .and_then(|config| config.empty_minutes_terminate)
            .unwrap_or(settings.default_empty_minutes)
    }
}

impl std::fmt::Debug for PolicyDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyDeps")
            .field("lifecycle", &self.lifecycle)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

/// A job the scheduler runs periodically.
pub trait ReconciliationJob: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the job once against the current time.
    fn run(&self) -> BoxFuture<'_, (), PolicyError>;
}

/// Rows no other actor is already deleting.
fn live(servers: Vec<Server>) -> Vec<Server> {
    servers
        .into_iter()
        .filter(|server| server.status != ServerStatus::Terminating)
        .collect()
}
