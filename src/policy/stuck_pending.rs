//! Reclaims rows whose provisioning never finished.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::domain::{Server, ServerId, ServerStatus};
use crate::future::BoxFuture;
use crate::lifecycle::{LifecycleError, TerminationReason, UserError};
use crate::settle::{AggregateError, settle_all};

use super::{PolicyDeps, PolicyError, PolicySettings, ReconciliationJob};

/// What one run of [`StuckPendingReaper`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PendingSweep {
    /// Servers whose cloud resources were deleted.
    pub terminated: Vec<ServerId>,
    /// Servers whose cloud resources were already gone; only the row was
    /// removed.
    pub discarded: Vec<ServerId>,
}

enum Outcome {
    Terminated(ServerId),
    Discarded(ServerId),
    Vanished,
}

/// Stuck-provisioning job.
#[derive(Clone, Debug)]
pub struct StuckPendingReaper {
    deps: PolicyDeps,
    settings: PolicySettings,
}

impl StuckPendingReaper {
    /// Creates the job.
    #[must_use]
    pub const fn new(deps: PolicyDeps, settings: PolicySettings) -> Self {
        Self { deps, settings }
    }

    /// Runs the job as if the clock read `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Repository`] when the rows cannot be loaded and
    /// [`PolicyError::Aggregate`] when any deletion failed for a reason other
    /// than missing cloud resources.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<PendingSweep, PolicyError> {
        let grace = Duration::minutes(i64::from(self.settings.pending_grace_minutes));
        let pending = self
            .deps
            .lifecycle
            .deps()
            .store
            .servers(Some(ServerStatus::Pending))
            .await?;
        let stuck: Vec<Server> = pending
            .into_iter()
            .filter(|server| now - server.created_at >= grace)
            .collect();

        let settled = settle_all(stuck.iter().map(|server| self.reclaim(server))).await;
        let mut sweep = PendingSweep::default();
        for outcome in settled.succeeded {
            match outcome {
                Outcome::Terminated(id) => sweep.terminated.push(id),
                Outcome::Discarded(id) => sweep.discarded.push(id),
                Outcome::Vanished => {}
            }
        }
        AggregateError::from_errors("terminating pending servers", settled.failed)
            .map_or(Ok(sweep), |err| Err(err.into()))
    }

    async fn reclaim(&self, server: &Server) -> Result<Outcome, String> {
        let server_id = &server.server_id;
        let minutes = self.settings.pending_grace_minutes;
        let reason = TerminationReason::StuckPending { minutes };
        info!(server_id = %server_id, minutes, "server stuck in pending; terminating");

        let outcome = match self.deps.lifecycle.terminate(server_id, reason).await {
            Ok(()) => Outcome::Terminated(server_id.clone()),
            Err(LifecycleError::User(UserError::NotFound)) => return Ok(Outcome::Vanished),
            Err(err) if err.is_backend_not_found() => {
                self.deps
                    .lifecycle
                    .discard_record(server_id, reason)
                    .await
                    .map_err(|discard| format!("{server_id}: {discard}"))?;
                Outcome::Discarded(server_id.clone())
            }
            Err(err) => return Err(format!("{server_id}: {err}")),
        };

        let message = format!(
            "Your server {server_id} was terminated after being stuck in pending for over {minutes} minutes."
        );
        if let Err(err) = self
            .deps
            .notifier
            .direct_message(&server.created_by, &message)
            .await
        {
            warn!(server_id = %server_id, error = %err, "failed to notify owner");
        }
        Ok(outcome)
    }
}

impl ReconciliationJob for StuckPendingReaper {
    fn name(&self) -> &'static str {
        "stuck-pending-reaper"
    }

    fn run(&self) -> BoxFuture<'_, (), PolicyError> {
        Box::pin(async move {
            let sweep = self.run_at(Utc::now()).await?;
            info!(
                terminated = sweep.terminated.len(),
                discarded = sweep.discarded.len(),
                "stuck-pending sweep finished"
            );
            Ok(())
        })
    }
}
