//! Terminates servers that reached the maximum run time.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::info;

use crate::domain::{Server, ServerId};
use crate::future::BoxFuture;
use crate::lifecycle::{LifecycleError, TerminationReason, UserError};
use crate::settle::{AggregateError, settle_all};

use super::{PolicyDeps, PolicyError, PolicySettings, ReconciliationJob, live};

/// What one run of [`LongRunningReaper`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LongRunningSweep {
    /// Servers warned during this run.
    pub warned: Vec<ServerId>,
    /// Servers terminated during this run.
    pub terminated: Vec<ServerId>,
}

/// Maximum-duration job.
///
/// Servers in their final hour are warned once; servers past the limit are
/// told they are being terminated and are then deleted.
#[derive(Debug)]
pub struct LongRunningReaper {
    deps: PolicyDeps,
    settings: PolicySettings,
    warned: Mutex<HashSet<ServerId>>,
}

impl LongRunningReaper {
    /// Creates the job.
    #[must_use]
    pub fn new(deps: PolicyDeps, settings: PolicySettings) -> Self {
        Self {
            deps,
            settings,
            warned: Mutex::new(HashSet::new()),
        }
    }

    fn warning_message(&self) -> String {
        format!(
            "The server has been running for too long and will be automatically terminated when it reaches {} hours",
            self.settings.max_runtime_hours
        )
    }

    /// Runs the job as if the clock read `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Repository`] when the servers cannot be loaded
    /// and [`PolicyError::Aggregate`] when any termination failed.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<LongRunningSweep, PolicyError> {
        let limit = Duration::hours(i64::from(self.settings.max_runtime_hours));
        let warn_from = limit - Duration::hours(1);
        let servers = live(self.deps.lifecycle.deps().store.servers(None).await?);

        let (expired, running): (Vec<Server>, Vec<Server>) = servers
            .into_iter()
            .partition(|server| now - server.created_at >= limit);
        let due_warning: Vec<Server> = running
            .into_iter()
            .filter(|server| now - server.created_at > warn_from)
            .collect();

        let warned = self.warn(&due_warning).await;

        let settled = settle_all(expired.iter().map(|server| self.terminate(server))).await;
        let terminated = settled.succeeded.into_iter().flatten().collect();
        AggregateError::from_errors("terminating long-running servers", settled.failed)
            .map_or(Ok(LongRunningSweep { warned, terminated }), |err| Err(err.into()))
    }

    async fn warn(&self, due: &[Server]) -> Vec<ServerId> {
        let fresh: Vec<&Server> = {
            let mut warned = self.warned.lock();
            warned.retain(|id| due.iter().any(|server| &server.server_id == id));
            due.iter()
                .filter(|server| warned.insert(server.server_id.clone()))
                .collect()
        };
        let text = self.warning_message();
        let message = text.as_str();
        join_all(fresh.iter().map(|server| async move {
            self.deps
                .broadcaster
                .say_best_effort(&server.server_id, server.connection.as_ref(), message)
                .await;
            server.server_id.clone()
        }))
        .await
    }

    async fn terminate(&self, server: &Server) -> Result<Option<ServerId>, String> {
        let server_id = &server.server_id;
        info!(server_id = %server_id, "server exceeded maximum run time");
        self.deps
            .broadcaster
            .say_best_effort(
                server_id,
                server.connection.as_ref(),
                "The server has been running for too long and is now being terminated.",
            )
            .await;
        let reason = TerminationReason::MaxRuntime {
            hours: self.settings.max_runtime_hours,
        };
        match self.deps.lifecycle.terminate(server_id, reason).await {
            Ok(()) => Ok(Some(server_id.clone())),
            Err(LifecycleError::User(UserError::NotFound)) => Ok(None),
            Err(err) => Err(format!("{server_id}: {err}")),
        }
    }
}

impl ReconciliationJob for LongRunningReaper {
    fn name(&self) -> &'static str {
        "long-running-reaper"
    }

    fn run(&self) -> BoxFuture<'_, (), PolicyError> {
        Box::pin(async move {
            let sweep = self.run_at(Utc::now()).await?;
            info!(
                warned = sweep.warned.len(),
                terminated = sweep.terminated.len(),
                "long-running sweep finished"
            );
            Ok(())
        })
    }
}
