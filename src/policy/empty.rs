//! Reclaims servers that stayed empty past their variant's idle threshold.
//!
//! A probe failure counts as an empty observation: an unreachable server is
//! more likely broken than busy, and leaving it running costs money.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::domain::{Server, ServerActivity, ServerId, ServerStatus};
use crate::future::BoxFuture;
use crate::queue::{DELETE_SERVER_TASK, DeleteServerTask, QueueError, RetryPolicy, TaskCallbacks};
use crate::repository::RepositoryError;
use crate::settle::{AggregateError, settle_all};

use super::{PolicyDeps, PolicyError, PolicySettings, ReconciliationJob};

/// What one run of [`EmptyServerReaper`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EmptySweep {
    /// Servers handed to the queue for deletion.
    pub enqueued: Vec<ServerId>,
    /// Servers probed this run.
    pub probed: usize,
    /// Servers whose empty period started this run.
    pub marked_empty: usize,
    /// Servers whose empty period ended this run.
    pub cleared: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Observation {
    Players(u32),
    Unreachable,
}

struct Candidate {
    server: Server,
    activity: ServerActivity,
}

/// Idle-server job.
#[derive(Clone, Debug)]
pub struct EmptyServerReaper {
    deps: PolicyDeps,
    settings: PolicySettings,
    retry: RetryPolicy,
}

impl EmptyServerReaper {
    /// Creates the job with the standard deletion retry policy.
    #[must_use]
    pub const fn new(deps: PolicyDeps, settings: PolicySettings) -> Self {
        Self {
            deps,
            settings,
            retry: RetryPolicy::deletion(),
        }
    }

    /// Overrides the retry policy of queued deletions.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs the job as if the clock read `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Repository`] when the candidates cannot be
    /// loaded and [`PolicyError::Aggregate`] when any enqueue or activity
    /// write failed; every probe is attempted first.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<EmptySweep, PolicyError> {
        let candidates = self.load().await?;
        let mut sweep = EmptySweep::default();
        let mut failures = Vec::new();
        let mut remaining = Vec::new();

        for candidate in candidates {
            let minutes = self.deps.empty_minutes(
                &candidate.server.variant,
                candidate.server.guild_id.as_deref(),
                &self.settings,
            );
            let idle = candidate
                .activity
                .empty_since
                .is_some_and(|since| now - since >= Duration::minutes(i64::from(minutes)));
            if !idle {
                remaining.push(candidate);
                continue;
            }
            let server_id = candidate.server.server_id;
            info!(server_id = %server_id, minutes, "server idle past threshold; scheduling deletion");
            match self.enqueue_delete(&server_id) {
                Ok(()) => sweep.enqueued.push(server_id),
                Err(err) => failures.push(format!("{server_id}: {err}")),
            }
        }

        sweep.probed = remaining.len();
        let settled = settle_all(
            remaining
                .into_iter()
                .map(|candidate| self.observe_and_record(candidate, now)),
        )
        .await;
        for change in &settled.succeeded {
            match change {
                Change::MarkedEmpty => sweep.marked_empty += 1,
                Change::Cleared => sweep.cleared += 1,
                Change::Unchanged => {}
            }
        }
        failures.extend(settled.failed);

        AggregateError::from_errors("recording server activity", failures)
            .map_or(Ok(sweep), |err| Err(err.into()))
    }

    async fn load(&self) -> Result<Vec<Candidate>, RepositoryError> {
        let mut tx = self.deps.lifecycle.deps().store.begin().await?;
        let servers = tx.servers(Some(ServerStatus::Ready)).await?;
        let mut activities: HashMap<ServerId, ServerActivity> = tx
            .activities()
            .await?
            .into_iter()
            .map(|activity| (activity.server_id.clone(), activity))
            .collect();
        tx.commit().await?;

        Ok(servers
            .into_iter()
            .map(|server| {
                let activity = activities
                    .remove(&server.server_id)
                    .unwrap_or_else(|| ServerActivity::unchecked(server.server_id.clone()));
                Candidate { server, activity }
            })
            .collect())
    }

    fn enqueue_delete(&self, server_id: &ServerId) -> Result<(), QueueError> {
        let payload = serde_json::to_value(DeleteServerTask {
            server_id: server_id.clone(),
        })
        .map_err(|err| QueueError::InvalidPayload {
            kind: String::from(DELETE_SERVER_TASK),
            message: err.to_string(),
        })?;
        let failed_id = server_id.clone();
        let callbacks = TaskCallbacks::on_error(move |err| {
            error!(server_id = %failed_id, error = %err, "deferred deletion of idle server failed");
        });
        self.deps
            .queue
            .enqueue(DELETE_SERVER_TASK, payload, callbacks, self.retry)
            .map(|_| ())
    }

    async fn observe(&self, server: &Server) -> Observation {
        let Some(connection) = &server.connection else {
            warn!(server_id = %server.server_id, "ready server has no console address");
            return Observation::Unreachable;
        };
        match self
            .deps
            .probe
            .status(
                &connection.rcon_address,
                &connection.credentials.rcon_password,
            )
            .await
        {
            Ok(report) => Observation::Players(report.players),
            Err(err) => {
                warn!(server_id = %server.server_id, error = %err, "status probe failed; treating server as empty");
                Observation::Unreachable
            }
        }
    }

    async fn observe_and_record(
        &self,
        candidate: Candidate,
        now: DateTime<Utc>,
    ) -> Result<Change, String> {
        let Candidate {
            server,
            mut activity,
        } = candidate;
        let observation = self.observe(&server).await;
        let change = apply(&mut activity, observation, now);
        if change == Change::MarkedEmpty {
            info!(server_id = %server.server_id, "server is empty");
        }
        if change == Change::Cleared {
            info!(server_id = %server.server_id, "server is no longer empty");
        }
        self.record(&activity)
            .await
            .map(|()| change)
            .map_err(|err| {
                error!(server_id = %server.server_id, error = %err, "failed to record server activity");
                format!("{}: {err}", server.server_id)
            })
    }

    async fn record(&self, activity: &ServerActivity) -> Result<(), RepositoryError> {
        let mut tx = self.deps.lifecycle.deps().store.begin().await?;
        if tx.find_server(&activity.server_id).await?.is_none() {
            info!(server_id = %activity.server_id, "server no longer exists; skipping activity update");
            return Ok(());
        }
        tx.upsert_activity(activity).await?;
        tx.commit().await
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Change {
    MarkedEmpty,
    Cleared,
    Unchanged,
}

fn apply(activity: &mut ServerActivity, observation: Observation, now: DateTime<Utc>) -> Change {
    activity.last_checked_at = Some(now);
    match observation {
        Observation::Players(0) | Observation::Unreachable if activity.empty_since.is_none() => {
            activity.empty_since = Some(now);
            Change::MarkedEmpty
        }
        Observation::Players(count) if count > 0 && activity.empty_since.is_some() => {
            activity.empty_since = None;
            Change::Cleared
        }
        _ => Change::Unchanged,
    }
}

impl ReconciliationJob for EmptyServerReaper {
    fn name(&self) -> &'static str {
        "empty-server-reaper"
    }

    fn run(&self) -> BoxFuture<'_, (), PolicyError> {
        Box::pin(async move {
            let sweep = self.run_at(Utc::now()).await?;
            info!(
                enqueued = sweep.enqueued.len(),
                probed = sweep.probed,
                marked_empty = sweep.marked_empty,
                cleared = sweep.cleared,
                "empty-server sweep finished"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fresh() -> ServerActivity {
        ServerActivity::unchecked(ServerId::from("srv"))
    }

    #[rstest]
    #[case(Observation::Players(0), true)]
    #[case(Observation::Unreachable, true)]
    #[case(Observation::Players(3), false)]
    fn first_observation(#[case] observation: Observation, #[case] empty: bool) {
        let now = Utc::now();
        let mut activity = fresh();
        apply(&mut activity, observation, now);
        assert_eq!(activity.empty_since.is_some(), empty);
        assert_eq!(activity.last_checked_at, Some(now));
    }

    #[rstest]
    fn empty_period_keeps_its_start() {
        let start = Utc::now() - Duration::minutes(4);
        let mut activity = ServerActivity {
            empty_since: Some(start),
            ..fresh()
        };
        let change = apply(&mut activity, Observation::Players(0), Utc::now());
        assert_eq!(change, Change::Unchanged);
        assert_eq!(activity.empty_since, Some(start));
    }

    #[rstest]
    fn players_clear_the_empty_period() {
        let mut activity = ServerActivity {
            empty_since: Some(Utc::now()),
            ..fresh()
        };
        let change = apply(&mut activity, Observation::Players(1), Utc::now());
        assert_eq!(change, Change::Cleared);
        assert_eq!(activity.empty_since, None);
    }
}
