//! Credit metering and the reaper for owners who ran out of credits.

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;
use tracing::info;

use crate::domain::{Server, ServerId};
use crate::future::BoxFuture;
use crate::lifecycle::{LifecycleError, TerminationReason, UserError};
use crate::settle::{AggregateError, settle_all};

use super::{PolicyDeps, PolicyError, PolicySettings, ReconciliationJob, live};

/// What one run of [`CreditExhaustionReaper`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreditSweep {
    /// Servers whose owner was warned about a low balance.
    pub warned: Vec<ServerId>,
    /// Servers terminated for lack of credits.
    pub terminated: Vec<ServerId>,
}

/// Terminates servers whose owner has no credits left.
///
/// Owners at or below the low-credit threshold see a warning on their
/// server; at zero or below the server is also terminated.
#[derive(Clone, Debug)]
pub struct CreditExhaustionReaper {
    deps: PolicyDeps,
    settings: PolicySettings,
}

impl CreditExhaustionReaper {
    /// Creates the job.
    #[must_use]
    pub const fn new(deps: PolicyDeps, settings: PolicySettings) -> Self {
        Self { deps, settings }
    }

    /// Runs the job once.
    ///
    /// A missing balance counts as zero.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Repository`] when the servers cannot be loaded
    /// and [`PolicyError::Aggregate`] when any balance lookup or termination
    /// failed.
    pub async fn run_once(&self) -> Result<CreditSweep, PolicyError> {
        let store = &self.deps.lifecycle.deps().store;
        let servers = live(store.servers(None).await?);
        let mut failures = Vec::new();

        let balances = self.balances(&servers, &mut failures).await;
        let low: Vec<(&Server, i64)> = servers
            .iter()
            .filter_map(|server| {
                balances
                    .get(server.created_by.as_str())
                    .copied()
                    .filter(|credits| *credits <= self.settings.low_credit_threshold)
                    .map(|credits| (server, credits))
            })
            .collect();

        let mut sweep = CreditSweep {
            warned: self.warn(&low).await,
            ..CreditSweep::default()
        };

        let exhausted = low
            .iter()
            .filter(|(_, credits)| *credits <= 0)
            .map(|(server, _)| self.terminate(server));
        let settled = settle_all(exhausted).await;
        sweep.terminated = settled.succeeded.into_iter().flatten().collect();
        failures.extend(settled.failed);

        AggregateError::from_errors("terminating servers without credits", failures)
            .map_or(Ok(sweep), |err| Err(err.into()))
    }

    async fn warn(&self, low: &[(&Server, i64)]) -> Vec<ServerId> {
        join_all(low.iter().map(|(server, credits)| async move {
            let message = format!(
                "You have only {credits} credits left. The server will be terminated if you run out of credits."
            );
            self.deps
                .broadcaster
                .say_best_effort(&server.server_id, server.connection.as_ref(), &message)
                .await;
            server.server_id.clone()
        }))
        .await
    }

    async fn balances<'a>(
        &self,
        servers: &'a [Server],
        failures: &mut Vec<String>,
    ) -> HashMap<&'a str, i64> {
        let mut owners: Vec<&str> = servers
            .iter()
            .map(|server| server.created_by.as_str())
            .collect();
        owners.sort_unstable();
        owners.dedup();

        let credits = &self.deps.lifecycle.deps().credits;
        let settled = settle_all(owners.into_iter().map(|owner| async move {
            credits
                .balance(owner)
                .await
                .map(|balance| (owner, balance.unwrap_or(0)))
                .map_err(|err| format!("balance of {owner}: {err}"))
        }))
        .await;
        failures.extend(settled.failed);
        settled.succeeded.into_iter().collect()
    }

    async fn terminate(&self, server: &Server) -> Result<Option<ServerId>, String> {
        let server_id = &server.server_id;
        info!(server_id = %server_id, owner = %server.created_by, "owner out of credits; terminating");
        self.deps
            .broadcaster
            .say_best_effort(
                server_id,
                server.connection.as_ref(),
                "Your server is being terminated due to lack of credits.",
            )
            .await;
        match self
            .deps
            .lifecycle
            .terminate(server_id, TerminationReason::OutOfCredits)
            .await
        {
            Ok(()) => Ok(Some(server_id.clone())),
            Err(LifecycleError::User(UserError::NotFound)) => Ok(None),
            Err(err) => Err(format!("{server_id}: {err}")),
        }
    }
}

impl ReconciliationJob for CreditExhaustionReaper {
    fn name(&self) -> &'static str {
        "credit-exhaustion-reaper"
    }

    fn run(&self) -> BoxFuture<'_, (), PolicyError> {
        Box::pin(async move {
            let sweep = self.run_once().await?;
            info!(
                warned = sweep.warned.len(),
                terminated = sweep.terminated.len(),
                "credit sweep finished"
            );
            Ok(())
        })
    }
}

/// Charges one credit per server per run.
#[derive(Clone, Debug)]
pub struct CreditMeter {
    deps: PolicyDeps,
}

impl CreditMeter {
    /// Creates the job.
    #[must_use]
    pub const fn new(deps: PolicyDeps) -> Self {
        Self { deps }
    }

    /// Subtracts, from each owner, the number of servers they hold in any
    /// status, and returns the amounts charged.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Repository`] when the servers cannot be loaded
    /// and [`PolicyError::Aggregate`] when any subtraction failed; the
    /// others still apply.
    pub async fn run_once(&self) -> Result<BTreeMap<String, i64>, PolicyError> {
        let deps = self.deps.lifecycle.deps();
        let servers = deps.store.servers(None).await?;
        let mut charges: BTreeMap<String, i64> = BTreeMap::new();
        for server in &servers {
            *charges.entry(server.created_by.clone()).or_insert(0) += 1;
        }

        let credits = &deps.credits;
        let settled = settle_all(charges.iter().map(|(owner, amount)| async move {
            credits
                .subtract(owner, *amount)
                .await
                .map(|balance| {
                    info!(owner = %owner, amount, balance, "credits consumed");
                })
                .map_err(|err| format!("charging {owner}: {err}"))
        }))
        .await;
        AggregateError::from_errors("consuming credits", settled.failed)
            .map_or(Ok(charges), |err| Err(err.into()))
    }
}

impl ReconciliationJob for CreditMeter {
    fn name(&self) -> &'static str {
        "credit-meter"
    }

    fn run(&self) -> BoxFuture<'_, (), PolicyError> {
        Box::pin(async move {
            let charges = self.run_once().await?;
            info!(owners = charges.len(), "credit meter finished");
            Ok(())
        })
    }
}
