//! BDD step definitions for the fleet reapers.

use std::future::Future;

use chrono::{Duration, Utc};
use quickserver::test_support::{at_console, server_row, status_reply};
use quickserver::{
    CreditExhaustionReaper, EmptyServerReaper, PolicyError, PolicySettings, ServerActivity,
    ServerId, ServerStatus, StuckPendingReaper,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{FAST_RETRY, ReaperContext, owner_of};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Sweep(#[from] PolicyError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

/// Runs a sweep, then waits for the deletions it queued.
fn sweep<T>(
    reaper_context: &ReaperContext,
    run: impl Future<Output = Result<T, PolicyError>>,
) -> Result<(), StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let queue = reaper_context.fleet.queue.clone();
    runtime.block_on(async move {
        run.await?;
        queue.drain().await;
        Ok::<(), StepError>(())
    })
}

#[given("a ready server \"{server_id}\" that has been empty for {minutes} minutes")]
fn idle_server(reaper_context: ReaperContext, server_id: String, minutes: i64) -> ReaperContext {
    let now = Utc::now();
    let fleet = &reaper_context.fleet;
    let row = server_row(&server_id, &owner_of(&server_id), ServerStatus::Ready, 60, now);
    fleet.store.insert_server(at_console(row, &server_id));
    fleet.store.insert_activity(ServerActivity {
        empty_since: Some(now - Duration::minutes(minutes)),
        ..ServerActivity::unchecked(ServerId::from(server_id.as_str()))
    });
    fleet
        .console
        .set_reply(&server_id, Ok(status_reply(0, true)));
    reaper_context
}

#[given("server \"{server_id}\" reports {players} players")]
fn server_with_players(
    reaper_context: ReaperContext,
    server_id: String,
    players: u32,
) -> ReaperContext {
    reaper_context
        .fleet
        .console
        .set_reply(&server_id, Ok(status_reply(players, true)));
    reaper_context
}

#[given("a pending server \"{server_id}\" created {minutes} minutes ago")]
fn pending_server(reaper_context: ReaperContext, server_id: String, minutes: i64) -> ReaperContext {
    reaper_context.fleet.store.insert_server(server_row(
        &server_id,
        &owner_of(&server_id),
        ServerStatus::Pending,
        minutes,
        Utc::now(),
    ));
    reaper_context
}

#[given("a ready server \"{server_id}\" whose owner has {balance} credits")]
fn unpaid_server(reaper_context: ReaperContext, server_id: String, balance: i64) -> ReaperContext {
    let owner = owner_of(&server_id);
    let row = server_row(&server_id, &owner, ServerStatus::Ready, 30, Utc::now());
    reaper_context
        .fleet
        .store
        .insert_server(at_console(row, &server_id));
    reaper_context.fleet.credits.set_balance(&owner, balance);
    reaper_context
}

#[when("the empty-server sweep runs")]
fn empty_sweep(reaper_context: ReaperContext) -> Result<ReaperContext, StepError> {
    let reaper = EmptyServerReaper::new(
        reaper_context.fleet.policy_deps(),
        PolicySettings::default(),
    )
    .with_retry(FAST_RETRY);
    sweep(&reaper_context, async move { reaper.run_at(Utc::now()).await })?;
    Ok(reaper_context)
}

#[when("the stuck-pending sweep runs")]
fn stuck_sweep(reaper_context: ReaperContext) -> Result<ReaperContext, StepError> {
    let reaper = StuckPendingReaper::new(
        reaper_context.fleet.policy_deps(),
        PolicySettings::default(),
    );
    sweep(&reaper_context, async move { reaper.run_at(Utc::now()).await })?;
    Ok(reaper_context)
}

#[when("the credit sweep runs")]
fn credit_sweep(reaper_context: ReaperContext) -> Result<ReaperContext, StepError> {
    let reaper = CreditExhaustionReaper::new(
        reaper_context.fleet.policy_deps(),
        PolicySettings::default(),
    );
    sweep(&reaper_context, async move { reaper.run_once().await })?;
    Ok(reaper_context)
}

#[then("server \"{server_id}\" is deleted")]
fn server_deleted(reaper_context: &ReaperContext, server_id: String) -> Result<(), StepError> {
    let id = ServerId::from(server_id.as_str());
    let fleet = &reaper_context.fleet;
    if fleet.store.server(&id).is_some() {
        return Err(StepError::Assertion(format!("{server_id} is still stored")));
    }
    if fleet.orchestrator.deletions().contains(&id) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "backend deletion of {server_id} was not requested"
        )))
    }
}

#[then("server \"{server_id}\" is kept")]
fn server_kept(reaper_context: &ReaperContext, server_id: String) -> Result<(), StepError> {
    let id = ServerId::from(server_id.as_str());
    match reaper_context.fleet.store.server(&id) {
        Some(server) if server.status == ServerStatus::Ready => Ok(()),
        Some(server) => Err(StepError::Assertion(format!(
            "{server_id} moved to {}",
            server.status.as_str()
        ))),
        None => Err(StepError::Assertion(format!("{server_id} was removed"))),
    }
}

#[then("the owner was told \"{text}\"")]
fn owner_told(reaper_context: &ReaperContext, text: String) -> Result<(), StepError> {
    let messages = reaper_context.fleet.notifier.messages();
    if messages.iter().any(|(_, message)| *message == text) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected a direct message {text:?}, got {messages:?}"
        )))
    }
}

#[then("the audit trail mentions \"{text}\"")]
fn audit_mentions(reaper_context: &ReaperContext, text: String) -> Result<(), StepError> {
    let messages = reaper_context.fleet.audit.messages();
    if messages.iter().any(|message| message.contains(&text)) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected an audit entry containing {text:?}, got {messages:?}"
        )))
    }
}
