//! BDD step definitions for the server lifecycle.

use chrono::Utc;
use quickserver::domain::silent_status_updater;
use quickserver::test_support::server_row;
use quickserver::{
    BackendError, CreateServerRequest, LifecycleError, Region, ServerStatus, VariantName,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{LifecycleContext, PLAYER, PLAYER_ACCOUNT, RequestOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn outcome_of(err: &LifecycleError) -> RequestOutcome {
    err.as_user_error().map_or_else(
        || RequestOutcome::Failed(err.to_string()),
        |user| RequestOutcome::Refused(user.to_string()),
    )
}

#[given("a player with a stored game account")]
fn registered_player(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context
        .fleet
        .users
        .set_account(PLAYER, PLAYER_ACCOUNT);
    lifecycle_context
}

#[given("the player is banned for \"{reason}\"")]
fn banned_player(lifecycle_context: LifecycleContext, reason: String) -> LifecycleContext {
    lifecycle_context.fleet.bans.ban(PLAYER, Some(&reason));
    lifecycle_context
}

#[given("the player already holds a ready server")]
fn existing_server(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context.fleet.store.insert_server(server_row(
        "existing",
        PLAYER,
        ServerStatus::Ready,
        5,
        Utc::now(),
    ));
    lifecycle_context
}

#[given("credits are enforced")]
fn credits_enforced(mut lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context.credits_enabled = true;
    lifecycle_context
}

#[given("the player has {balance} credits")]
fn player_balance(lifecycle_context: LifecycleContext, balance: i64) -> LifecycleContext {
    lifecycle_context.fleet.credits.set_balance(PLAYER, balance);
    lifecycle_context
}

#[given("the next deployment fails")]
fn deployment_fails(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context
        .fleet
        .orchestrator
        .fail_next_deploy(BackendError::Provider {
            message: String::from("instance quota exhausted"),
        });
    lifecycle_context
}

#[when("the player requests a server in \"{region}\"")]
fn request_server(
    mut lifecycle_context: LifecycleContext,
    region: String,
) -> Result<LifecycleContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let lifecycle = lifecycle_context
        .fleet
        .lifecycle(lifecycle_context.credits_enabled);
    let request = CreateServerRequest {
        user_id: String::from(PLAYER),
        region: Region::from(region),
        variant: VariantName::from("standard-competitive"),
        guild_id: Some(String::from("guild-1")),
        status_updater: silent_status_updater(),
    };

    let result = runtime.block_on(async move { lifecycle.create_server_for_user(request).await });
    lifecycle_context.outcome = Some(match result {
        Ok(server) => RequestOutcome::Created(Box::new(server)),
        Err(err) => outcome_of(&err),
    });
    Ok(lifecycle_context)
}

#[when("the player deletes their servers")]
fn delete_servers(mut lifecycle_context: LifecycleContext) -> Result<LifecycleContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let lifecycle = lifecycle_context.fleet.lifecycle(false);

    let result = runtime.block_on(async move { lifecycle.delete_servers_for_user(PLAYER).await });
    lifecycle_context.outcome = Some(match result {
        Ok(deleted) => RequestOutcome::Deleted(deleted),
        Err(err) => outcome_of(&err),
    });
    Ok(lifecycle_context)
}

#[then("the request succeeds")]
fn request_succeeds(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match &lifecycle_context.outcome {
        Some(RequestOutcome::Created(_) | RequestOutcome::Deleted(_)) => Ok(()),
        Some(RequestOutcome::Refused(message) | RequestOutcome::Failed(message)) => Err(
            StepError::Assertion(format!("expected success, got failure: {message}")),
        ),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the request is refused with \"{message}\"")]
fn request_refused(lifecycle_context: &LifecycleContext, message: String) -> Result<(), StepError> {
    match &lifecycle_context.outcome {
        Some(RequestOutcome::Refused(actual)) if *actual == message => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected refusal {message:?}, got {other:?}"
        ))),
    }
}

#[then("the request fails without a player-facing reason")]
fn request_failed(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match &lifecycle_context.outcome {
        Some(RequestOutcome::Failed(_)) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected an internal failure, got {other:?}"
        ))),
    }
}

#[then("the player's server is \"{status}\"")]
fn player_server_status(
    lifecycle_context: &LifecycleContext,
    status: String,
) -> Result<(), StepError> {
    let servers = lifecycle_context.player_servers();
    let [server] = servers.as_slice() else {
        return Err(StepError::Assertion(format!(
            "expected one server, found {}",
            servers.len()
        )));
    };
    if server.status.as_str() == status {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected status {status}, got {}",
            server.status.as_str()
        )))
    }
}

#[then("the player holds no servers")]
fn player_holds_nothing(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let servers = lifecycle_context.player_servers();
    if servers.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no servers, found {}",
            servers.len()
        )))
    }
}

#[then("no deployment was attempted")]
fn no_deployment(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    if lifecycle_context.fleet.orchestrator.deployments().is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "orchestrator.deploy should not be invoked",
        )))
    }
}

#[then("the audit trail mentions \"{text}\"")]
fn audit_mentions(lifecycle_context: &LifecycleContext, text: String) -> Result<(), StepError> {
    let messages = lifecycle_context.fleet.audit.messages();
    if messages.iter().any(|message| message.contains(&text)) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected an audit entry containing {text:?}, got {messages:?}"
        )))
    }
}
