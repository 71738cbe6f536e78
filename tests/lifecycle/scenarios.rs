//! BDD scenarios for the server lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Provision a server for a registered player"
)]
fn scenario_provision(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Refuse a banned player"
)]
fn scenario_banned(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Refuse a player who already holds a server"
)]
fn scenario_existing_server(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Refuse a player without credits"
)]
fn scenario_no_credits(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Keep the pending row when the deployment fails"
)]
fn scenario_deploy_failure(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Delete every server of a player"
)]
fn scenario_delete_all(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}
