//! BDD scenarios for the fleet reapers.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ReaperContext, reaper_context};

#[scenario(
    path = "tests/features/reapers.feature",
    name = "Reclaim a server nobody has joined"
)]
fn scenario_idle_server(reaper_context: ReaperContext) {
    drop(reaper_context);
}

#[scenario(
    path = "tests/features/reapers.feature",
    name = "Keep a server with players"
)]
fn scenario_busy_server(reaper_context: ReaperContext) {
    drop(reaper_context);
}

#[scenario(
    path = "tests/features/reapers.feature",
    name = "Reclaim a server stuck while provisioning"
)]
fn scenario_stuck_pending(reaper_context: ReaperContext) {
    drop(reaper_context);
}

#[scenario(
    path = "tests/features/reapers.feature",
    name = "Terminate a server whose owner ran out of credits"
)]
fn scenario_out_of_credits(reaper_context: ReaperContext) {
    drop(reaper_context);
}
