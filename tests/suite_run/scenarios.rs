//! BDD scenarios for suite orchestration.

use rstest_bdd_macros::scenario;

use super::test_helpers::{SuiteRunContext, suite_run_context};

#[scenario(
    path = "tests/features/suite_run.feature",
    name = "Passing suite removes its thing"
)]
fn scenario_passing_suite(suite_run_context: SuiteRunContext) {
    drop(suite_run_context);
}

#[scenario(
    path = "tests/features/suite_run.feature",
    name = "Failing suite keeps its thing and exports logs"
)]
fn scenario_failing_suite(suite_run_context: SuiteRunContext) {
    drop(suite_run_context);
}

#[scenario(
    path = "tests/features/suite_run.feature",
    name = "Suite that never finishes times out"
)]
fn scenario_timeout(suite_run_context: SuiteRunContext) {
    drop(suite_run_context);
}

#[scenario(
    path = "tests/features/suite_run.feature",
    name = "Provisioning failure aborts the run"
)]
fn scenario_setup_failure(suite_run_context: SuiteRunContext) {
    drop(suite_run_context);
}

#[scenario(
    path = "tests/features/suite_run.feature",
    name = "Companion that cannot start leaves the verdict to the service"
)]
fn scenario_companion_spawn_failure(suite_run_context: SuiteRunContext) {
    drop(suite_run_context);
}
