//! BDD step definitions for `tether run`.

use rstest_bdd_macros::{given, then, when};
use tether::SuiteOrchestrator;
use tether::api::ApiError;
use tether::report::SuiteResult;
use tether::test_support::FakeOperation;
use tokio::runtime::Runtime;

use super::test_helpers::{
    RunOutcome, SuiteRunContext, SuiteRunTestError, finished_snapshot, running_snapshot,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] SuiteRunTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a qualification harness with one suite")]
fn harness_with_one_suite(suite_run_context: SuiteRunContext) -> SuiteRunContext {
    suite_run_context
}

#[given("the remote suite reports \"{status}\"")]
fn remote_suite_reports(suite_run_context: SuiteRunContext, status: String) -> SuiteRunContext {
    suite_run_context.cloud.push_snapshot(running_snapshot());
    suite_run_context.cloud.push_snapshot(finished_snapshot(&status));
    suite_run_context.cloud.set_log_events(&["connect", "publish timed out"]);
    suite_run_context
}

#[given("the remote suite never finishes")]
fn remote_suite_never_finishes(suite_run_context: SuiteRunContext) -> SuiteRunContext {
    suite_run_context.cloud.push_snapshot(running_snapshot());
    suite_run_context
}

#[given("certificate creation fails")]
fn certificate_creation_fails(suite_run_context: SuiteRunContext) -> SuiteRunContext {
    suite_run_context.cloud.fail_next(
        FakeOperation::CreateCertificate,
        ApiError::Rejected {
            operation: String::from("create-keys-and-certificate"),
            message: String::from("LimitExceeded"),
        },
    );
    suite_run_context
}

#[given("the companion cannot start")]
fn companion_cannot_start(suite_run_context: SuiteRunContext) -> SuiteRunContext {
    suite_run_context.launcher.push_spawn_failure("device-sim: not found");
    suite_run_context
}

#[given("log uploads go to bucket \"{bucket}\"")]
fn log_uploads_go_to_bucket(
    mut suite_run_context: SuiteRunContext,
    bucket: String,
) -> SuiteRunContext {
    suite_run_context.settings.log_bucket = Some(bucket);
    suite_run_context
}

#[when("I run the suites")]
fn run_the_suites(suite_run_context: SuiteRunContext) -> Result<SuiteRunContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = SuiteOrchestrator::new(
        suite_run_context.cloud.clone(),
        suite_run_context.launcher.clone(),
        suite_run_context.settings.clone(),
    );
    let suites = suite_run_context.suites.clone();
    let result = runtime.block_on(async move { orchestrator.run(&suites).await });
    let outcome = match result {
        Ok(summary) => RunOutcome::Completed(summary),
        Err(err) => RunOutcome::Aborted(err.to_string()),
    };

    Ok(SuiteRunContext {
        outcome: Some(outcome),
        ..suite_run_context
    })
}

fn summary(suite_run_context: &SuiteRunContext) -> Result<&tether::RunSummary, StepError> {
    match suite_run_context.outcome {
        Some(RunOutcome::Completed(ref summary)) => Ok(summary),
        Some(RunOutcome::Aborted(ref message)) => Err(StepError::Assertion(format!(
            "expected a completed run, got abort: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("run was not executed"))),
    }
}

#[then("the exit code is \"{code}\"")]
fn exit_code_is(suite_run_context: &SuiteRunContext, code: i32) -> Result<(), StepError> {
    let actual = summary(suite_run_context)?.exit_code();
    if actual == code {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected exit code {code}, got {actual}"
        )))
    }
}

#[then("the companion ran once")]
fn companion_ran_once(suite_run_context: &SuiteRunContext) -> Result<(), StepError> {
    let launches = suite_run_context.launcher.launches().len();
    if launches == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one companion launch, got {launches}"
        )))
    }
}

#[then("the companion never ran")]
fn companion_never_ran(suite_run_context: &SuiteRunContext) -> Result<(), StepError> {
    if suite_run_context.launcher.launches().is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "companion should not launch without a run",
        )))
    }
}

#[then("no test things remain")]
fn no_things_remain(suite_run_context: &SuiteRunContext) -> Result<(), StepError> {
    let cloud = &suite_run_context.cloud;
    if cloud.thing_count() == 0 && cloud.certificate_count() == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected a clean registry, found things {:?} and {} certificate(s)",
            cloud.thing_names(),
            cloud.certificate_count()
        )))
    }
}

#[then("the test thing is retained")]
fn thing_is_retained(suite_run_context: &SuiteRunContext) -> Result<(), StepError> {
    let report = summary(suite_run_context)?
        .suites
        .first()
        .ok_or_else(|| StepError::Assertion(String::from("no suite report")))?;
    let cloud = &suite_run_context.cloud;
    let retained = report
        .thing_name
        .as_deref()
        .is_some_and(|name| cloud.thing_exists(name) && !cloud.principals_of(name).is_empty());
    if retained {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {report} to keep its thing and certificate"
        )))
    }
}

#[then("the suite log was uploaded")]
fn suite_log_uploaded(suite_run_context: &SuiteRunContext) -> Result<(), StepError> {
    let uploads = suite_run_context.cloud.uploads();
    let uploaded = uploads.iter().any(|(local, bucket, key)| {
        bucket == "ci-logs" && key.starts_with("suite-log-tether-bdd-") && !local.exists()
    });
    if uploaded {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one log upload to ci-logs, got {uploads:?}"
        )))
    }
}

#[then("the suite is reported as timed out")]
fn suite_timed_out(suite_run_context: &SuiteRunContext) -> Result<(), StepError> {
    let result = summary(suite_run_context)?
        .suites
        .first()
        .map(|report| report.result.clone());
    match result {
        Some(SuiteResult::TimedOut { cycles: 4 }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a timeout after 4 polls, got {other:?}"
        ))),
    }
}

#[then("the run aborts with a setup error")]
fn run_aborts(suite_run_context: &SuiteRunContext) -> Result<(), StepError> {
    match suite_run_context.outcome {
        Some(RunOutcome::Aborted(ref message)) if message.contains("setup failed") => Ok(()),
        ref other => Err(StepError::Assertion(format!(
            "expected setup failure, got {other:?}"
        ))),
    }
}

#[then("credential files are removed")]
fn credentials_removed(suite_run_context: &SuiteRunContext) -> Result<(), StepError> {
    let workdir = suite_run_context.workdir.path();
    let leftovers: Vec<_> = ["certificate.pem.crt", "private.pem.key"]
        .into_iter()
        .filter(|name| workdir.join(name).exists())
        .collect();
    if leftovers.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "credential files left behind: {leftovers:?}"
        )))
    }
}
