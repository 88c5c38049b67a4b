//! Integration tests for multi-suite orchestration.

use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use tether::api::{ApiError, RunStatus, SuiteRunSnapshot};
use tether::report::SuiteResult;
use tether::suite::{CompanionSpec, SuiteDefinition};
use tether::test_support::{FakeCloud, FakeOperation, ScriptedLauncher};
use tether::{PollPolicy, RunSettings, SuiteFile, SuiteOrchestrator};

struct Workspace {
    _tmp: TempDir,
    settings: RunSettings,
}

#[fixture]
fn workspace() -> Workspace {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path not UTF-8: {}", path.display()));
    Workspace {
        settings: RunSettings {
            policy_name: String::from("qualification"),
            thing_group: None,
            thing_name_prefix: String::from("tether-it-"),
            certificate_path: root.join("certificate.pem.crt"),
            key_path: root.join("private.pem.key"),
            log_dir: root,
            log_bucket: None,
            poll: PollPolicy::new(Duration::ZERO, Duration::ZERO, 3).expect("policy"),
            companion_timeout: Duration::from_secs(1),
            shadow: None,
        },
        _tmp: tmp,
    }
}

fn suite(name: &str, disabled: bool) -> SuiteDefinition {
    SuiteDefinition {
        test_name: name.to_owned(),
        test_suite_id: format!("id-{name}"),
        disabled,
        companion: CompanionSpec {
            program: String::from("device-sim"),
            args: Vec::new(),
            working_dir: None,
        },
    }
}

#[rstest]
#[tokio::test]
async fn disabled_suites_are_skipped_without_provisioning(workspace: Workspace) {
    let cloud = FakeCloud::new();
    let orchestrator =
        SuiteOrchestrator::new(cloud.clone(), ScriptedLauncher::new(), workspace.settings);
    let suites = SuiteFile {
        test_suites: vec![suite("ota", true)],
    };

    let summary = orchestrator.run(&suites).await.expect("run completes");

    let report = summary.suites.first().expect("one report");
    assert_eq!(report.result, SuiteResult::Skipped);
    assert_eq!(report.thing_name, None);
    assert_eq!(cloud.call_count(FakeOperation::CreateThing), 0);
    assert_eq!(summary.exit_code(), 0);
}

#[rstest]
#[tokio::test]
async fn api_error_during_polling_does_not_stop_later_suites(workspace: Workspace) {
    let cloud = FakeCloud::new();
    cloud.push_snapshot_error(ApiError::Rejected {
        operation: String::from("get-suite-run"),
        message: String::from("AccessDenied"),
    });
    cloud.push_snapshot(SuiteRunSnapshot::with_cases(RunStatus::Pass, Vec::new()));
    let orchestrator =
        SuiteOrchestrator::new(cloud.clone(), ScriptedLauncher::new(), workspace.settings);
    let suites = SuiteFile {
        test_suites: vec![suite("first", false), suite("second", false)],
    };

    let summary = orchestrator.run(&suites).await.expect("run completes");

    let results: Vec<&SuiteResult> = summary.suites.iter().map(|report| &report.result).collect();
    assert!(
        matches!(results.as_slice(), [SuiteResult::Errored { .. }, SuiteResult::Passed { .. }]),
        "unexpected results: {results:?}"
    );
    assert_eq!(cloud.thing_count(), 0, "both things torn down");
    assert_eq!(summary.exit_code(), 1);
}

#[rstest]
#[tokio::test]
async fn teardown_failure_does_not_mask_the_verdict(workspace: Workspace) {
    let cloud = FakeCloud::new();
    cloud.push_snapshot(SuiteRunSnapshot::with_cases(RunStatus::Pass, Vec::new()));
    cloud.fail_next(
        FakeOperation::DeleteThing,
        ApiError::Transient {
            operation: String::from("delete-thing"),
            message: String::from("Throttling"),
        },
    );
    let orchestrator =
        SuiteOrchestrator::new(cloud.clone(), ScriptedLauncher::new(), workspace.settings);
    let suites = SuiteFile {
        test_suites: vec![suite("connect", false)],
    };

    let summary = orchestrator.run(&suites).await.expect("run completes");

    let report = summary.suites.first().expect("one report");
    assert_eq!(
        report.result,
        SuiteResult::Passed {
            status: RunStatus::Pass
        }
    );
    assert_eq!(cloud.thing_count(), 1, "thing survives the failed teardown");
    assert_eq!(summary.exit_code(), 0);
}
