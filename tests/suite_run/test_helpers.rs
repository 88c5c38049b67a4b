//! Shared fixtures for suite orchestration scenarios.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;
use tether::api::{RunStatus, SuiteRunSnapshot, TestCaseSnapshot};
use tether::suite::{CompanionSpec, SuiteDefinition};
use tether::test_support::{FakeCloud, ScriptedLauncher};
use tether::{PollPolicy, RunSettings, RunSummary, SuiteFile};
use thiserror::Error;

pub const LOG_URL: &str =
    "https://console.aws.amazon.com/cloudwatch/home#logEventViewer:group=/aws/iot/deviceadvisor/q;stream=run-1";

#[derive(Clone, Debug)]
pub struct SuiteRunContext {
    pub workdir: Arc<TempDir>,
    pub cloud: FakeCloud,
    pub launcher: ScriptedLauncher,
    pub settings: RunSettings,
    pub suites: SuiteFile,
    pub outcome: Option<RunOutcome>,
}

#[derive(Clone, Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    Aborted(String),
}

#[derive(Clone, Debug, Error)]
pub enum SuiteRunTestError {
    #[error("invalid suite run fixture: {0}")]
    Fixture(String),
}

#[fixture]
pub fn suite_run_context_result() -> Result<SuiteRunContext, SuiteRunTestError> {
    build_context()
}

#[fixture]
pub fn suite_run_context(
    suite_run_context_result: Result<SuiteRunContext, SuiteRunTestError>,
) -> SuiteRunContext {
    suite_run_context_result
        .unwrap_or_else(|err| panic!("suite run context fixture should initialise: {err}"))
}

fn build_context() -> Result<SuiteRunContext, SuiteRunTestError> {
    let workdir = TempDir::new().map_err(|err| SuiteRunTestError::Fixture(err.to_string()))?;
    let root = Utf8PathBuf::from_path_buf(workdir.path().to_path_buf()).map_err(|path| {
        SuiteRunTestError::Fixture(format!("temp path not UTF-8: {}", path.display()))
    })?;
    let poll = PollPolicy::new(Duration::ZERO, Duration::ZERO, 4)
        .map_err(|err| SuiteRunTestError::Fixture(err.to_string()))?;

    Ok(SuiteRunContext {
        settings: RunSettings {
            policy_name: String::from("qualification"),
            thing_group: Some(String::from("lab")),
            thing_name_prefix: String::from("tether-bdd-"),
            certificate_path: root.join("certificate.pem.crt"),
            key_path: root.join("private.pem.key"),
            log_dir: root.clone(),
            log_bucket: None,
            poll,
            companion_timeout: Duration::from_secs(5),
            shadow: None,
        },
        suites: SuiteFile {
            test_suites: vec![SuiteDefinition {
                test_name: String::from("mqtt-connect"),
                test_suite_id: String::from("suite-connect"),
                disabled: false,
                companion: CompanionSpec {
                    program: String::from("device-sim"),
                    args: Vec::new(),
                    working_dir: None,
                },
            }],
        },
        workdir: Arc::new(workdir),
        cloud: FakeCloud::new(),
        launcher: ScriptedLauncher::new(),
        outcome: None,
    })
}

pub fn running_snapshot() -> SuiteRunSnapshot {
    SuiteRunSnapshot::with_cases(
        RunStatus::Running,
        vec![TestCaseSnapshot {
            status: RunStatus::Running,
            log_url: None,
        }],
    )
}

pub fn finished_snapshot(status: &str) -> SuiteRunSnapshot {
    let parsed = RunStatus::from(status);
    SuiteRunSnapshot::with_cases(
        parsed.clone(),
        vec![TestCaseSnapshot {
            status: parsed,
            log_url: Some(String::from(LOG_URL)),
        }],
    )
}
