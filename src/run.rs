//! Orchestrates qualification runs end to end.
//!
//! Each enabled suite gets a fresh thing: it is provisioned, the remote suite
//! is started against it, the run is polled to completion while the companion
//! process exercises the device side, and the outcome decides what happens to
//! the thing. Passing runs are cleaned up. Failing runs keep their thing for
//! investigation and have their logs exported. Runs that time out or lose
//! contact with the service are cleaned up and reported separately.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::api::{ApiError, CloudApi};
use crate::companion::{
    CERTIFICATE_ENV, CompanionInvocation, CompanionLauncher, ENDPOINT_ENV, PRIVATE_KEY_ENV,
    SHADOW_PROPERTY_ENV, SHADOW_VALUE_ENV, THING_NAME_ENV,
};
use crate::config::{ConfigError, HarnessConfig};
use crate::poller::{PollError, PollPolicy, PollReport, RunPoller};
use crate::provision::{ProvisionError, ProvisionRequest, Provisioner, ResourceHandle};
use crate::report::{ExportError, LogExporter, RunSummary, SuiteReport, SuiteResult, Verdict};
use crate::suite::{CompanionSpec, SuiteDefinition, SuiteFile};

/// Errors that abort a whole invocation.
#[derive(Debug, Error)]
pub enum RunError {
    /// Raised when a suite's thing cannot be provisioned. Partial resources
    /// have already been rolled back.
    #[error("setup failed for suite {suite}: {source}")]
    Setup {
        /// Suite being prepared.
        suite: String,
        /// Underlying provisioning error.
        #[source]
        source: Box<ProvisionError>,
        /// Reports of the suites that finished before the abort.
        completed: RunSummary,
    },
}

impl RunError {
    /// Suites that finished before the run was aborted.
    #[must_use]
    pub const fn completed(&self) -> &RunSummary {
        match self {
            Self::Setup { completed, .. } => completed,
        }
    }
}

/// Settings for a run, resolved from [`HarnessConfig`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunSettings {
    /// Policy attached to each certificate.
    pub policy_name: String,
    /// Optional thing group.
    pub thing_group: Option<String>,
    /// Prefix of generated thing names.
    pub thing_name_prefix: String,
    /// Absolute certificate path.
    pub certificate_path: Utf8PathBuf,
    /// Absolute private key path.
    pub key_path: Utf8PathBuf,
    /// Log export directory.
    pub log_dir: Utf8PathBuf,
    /// Optional log bucket.
    pub log_bucket: Option<String>,
    /// Poll bounds.
    pub poll: PollPolicy,
    /// Companion timeout.
    pub companion_timeout: Duration,
    /// Shadow property and default value.
    pub shadow: Option<(String, String)>,
}

impl RunSettings {
    /// Validates `config` and resolves credential paths to absolute ones so
    /// a companion with its own working directory still finds them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or a path cannot be
    /// made absolute.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            policy_name: config.policy_name().to_owned(),
            thing_group: config.thing_group.clone(),
            thing_name_prefix: config.thing_name_prefix.clone(),
            certificate_path: absolute(&config.certificate_path())?,
            key_path: absolute(&config.key_path())?,
            log_dir: config.log_dir(),
            log_bucket: config.log_bucket.clone(),
            poll: config.poll_policy()?,
            companion_timeout: config.companion_timeout(),
            shadow: config
                .shadow()
                .map(|(property, value)| (property.to_owned(), value.to_owned())),
        })
    }
}

fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, ConfigError> {
    let resolved = std::path::absolute(path)
        .map_err(|err| ConfigError::Invalid(format!("cannot resolve {path}: {err}")))?;
    Utf8PathBuf::from_path_buf(resolved).map_err(|path_buf| {
        ConfigError::Invalid(format!("{} is not valid UTF-8", path_buf.display()))
    })
}

/// Why a started suite did not produce a terminal status.
#[derive(Debug, Error)]
enum SuiteFailure {
    #[error(transparent)]
    Shadow(ProvisionError),
    #[error("failed to start suite run: {0}")]
    Start(ApiError),
    #[error("failed to fetch device endpoint: {0}")]
    Endpoint(ApiError),
    #[error(transparent)]
    Poll(PollError),
}

impl SuiteFailure {
    fn into_result(self) -> SuiteResult {
        match self {
            Self::Poll(PollError::Timeout { cycles, .. }) => SuiteResult::TimedOut { cycles },
            other => SuiteResult::Errored {
                message: other.to_string(),
            },
        }
    }
}

/// Executes suites against a cloud client and a companion launcher.
#[derive(Debug)]
pub struct SuiteOrchestrator<A, C> {
    cloud: A,
    launcher: C,
    settings: RunSettings,
}

impl<A, C> SuiteOrchestrator<A, C>
where
    A: CloudApi,
    C: CompanionLauncher,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub const fn new(cloud: A, launcher: C, settings: RunSettings) -> Self {
        Self {
            cloud,
            launcher,
            settings,
        }
    }

    /// Runs every suite in file order and summarises the outcomes.
    ///
    /// Disabled suites are reported as skipped. A suite whose run fails
    /// after provisioning is recorded and the next suite still runs.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Setup`] when a thing cannot be provisioned; no
    /// further suites are attempted and the error carries the reports of
    /// the suites that already finished.
    pub async fn run(&self, suites: &SuiteFile) -> Result<RunSummary, RunError> {
        tracing::info!(
            total = suites.test_suites.len(),
            enabled = suites.enabled().count(),
            "running suites"
        );
        let mut summary = RunSummary::default();
        for suite in &suites.test_suites {
            let report = if suite.disabled {
                tracing::info!(suite = %suite.test_name, "suite disabled; skipping");
                SuiteReport {
                    name: suite.test_name.clone(),
                    thing_name: None,
                    result: SuiteResult::Skipped,
                }
            } else {
                match self.run_suite(suite).await {
                    Ok(report) => report,
                    Err(source) => {
                        return Err(RunError::Setup {
                            suite: suite.test_name.clone(),
                            source,
                            completed: summary,
                        });
                    }
                }
            };
            tracing::info!(report = %report, "suite finished");
            summary.suites.push(report);
        }
        Ok(summary)
    }

    async fn run_suite(
        &self,
        suite: &SuiteDefinition,
    ) -> Result<SuiteReport, Box<ProvisionError>> {
        let thing_name = format!("{}{}", self.settings.thing_name_prefix, Uuid::new_v4());
        let request = ProvisionRequest {
            thing_name: thing_name.clone(),
            policy_name: self.settings.policy_name.clone(),
            thing_group: self.settings.thing_group.clone(),
            certificate_path: self.settings.certificate_path.clone(),
            key_path: self.settings.key_path.clone(),
        };
        tracing::info!(
            suite = %suite.test_name,
            thing = %thing_name,
            "provisioning test thing"
        );
        let handle = Provisioner::new(&self.cloud)
            .provision(&request)
            .await
            .map_err(Box::new)?;

        let result = match self.exercise(suite, &handle).await {
            Ok(report) => self.conclude(&handle, &report).await,
            Err(failure) => {
                tracing::warn!(suite = %suite.test_name, error = %failure, "suite run failed");
                self.teardown(&handle).await;
                failure.into_result()
            }
        };

        if let Err(err) = handle.remove_credentials() {
            tracing::warn!(
                thing = %handle.thing_name,
                error = %err,
                "could not remove credentials"
            );
        }
        Ok(SuiteReport {
            name: suite.test_name.clone(),
            thing_name: Some(thing_name),
            result,
        })
    }

    async fn exercise(
        &self,
        suite: &SuiteDefinition,
        handle: &ResourceHandle,
    ) -> Result<PollReport, SuiteFailure> {
        if let Some((property, value)) = &self.settings.shadow {
            Provisioner::new(&self.cloud)
                .seed_shadow(&handle.thing_name, property, value)
                .await
                .map_err(SuiteFailure::Shadow)?;
        }

        self.settings.poll.backoff().await;
        let job = self
            .cloud
            .start_suite_run(&suite.test_suite_id, &handle.thing_arn)
            .await
            .map_err(SuiteFailure::Start)?;
        tracing::info!(suite = %suite.test_name, run = %job.run_id, "started suite run");
        let endpoint = self
            .cloud
            .get_endpoint(&handle.thing_arn)
            .await
            .map_err(SuiteFailure::Endpoint)?;

        let companion = self.companion_invocation(&suite.companion, handle, &endpoint);
        RunPoller::new(&self.cloud, &self.launcher, self.settings.poll)
            .poll_until_terminal(&job, &companion)
            .await
            .map_err(SuiteFailure::Poll)
    }

    async fn conclude(&self, handle: &ResourceHandle, report: &PollReport) -> SuiteResult {
        let status = report.status.clone();
        match Verdict::from_status(&status) {
            Verdict::Passed => {
                self.teardown(handle).await;
                SuiteResult::Passed { status }
            }
            Verdict::Failed => {
                let log = self
                    .export_logs(&handle.thing_name, report.log_url.as_deref())
                    .await;
                tracing::warn!(
                    thing = %handle.thing_name,
                    status = %status,
                    "suite failed; retaining thing for investigation"
                );
                SuiteResult::Failed { status, log }
            }
        }
    }

    async fn export_logs(&self, thing: &str, log_url: Option<&str>) -> Option<String> {
        let exporter = LogExporter::new(
            &self.cloud,
            &self.cloud,
            &self.settings.log_dir,
            self.settings.log_bucket.clone(),
        );
        match exporter.export_url(log_url, thing).await {
            Ok(outcome) => Some(outcome.to_string()),
            Err(err) => {
                tracing::warn!(thing = %thing, error = %err, "log export failed");
                match err {
                    ExportError::Upload { path, .. } => Some(path.into_string()),
                    _ => None,
                }
            }
        }
    }

    async fn teardown(&self, handle: &ResourceHandle) {
        if let Err(err) = Provisioner::new(&self.cloud)
            .deprovision(&handle.thing_name)
            .await
        {
            tracing::warn!(thing = %handle.thing_name, error = %err, "teardown failed");
        }
    }

    fn companion_invocation(
        &self,
        spec: &CompanionSpec,
        handle: &ResourceHandle,
        endpoint: &str,
    ) -> CompanionInvocation {
        let mut env = vec![
            (String::from(ENDPOINT_ENV), endpoint.to_owned()),
            (String::from(THING_NAME_ENV), handle.thing_name.clone()),
            (
                String::from(CERTIFICATE_ENV),
                handle.certificate_path.to_string(),
            ),
            (String::from(PRIVATE_KEY_ENV), handle.key_path.to_string()),
        ];
        if let Some((property, value)) = &self.settings.shadow {
            env.push((String::from(SHADOW_PROPERTY_ENV), property.clone()));
            env.push((String::from(SHADOW_VALUE_ENV), value.clone()));
        }
        CompanionInvocation {
            program: spec.program.clone(),
            args: spec.args.clone(),
            working_dir: spec.working_dir.clone(),
            env,
            timeout: self.settings.companion_timeout,
        }
    }
}
