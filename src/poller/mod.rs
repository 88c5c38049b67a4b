//! Polling of remote suite runs with jittered backoff and a cycle budget.
//!
//! The remote service offers no completion notification, so the poller asks
//! for the run status after a randomised delay until the run reaches a
//! terminal status or the cycle budget is spent. Each observation is reduced
//! to a [`PollPhase`] by a single transition function, and the companion
//! process is launched the first time the run is seen executing a test.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;

use crate::api::{ApiError, RunJob, RunStatus, SuiteRunService, SuiteRunSnapshot};
use crate::companion::{CompanionInvocation, CompanionLauncher};

/// Lower bound of the jittered delay between polls.
pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_secs(5);
/// Upper bound of the jittered delay between polls.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);
/// Wall-clock ceiling used to derive the cycle budget.
pub const DEFAULT_RUN_CEILING: Duration = Duration::from_secs(3600);

/// Errors raised when a poll policy cannot be built.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum PolicyError {
    /// Raised when the lower backoff bound exceeds the upper bound.
    #[error("backoff minimum {min_secs}s exceeds maximum {max_secs}s")]
    InvertedBackoff {
        /// Lower bound in seconds.
        min_secs: u64,
        /// Upper bound in seconds.
        max_secs: u64,
    },
    /// Raised when the budget would allow no polls at all.
    #[error("run ceiling {ceiling_secs}s allows no polls at a {max_secs}s backoff")]
    EmptyBudget {
        /// Ceiling in seconds.
        ceiling_secs: u64,
        /// Upper backoff bound in seconds.
        max_secs: u64,
    },
}

/// Backoff bounds and cycle budget for one suite run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    backoff_min: Duration,
    backoff_max: Duration,
    max_cycles: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_max: DEFAULT_BACKOFF_MAX,
            max_cycles: 360,
        }
    }
}

impl PollPolicy {
    /// Builds a policy with an explicit cycle budget.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when `backoff_min > backoff_max` or
    /// `max_cycles` is zero.
    pub const fn new(
        backoff_min: Duration,
        backoff_max: Duration,
        max_cycles: u64,
    ) -> Result<Self, PolicyError> {
        if backoff_min.as_secs() > backoff_max.as_secs() {
            return Err(PolicyError::InvertedBackoff {
                min_secs: backoff_min.as_secs(),
                max_secs: backoff_max.as_secs(),
            });
        }
        if max_cycles == 0 {
            return Err(PolicyError::EmptyBudget {
                ceiling_secs: 0,
                max_secs: backoff_max.as_secs(),
            });
        }
        Ok(Self {
            backoff_min,
            backoff_max,
            max_cycles,
        })
    }

    /// Builds a policy whose budget is `ceiling / backoff_max` cycles.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when the bounds are inverted or the ceiling is
    /// shorter than a single maximal backoff.
    pub fn from_ceiling(
        backoff_min: Duration,
        backoff_max: Duration,
        ceiling: Duration,
    ) -> Result<Self, PolicyError> {
        let max_cycles = ceiling
            .as_secs()
            .checked_div(backoff_max.as_secs())
            .unwrap_or(0);
        if max_cycles == 0 {
            return Err(PolicyError::EmptyBudget {
                ceiling_secs: ceiling.as_secs(),
                max_secs: backoff_max.as_secs(),
            });
        }
        Self::new(backoff_min, backoff_max, max_cycles)
    }

    /// Lower backoff bound.
    #[must_use]
    pub const fn backoff_min(&self) -> Duration {
        self.backoff_min
    }

    /// Upper backoff bound.
    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        self.backoff_max
    }

    /// Maximum number of polls.
    #[must_use]
    pub const fn max_cycles(&self) -> u64 {
        self.max_cycles
    }

    /// Picks a whole-second delay uniformly from the backoff bounds.
    #[must_use]
    pub fn jitter_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs(rng.gen_range(self.backoff_min.as_secs()..=self.backoff_max.as_secs()))
    }

    /// Sleeps for one jittered delay.
    pub async fn backoff(&self) {
        let delay = self.jitter_with(&mut rand::thread_rng());
        sleep(delay).await;
    }
}

/// Monotonic poll counter with a fixed ceiling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollCycle {
    count: u64,
    max: u64,
}

impl PollCycle {
    /// Starts a counter at zero.
    #[must_use]
    pub const fn new(max: u64) -> Self {
        Self { count: 0, max }
    }

    /// Claims the next cycle and returns its number, or `None` once the
    /// budget is spent.
    pub const fn advance(&mut self) -> Option<u64> {
        if self.count >= self.max {
            return None;
        }
        self.count += 1;
        Some(self.count)
    }

    /// Cycles claimed so far.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }
}

/// What a single status observation means for the poll loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollPhase {
    /// The run is queued or its test cases have not materialised yet.
    Loading,
    /// The first test case started executing; launch the companion now.
    LaunchCompanion,
    /// The run is executing and nothing needs doing.
    InProgress,
    /// The run finished with the given status.
    Terminal(RunStatus),
}

impl PollPhase {
    /// Reduces a snapshot to the next phase.
    ///
    /// A terminal overall status wins even if the nested results are absent.
    /// `companion_launched` suppresses repeated launch requests.
    #[must_use]
    pub fn observe(snapshot: &SuiteRunSnapshot, companion_launched: bool) -> Self {
        if !snapshot.status.is_in_progress() {
            return Self::Terminal(snapshot.status.clone());
        }
        let Some(case) = snapshot.first_case() else {
            return Self::Loading;
        };
        if snapshot.status == RunStatus::Pending || case.status == RunStatus::Pending {
            return Self::Loading;
        }
        if !companion_launched
            && snapshot.status == RunStatus::Running
            && case.status == RunStatus::Running
        {
            return Self::LaunchCompanion;
        }
        Self::InProgress
    }
}

/// Result of polling a run to completion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PollReport {
    /// Terminal status of the run.
    pub status: RunStatus,
    /// Log URL of the first test case, when reported.
    pub log_url: Option<String>,
    /// Polls spent.
    pub cycles: u64,
    /// Whether the companion was launched.
    pub companion_launched: bool,
    /// Whether the companion exited cleanly.
    pub companion_succeeded: bool,
}

/// Errors that end polling before a terminal status is seen.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError {
    /// Raised when the cycle budget is spent while the run is still going.
    #[error(
        "suite run {run_id} still in progress after {cycles} polls \
         ({backoff_min_secs}-{backoff_max_secs}s apart)"
    )]
    Timeout {
        /// Run that did not finish.
        run_id: String,
        /// Polls spent.
        cycles: u64,
        /// Lower backoff bound in seconds.
        backoff_min_secs: u64,
        /// Upper backoff bound in seconds.
        backoff_max_secs: u64,
    },
    /// Raised when a status query fails with a non-transient error.
    #[error("failed to query suite run {run_id}: {source}")]
    Api {
        /// Run being polled.
        run_id: String,
        /// Underlying service error.
        #[source]
        source: ApiError,
    },
}

/// Polls a suite run and drives the companion process.
#[derive(Debug)]
pub struct RunPoller<'a, S: ?Sized, C: ?Sized> {
    service: &'a S,
    launcher: &'a C,
    policy: PollPolicy,
}

impl<'a, S, C> RunPoller<'a, S, C>
where
    S: SuiteRunService + ?Sized,
    C: CompanionLauncher + ?Sized,
{
    /// Creates a poller.
    #[must_use]
    pub const fn new(service: &'a S, launcher: &'a C, policy: PollPolicy) -> Self {
        Self {
            service,
            launcher,
            policy,
        }
    }

    /// Polls `job` until it reaches a terminal status.
    ///
    /// Transient query failures use up a cycle and polling continues.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Timeout`] when the budget is spent and
    /// [`PollError::Api`] on any other query failure.
    pub async fn poll_until_terminal(
        &self,
        job: &RunJob,
        companion: &CompanionInvocation,
    ) -> Result<PollReport, PollError> {
        let mut cycle = PollCycle::new(self.policy.max_cycles());
        let mut companion_launched = false;
        let mut companion_succeeded = false;

        while let Some(current) = cycle.advance() {
            self.policy.backoff().await;
            let snapshot = match self.service.get_suite_run(job).await {
                Ok(snapshot) => snapshot,
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        run = %job.run_id,
                        cycle = current,
                        error = %err,
                        "status query throttled"
                    );
                    continue;
                }
                Err(source) => {
                    return Err(PollError::Api {
                        run_id: job.run_id.clone(),
                        source,
                    });
                }
            };
            tracing::debug!(
                run = %job.run_id,
                cycle = current,
                status = %snapshot.status,
                "polled suite run"
            );

            match PollPhase::observe(&snapshot, companion_launched) {
                PollPhase::Terminal(status) => {
                    return Ok(PollReport {
                        status,
                        log_url: snapshot.log_url().map(str::to_owned),
                        cycles: cycle.count(),
                        companion_launched,
                        companion_succeeded,
                    });
                }
                PollPhase::LaunchCompanion => {
                    companion_launched = true;
                    companion_succeeded = self.launch_companion(companion).await;
                }
                PollPhase::Loading | PollPhase::InProgress => {}
            }
        }

        Err(PollError::Timeout {
            run_id: job.run_id.clone(),
            cycles: cycle.count(),
            backoff_min_secs: self.policy.backoff_min().as_secs(),
            backoff_max_secs: self.policy.backoff_max().as_secs(),
        })
    }

    async fn launch_companion(&self, companion: &CompanionInvocation) -> bool {
        tracing::info!(command = %companion.render(), "launching companion");
        match self.launcher.launch(companion).await {
            Ok(outcome) => {
                tracing::info!(?outcome, "companion finished");
                outcome.is_success()
            }
            Err(err) => {
                tracing::warn!(error = %err, "companion failed to start");
                false
            }
        }
    }
}
