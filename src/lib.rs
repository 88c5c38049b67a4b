//! Core library for the Tether qualification harness.
//!
//! Tether provisions a disposable device identity, starts a remote
//! qualification suite against it, drives a local companion process while the
//! suite executes, and classifies the outcome. Passing runs are cleaned up;
//! failing runs keep their identity for investigation and have their logs
//! exported.

pub mod api;
pub mod aws;
pub mod command;
pub mod companion;
pub mod config;
pub mod files;
pub mod poller;
pub mod provision;
pub mod report;
pub mod run;
pub mod suite;
#[cfg(test)]
pub mod test_helpers;
pub mod test_support;

pub use api::{ApiError, CloudApi, RunJob, RunStatus, SuiteRunSnapshot};
pub use aws::AwsCli;
pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use companion::{CompanionInvocation, CompanionLauncher, ProcessCompanionLauncher};
pub use config::{ConfigError, HarnessConfig};
pub use poller::{PollError, PollPolicy, PollReport, RunPoller};
pub use provision::{ProvisionError, ProvisionRequest, Provisioner, ResourceHandle};
pub use report::{ExportError, ExportOutcome, LogExporter, RunSummary, SuiteReport, SuiteResult};
pub use run::{RunError, RunSettings, SuiteOrchestrator};
pub use suite::{SuiteFile, SuiteFileError};
