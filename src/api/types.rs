//! Value types exchanged with the device-management and suite-run APIs.

use std::fmt;

use serde::Deserialize;

/// A registered thing as returned by the device registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThingRecord {
    /// Thing name chosen by the caller.
    pub name: String,
    /// Provider ARN used to reference the thing in other APIs.
    pub arn: String,
}

/// Certificate and key pair issued by the registry.
///
/// The private key only ever exists in memory and in the caller's credential
/// file; the registry does not retain it.
#[derive(Clone, Eq, PartialEq)]
pub struct IssuedCertificate {
    /// Certificate ARN, used as the principal for attachments.
    pub arn: String,
    /// Certificate identifier, used for status updates and deletion.
    pub id: String,
    /// PEM encoded certificate.
    pub certificate_pem: String,
    /// PEM encoded private key.
    pub private_key: String,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("arn", &self.arn)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Certificate activation states accepted by the registry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertificateStatus {
    /// Certificate may authenticate connections.
    Active,
    /// Certificate is revoked for use; required before deletion.
    Inactive,
}

impl CertificateStatus {
    /// Wire representation used by the registry API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }
}

/// Identifies one submitted suite run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunJob {
    /// Suite definition the run was started from.
    pub suite_id: String,
    /// Opaque run identifier returned on submission.
    pub run_id: String,
}

/// Status values reported for a suite run or an individual test case.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(from = "String")]
pub enum RunStatus {
    /// Queued; nothing has started.
    Pending,
    /// Executing.
    Running,
    /// Winding down after a stop request.
    Stopping,
    /// Stopped before completion.
    Stopped,
    /// Every check passed.
    Pass,
    /// Passed, with non-fatal findings.
    PassWithWarnings,
    /// At least one check failed.
    Fail,
    /// Cancelled by a user or the service.
    Canceled,
    /// The service could not execute the run.
    Error,
    /// Any status string this crate does not recognise.
    Other(String),
}

impl RunStatus {
    /// Returns `true` while the run may still change state.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Stopping)
    }

    /// Returns `true` for the two accepted success statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Pass | Self::PassWithWarnings)
    }

    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Pass => "PASS",
            Self::PassWithWarnings => "PASS_WITH_WARNINGS",
            Self::Fail => "FAIL",
            Self::Canceled => "CANCELED",
            Self::Error => "ERROR",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl From<&str> for RunStatus {
    fn from(value: &str) -> Self {
        match value {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "STOPPED" => Self::Stopped,
            "PASS" => Self::Pass,
            "PASS_WITH_WARNINGS" => Self::PassWithWarnings,
            "FAIL" => Self::Fail,
            "CANCELED" => Self::Canceled,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One test case inside a suite run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseSnapshot {
    /// Case status.
    pub status: RunStatus,
    /// Console URL for the case's log stream, once available.
    #[serde(default)]
    pub log_url: Option<String>,
}

/// A group of test cases inside a suite run.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct TestGroupSnapshot {
    /// Cases in the group; empty until the service materialises them.
    #[serde(default)]
    pub tests: Vec<TestCaseSnapshot>,
}

/// Point-in-time view of a suite run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SuiteRunSnapshot {
    /// Overall run status.
    pub status: RunStatus,
    /// Nested per-group results; empty while the run is loading.
    pub groups: Vec<TestGroupSnapshot>,
}

impl SuiteRunSnapshot {
    /// Builds a snapshot with a single group holding the given cases.
    #[must_use]
    pub fn with_cases(status: RunStatus, cases: Vec<TestCaseSnapshot>) -> Self {
        Self {
            status,
            groups: vec![TestGroupSnapshot { tests: cases }],
        }
    }

    /// Returns the first test case of the first group, if materialised.
    #[must_use]
    pub fn first_case(&self) -> Option<&TestCaseSnapshot> {
        self.groups.first().and_then(|group| group.tests.first())
    }

    /// Returns the log URL of the first test case, if any.
    #[must_use]
    pub fn log_url(&self) -> Option<&str> {
        self.first_case().and_then(|case| case.log_url.as_deref())
    }
}
