//! Result classification and failure-log export.
//!
//! Only `PASS` and `PASS_WITH_WARNINGS` count as success. When a run fails,
//! its remote log stream is fetched into a local file named after the thing
//! and, when a bucket is configured, uploaded for later inspection. Export
//! problems are reported to the caller but never change the verdict.

use std::fmt;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use thiserror::Error;

use crate::api::{ApiError, ArtifactSink, LogSource, RunStatus};
use crate::files::{FileError, remove_if_present, write_file};

#[expect(clippy::expect_used, reason = "literal pattern compiled in tests")]
static GROUP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("group=(.*);").expect("group pattern compiles"));
#[expect(clippy::expect_used, reason = "literal pattern compiled in tests")]
static STREAM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("stream=(.*)").expect("stream pattern compiles"));

/// Pass or fail classification of a terminal status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// The run passed, possibly with warnings.
    Passed,
    /// Any other terminal status.
    Failed,
}

impl Verdict {
    /// Classifies a terminal status. Unrecognised statuses fail.
    #[must_use]
    pub const fn from_status(status: &RunStatus) -> Self {
        if status.is_success() {
            Self::Passed
        } else {
            Self::Failed
        }
    }
}

/// Log group and stream extracted from a console log URL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogReference {
    /// Log group name.
    pub group: String,
    /// Log stream name.
    pub stream: String,
}

impl LogReference {
    /// Parses the `group=<g>;` and `stream=<s>` fragments of a log URL.
    #[must_use]
    pub fn parse(url: &str) -> Option<Self> {
        let group = capture(&GROUP_PATTERN, url)?;
        let stream = capture(&STREAM_PATTERN, url)?;
        Some(Self { group, stream })
    }
}

fn capture(pattern: &Regex, haystack: &str) -> Option<String> {
    pattern
        .captures(haystack)?
        .get(1)
        .map(|found| found.as_str().to_owned())
        .filter(|found| !found.is_empty())
}

/// File name used for the exported log of `thing`.
#[must_use]
pub fn log_file_name(thing: &str) -> String {
    format!("suite-log-{thing}.log")
}

/// Where an exported log ended up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExportOutcome {
    /// Kept locally because no bucket is configured.
    Written {
        /// Local log file.
        path: Utf8PathBuf,
    },
    /// Uploaded; the local copy has been removed.
    Uploaded {
        /// Destination bucket.
        bucket: String,
        /// Object key.
        key: String,
    },
}

impl fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Written { path } => write!(f, "{path}"),
            Self::Uploaded { bucket, key } => write!(f, "s3://{bucket}/{key}"),
        }
    }
}

/// Errors raised while exporting a failure log.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExportError {
    /// Raised when the run reported no log URL.
    #[error("suite run reported no log location")]
    MissingReference,
    /// Raised when the log URL lacks a group or stream.
    #[error("cannot find log group and stream in {url}")]
    UnparsableReference {
        /// URL as reported.
        url: String,
    },
    /// Raised when the log events cannot be fetched.
    #[error("failed to fetch log stream {group}/{stream}: {source}")]
    Fetch {
        /// Log group.
        group: String,
        /// Log stream.
        stream: String,
        /// Underlying service error.
        #[source]
        source: ApiError,
    },
    /// Raised when the local log file cannot be written.
    #[error("failed to write log file: {0}")]
    Write(#[source] FileError),
    /// Raised when the upload fails. The local file is kept.
    #[error("failed to upload {path} to {bucket}: {source}")]
    Upload {
        /// Local file left in place.
        path: Utf8PathBuf,
        /// Destination bucket.
        bucket: String,
        /// Underlying service error.
        #[source]
        source: ApiError,
    },
}

/// Fetches failure logs and stores them locally or in a bucket.
#[derive(Debug)]
pub struct LogExporter<'a, L: ?Sized, A: ?Sized> {
    logs: &'a L,
    sink: &'a A,
    log_dir: Utf8PathBuf,
    bucket: Option<String>,
}

impl<'a, L, A> LogExporter<'a, L, A>
where
    L: LogSource + ?Sized,
    A: ArtifactSink + ?Sized,
{
    /// Creates an exporter writing into `log_dir` and optionally uploading
    /// to `bucket`.
    #[must_use]
    pub fn new(logs: &'a L, sink: &'a A, log_dir: &Utf8Path, bucket: Option<String>) -> Self {
        Self {
            logs,
            sink,
            log_dir: log_dir.to_path_buf(),
            bucket,
        }
    }

    /// Parses `log_url` and exports the referenced stream.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] when the URL is absent or unparsable, or when
    /// [`Self::export`] fails.
    pub async fn export_url(
        &self,
        log_url: Option<&str>,
        thing: &str,
    ) -> Result<ExportOutcome, ExportError> {
        let url = log_url.ok_or(ExportError::MissingReference)?;
        let reference =
            LogReference::parse(url).ok_or_else(|| ExportError::UnparsableReference {
                url: url.to_owned(),
            })?;
        self.export(&reference, thing).await
    }

    /// Writes the referenced log stream to `suite-log-<thing>.log` and
    /// uploads it when a bucket is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] when fetching, writing, or uploading fails.
    pub async fn export(
        &self,
        reference: &LogReference,
        thing: &str,
    ) -> Result<ExportOutcome, ExportError> {
        let events = self
            .logs
            .get_log_events(&reference.group, &reference.stream)
            .await
            .map_err(|source| ExportError::Fetch {
                group: reference.group.clone(),
                stream: reference.stream.clone(),
                source,
            })?;

        let file_name = log_file_name(thing);
        let path = self.log_dir.join(&file_name);
        let mut contents = String::new();
        for event in &events {
            contents.push_str(event);
            if !event.ends_with('\n') {
                contents.push('\n');
            }
        }
        write_file(&path, &contents).map_err(ExportError::Write)?;
        tracing::info!(path = %path, events = events.len(), "wrote suite log");

        let Some(bucket) = &self.bucket else {
            return Ok(ExportOutcome::Written { path });
        };
        if let Err(source) = self.sink.upload(&path, bucket, &file_name).await {
            return Err(ExportError::Upload {
                path,
                bucket: bucket.clone(),
                source,
            });
        }
        if let Err(err) = remove_if_present(&path) {
            tracing::warn!(path = %path, error = %err, "could not remove uploaded log");
        }
        Ok(ExportOutcome::Uploaded {
            bucket: bucket.clone(),
            key: file_name,
        })
    }
}

/// Final outcome of one suite.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SuiteResult {
    /// The suite was disabled.
    Skipped,
    /// The run passed and its resources were removed.
    Passed {
        /// Terminal status.
        status: RunStatus,
    },
    /// The run finished with a non-pass status. The thing is retained.
    Failed {
        /// Terminal status.
        status: RunStatus,
        /// Log export result rendered for the report, if an export happened.
        log: Option<String>,
    },
    /// The poll budget ran out before the run finished.
    TimedOut {
        /// Polls spent.
        cycles: u64,
    },
    /// The run could not be started or tracked.
    Errored {
        /// Description of the failure.
        message: String,
    },
}

impl SuiteResult {
    /// Returns `true` when the suite counts against the exit code.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Skipped | Self::Passed { .. })
    }
}

impl fmt::Display for SuiteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => f.write_str("skipped"),
            Self::Passed { status } => write!(f, "passed ({status})"),
            Self::Failed {
                status,
                log: Some(log),
            } => write!(f, "failed ({status}); log at {log}"),
            Self::Failed { status, log: None } => write!(f, "failed ({status})"),
            Self::TimedOut { cycles } => write!(f, "timed out after {cycles} polls"),
            Self::Errored { message } => write!(f, "error: {message}"),
        }
    }
}

/// Result of one suite, labelled for reporting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SuiteReport {
    /// Suite display name.
    pub name: String,
    /// Thing provisioned for the suite, if any.
    pub thing_name: Option<String>,
    /// Outcome.
    pub result: SuiteResult,
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thing_name {
            Some(thing) => write!(f, "{} [{thing}]: {}", self.name, self.result),
            None => write!(f, "{}: {}", self.name, self.result),
        }
    }
}

/// Results of every suite in an invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// Per-suite reports in execution order.
    pub suites: Vec<SuiteReport>,
}

impl RunSummary {
    /// Returns 0 when no executed suite failed and 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.suites.iter().any(|suite| suite.result.is_failure()))
    }
}
