//! Seams for the cloud services a qualification run depends on.
//!
//! Each trait mirrors one external collaborator: the device registry, the
//! remote suite-run service, the log store, durable artifact storage, and the
//! secret store. Implementations return boxed futures so callers can hold
//! them behind generics without pinning to a specific client, and tests can
//! substitute in-memory fakes.

use std::future::Future;
use std::pin::Pin;

use camino::Utf8Path;
use thiserror::Error;

mod types;

pub use types::{
    CertificateStatus, IssuedCertificate, RunJob, RunStatus, SuiteRunSnapshot, TestCaseSnapshot,
    TestGroupSnapshot, ThingRecord,
};

use crate::command::CommandError;

/// Errors raised by external service calls.
///
/// Variants separate outcomes callers treat differently: an absent resource
/// is ignorable during teardown, a transient failure may be retried, and the
/// remaining variants are fatal.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// The addressed resource does not exist.
    #[error("{operation}: resource not found: {message}")]
    NotFound {
        /// Operation that was attempted.
        operation: String,
        /// Provider message.
        message: String,
    },
    /// The service is throttling or temporarily unavailable.
    #[error("{operation}: transient failure: {message}")]
    Transient {
        /// Operation that was attempted.
        operation: String,
        /// Provider message.
        message: String,
    },
    /// The service refused the request.
    #[error("{operation}: request rejected: {message}")]
    Rejected {
        /// Operation that was attempted.
        operation: String,
        /// Provider message.
        message: String,
    },
    /// The service answered with output that could not be understood.
    #[error("{operation}: malformed response: {message}")]
    MalformedResponse {
        /// Operation that was attempted.
        operation: String,
        /// Parser message.
        message: String,
    },
    /// The client could not issue the request at all.
    #[error("{operation}: {source}")]
    Invocation {
        /// Operation that was attempted.
        operation: String,
        /// Underlying execution failure.
        #[source]
        source: CommandError,
    },
}

impl ApiError {
    /// Returns `true` when the resource was already absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Future returned by service operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Device-management operations used to provision and tear down test things.
pub trait DeviceRegistry: Send + Sync {
    /// Registers a new thing.
    fn create_thing<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ThingRecord>;

    /// Adds an existing thing to a thing group.
    fn add_thing_to_group<'a>(&'a self, group: &'a str, thing: &'a str) -> ApiFuture<'a, ()>;

    /// Issues an active certificate together with a fresh key pair.
    fn create_keys_and_certificate(&self) -> ApiFuture<'_, IssuedCertificate>;

    /// Attaches a named policy to a principal ARN.
    fn attach_policy<'a>(&'a self, policy: &'a str, target_arn: &'a str) -> ApiFuture<'a, ()>;

    /// Attaches a principal (certificate ARN) to a thing.
    fn attach_thing_principal<'a>(
        &'a self,
        thing: &'a str,
        principal: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Lists principal ARNs attached to a thing.
    fn list_thing_principals<'a>(&'a self, thing: &'a str) -> ApiFuture<'a, Vec<String>>;

    /// Detaches a principal from a thing.
    fn detach_thing_principal<'a>(
        &'a self,
        thing: &'a str,
        principal: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Changes a certificate's activation status.
    fn update_certificate_status<'a>(
        &'a self,
        certificate_id: &'a str,
        status: CertificateStatus,
    ) -> ApiFuture<'a, ()>;

    /// Force-deletes a certificate.
    fn delete_certificate<'a>(&'a self, certificate_id: &'a str) -> ApiFuture<'a, ()>;

    /// Deletes a thing.
    fn delete_thing<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()>;

    /// Replaces the thing's classic shadow document.
    fn update_shadow<'a>(&'a self, thing: &'a str, document: &'a str) -> ApiFuture<'a, ()>;
}

/// Remote asynchronous test-execution service.
pub trait SuiteRunService: Send + Sync {
    /// Submits a suite run against the given thing and returns its handle.
    fn start_suite_run<'a>(&'a self, suite_id: &'a str, thing_arn: &'a str)
    -> ApiFuture<'a, RunJob>;

    /// Fetches the current status of a suite run.
    fn get_suite_run<'a>(&'a self, job: &'a RunJob) -> ApiFuture<'a, SuiteRunSnapshot>;

    /// Returns the endpoint the device under test must connect to.
    fn get_endpoint<'a>(&'a self, thing_arn: &'a str) -> ApiFuture<'a, String>;
}

/// Log store holding remote test logs.
pub trait LogSource: Send + Sync {
    /// Returns the messages of a log stream in order.
    fn get_log_events<'a>(&'a self, group: &'a str, stream: &'a str)
    -> ApiFuture<'a, Vec<String>>;
}

/// Durable storage for exported artifacts.
pub trait ArtifactSink: Send + Sync {
    /// Uploads a local file to `bucket` under `key`.
    fn upload<'a>(
        &'a self,
        local_path: &'a Utf8Path,
        bucket: &'a str,
        key: &'a str,
    ) -> ApiFuture<'a, ()>;
}

/// Secret store used to resolve indirect configuration values.
pub trait SecretStore: Send + Sync {
    /// Returns the secret string stored under `secret_id`.
    fn get_secret<'a>(&'a self, secret_id: &'a str) -> ApiFuture<'a, String>;
}

/// Every service a suite run touches, bundled for the orchestrator.
pub trait CloudApi: DeviceRegistry + SuiteRunService + LogSource + ArtifactSink {}

impl<T> CloudApi for T where T: DeviceRegistry + SuiteRunService + LogSource + ArtifactSink {}
