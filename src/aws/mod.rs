//! AWS CLI backed implementation of the service traits.
//!
//! Every call shells out to the `aws` binary with an explicit region and JSON
//! output, then parses stdout with serde. Failures are classified from the
//! error code the CLI prints on stderr so callers can tell an absent resource
//! from throttling or a permanent rejection.

use std::ffi::OsString;

use camino::Utf8Path;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::api::{
    ApiError, ApiFuture, ArtifactSink, CertificateStatus, DeviceRegistry, IssuedCertificate,
    LogSource, RunJob, SecretStore, SuiteRunService, SuiteRunSnapshot, ThingRecord,
};
use crate::command::{CommandRunner, ProcessCommandRunner};

mod error;
mod responses;

use error::classify_failure;
use responses::{
    CreateCertificateResponse, CreateThingResponse, EndpointResponse, GetSuiteRunResponse,
    ListPrincipalsResponse, LogEventsResponse, SecretValueResponse, StartSuiteRunResponse,
};

/// Default AWS CLI binary name.
pub const DEFAULT_AWS_BIN: &str = "aws";

/// `update-thing-shadow` insists on an output file for the accepted document.
const SHADOW_OUTFILE: &str = "/dev/null";

/// Client that drives the AWS CLI through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct AwsCli<R: CommandRunner> {
    runner: R,
    aws_bin: String,
    region: String,
}

impl AwsCli<ProcessCommandRunner> {
    /// Creates a client wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(aws_bin: impl Into<String>, region: impl Into<String>) -> Self {
        Self::new(ProcessCommandRunner, aws_bin, region)
    }
}

impl<R: CommandRunner> AwsCli<R> {
    /// Creates a client using the provided runner.
    #[must_use]
    pub fn new(runner: R, aws_bin: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            runner,
            aws_bin: aws_bin.into(),
            region: region.into(),
        }
    }

    /// Region every call is scoped to.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn build_args(&self, service: &str, operation: &str, extra: Vec<OsString>) -> Vec<OsString> {
        let mut args = Vec::with_capacity(extra.len() + 6);
        args.push(OsString::from(service));
        args.push(OsString::from(operation));
        args.extend(extra);
        args.push(OsString::from("--region"));
        args.push(OsString::from(&self.region));
        args.push(OsString::from("--output"));
        args.push(OsString::from("json"));
        args
    }

    async fn invoke(
        &self,
        service: &str,
        operation: &str,
        extra: Vec<OsString>,
    ) -> Result<String, ApiError> {
        let label = format!("{service} {operation}");
        let args = self.build_args(service, operation, extra);
        tracing::debug!(operation = %label, "invoking aws cli");
        let output = self
            .runner
            .run(&self.aws_bin, &args)
            .await
            .map_err(|source| ApiError::Invocation {
                operation: label.clone(),
                source,
            })?;

        if output.is_success() {
            return Ok(output.stdout);
        }
        Err(classify_failure(&label, &output))
    }

    async fn invoke_json<T: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        extra: Vec<OsString>,
    ) -> Result<T, ApiError> {
        let stdout = self.invoke(service, operation, extra).await?;
        serde_json::from_str(&stdout).map_err(|err| ApiError::MalformedResponse {
            operation: format!("{service} {operation}"),
            message: err.to_string(),
        })
    }
}

fn flags<const N: usize>(pairs: [(&str, &str); N]) -> Vec<OsString> {
    let mut args = Vec::with_capacity(N * 2);
    for (flag, value) in pairs {
        args.push(OsString::from(flag));
        args.push(OsString::from(value));
    }
    args
}

impl<R: CommandRunner> DeviceRegistry for AwsCli<R> {
    fn create_thing<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ThingRecord> {
        Box::pin(async move {
            let response: CreateThingResponse = self
                .invoke_json("iot", "create-thing", flags([("--thing-name", name)]))
                .await?;
            Ok(ThingRecord {
                name: response.thing_name,
                arn: response.thing_arn,
            })
        })
    }

    fn add_thing_to_group<'a>(&'a self, group: &'a str, thing: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.invoke(
                "iot",
                "add-thing-to-thing-group",
                flags([("--thing-group-name", group), ("--thing-name", thing)]),
            )
            .await
            .map(drop)
        })
    }

    fn create_keys_and_certificate(&self) -> ApiFuture<'_, IssuedCertificate> {
        Box::pin(async move {
            let response: CreateCertificateResponse = self
                .invoke_json(
                    "iot",
                    "create-keys-and-certificate",
                    vec![OsString::from("--set-as-active")],
                )
                .await?;
            Ok(IssuedCertificate {
                arn: response.certificate_arn,
                id: response.certificate_id,
                certificate_pem: response.certificate_pem,
                private_key: response.key_pair.private_key,
            })
        })
    }

    fn attach_policy<'a>(&'a self, policy: &'a str, target_arn: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.invoke(
                "iot",
                "attach-policy",
                flags([("--policy-name", policy), ("--target", target_arn)]),
            )
            .await
            .map(drop)
        })
    }

    fn attach_thing_principal<'a>(
        &'a self,
        thing: &'a str,
        principal: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.invoke(
                "iot",
                "attach-thing-principal",
                flags([("--thing-name", thing), ("--principal", principal)]),
            )
            .await
            .map(drop)
        })
    }

    fn list_thing_principals<'a>(&'a self, thing: &'a str) -> ApiFuture<'a, Vec<String>> {
        Box::pin(async move {
            let response: ListPrincipalsResponse = self
                .invoke_json(
                    "iot",
                    "list-thing-principals",
                    flags([("--thing-name", thing)]),
                )
                .await?;
            Ok(response.principals)
        })
    }

    fn detach_thing_principal<'a>(
        &'a self,
        thing: &'a str,
        principal: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.invoke(
                "iot",
                "detach-thing-principal",
                flags([("--thing-name", thing), ("--principal", principal)]),
            )
            .await
            .map(drop)
        })
    }

    fn update_certificate_status<'a>(
        &'a self,
        certificate_id: &'a str,
        status: CertificateStatus,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.invoke(
                "iot",
                "update-certificate",
                flags([
                    ("--certificate-id", certificate_id),
                    ("--new-status", status.as_str()),
                ]),
            )
            .await
            .map(drop)
        })
    }

    fn delete_certificate<'a>(&'a self, certificate_id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut args = flags([("--certificate-id", certificate_id)]);
            args.push(OsString::from("--force-delete"));
            self.invoke("iot", "delete-certificate", args)
                .await
                .map(drop)
        })
    }

    fn delete_thing<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.invoke("iot", "delete-thing", flags([("--thing-name", name)]))
                .await
                .map(drop)
        })
    }

    fn update_shadow<'a>(&'a self, thing: &'a str, document: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut args = flags([
                ("--thing-name", thing),
                ("--cli-binary-format", "raw-in-base64-out"),
                ("--payload", document),
            ]);
            args.push(OsString::from(SHADOW_OUTFILE));
            self.invoke("iot-data", "update-thing-shadow", args)
                .await
                .map(drop)
        })
    }
}

impl<R: CommandRunner> SuiteRunService for AwsCli<R> {
    fn start_suite_run<'a>(
        &'a self,
        suite_id: &'a str,
        thing_arn: &'a str,
    ) -> ApiFuture<'a, RunJob> {
        Box::pin(async move {
            let configuration = json!({
                "primaryDevice": { "thingArn": thing_arn },
                "parallelRun": true,
            })
            .to_string();
            let response: StartSuiteRunResponse = self
                .invoke_json(
                    "iotdeviceadvisor",
                    "start-suite-run",
                    flags([
                        ("--suite-definition-id", suite_id),
                        ("--suite-run-configuration", configuration.as_str()),
                    ]),
                )
                .await?;
            Ok(RunJob {
                suite_id: suite_id.to_owned(),
                run_id: response.suite_run_id,
            })
        })
    }

    fn get_suite_run<'a>(&'a self, job: &'a RunJob) -> ApiFuture<'a, SuiteRunSnapshot> {
        Box::pin(async move {
            let response: GetSuiteRunResponse = self
                .invoke_json(
                    "iotdeviceadvisor",
                    "get-suite-run",
                    flags([
                        ("--suite-definition-id", job.suite_id.as_str()),
                        ("--suite-run-id", job.run_id.as_str()),
                    ]),
                )
                .await?;
            Ok(response.into())
        })
    }

    fn get_endpoint<'a>(&'a self, thing_arn: &'a str) -> ApiFuture<'a, String> {
        Box::pin(async move {
            let response: EndpointResponse = self
                .invoke_json(
                    "iotdeviceadvisor",
                    "get-endpoint",
                    flags([("--thing-arn", thing_arn)]),
                )
                .await?;
            Ok(response.endpoint)
        })
    }
}

impl<R: CommandRunner> LogSource for AwsCli<R> {
    fn get_log_events<'a>(
        &'a self,
        group: &'a str,
        stream: &'a str,
    ) -> ApiFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut args = flags([("--log-group-name", group), ("--log-stream-name", stream)]);
            args.push(OsString::from("--start-from-head"));
            let response: LogEventsResponse =
                self.invoke_json("logs", "get-log-events", args).await?;
            Ok(response
                .events
                .into_iter()
                .map(|event| event.message)
                .collect())
        })
    }
}

impl<R: CommandRunner> ArtifactSink for AwsCli<R> {
    fn upload<'a>(
        &'a self,
        local_path: &'a Utf8Path,
        bucket: &'a str,
        key: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let args = vec![
                OsString::from(local_path.as_str()),
                OsString::from(format!("s3://{bucket}/{key}")),
            ];
            self.invoke("s3", "cp", args).await.map(drop)
        })
    }
}

impl<R: CommandRunner> SecretStore for AwsCli<R> {
    fn get_secret<'a>(&'a self, secret_id: &'a str) -> ApiFuture<'a, String> {
        Box::pin(async move {
            let response: SecretValueResponse = self
                .invoke_json(
                    "secretsmanager",
                    "get-secret-value",
                    flags([("--secret-id", secret_id)]),
                )
                .await?;
            response
                .secret_string
                .ok_or_else(|| ApiError::MalformedResponse {
                    operation: String::from("secretsmanager get-secret-value"),
                    message: format!("secret {secret_id} has no string value"),
                })
        })
    }
}
