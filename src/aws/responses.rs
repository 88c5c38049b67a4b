//! JSON shapes printed by the AWS CLI for the operations used here.

use serde::Deserialize;

use crate::api::{RunStatus, SuiteRunSnapshot, TestGroupSnapshot};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateThingResponse {
    pub(super) thing_name: String,
    pub(super) thing_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateCertificateResponse {
    pub(super) certificate_arn: String,
    pub(super) certificate_id: String,
    pub(super) certificate_pem: String,
    pub(super) key_pair: KeyPair,
}

#[derive(Debug, Deserialize)]
pub(super) struct KeyPair {
    #[serde(rename = "PrivateKey")]
    pub(super) private_key: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ListPrincipalsResponse {
    #[serde(default)]
    pub(super) principals: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StartSuiteRunResponse {
    pub(super) suite_run_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GetSuiteRunResponse {
    pub(super) status: RunStatus,
    #[serde(default)]
    pub(super) test_result: Option<TestResult>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct TestResult {
    #[serde(default)]
    pub(super) groups: Vec<TestGroupSnapshot>,
}

impl From<GetSuiteRunResponse> for SuiteRunSnapshot {
    fn from(value: GetSuiteRunResponse) -> Self {
        Self {
            status: value.status,
            groups: value.test_result.unwrap_or_default().groups,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct EndpointResponse {
    pub(super) endpoint: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct LogEventsResponse {
    #[serde(default)]
    pub(super) events: Vec<LogEvent>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LogEvent {
    #[serde(default)]
    pub(super) message: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct SecretValueResponse {
    #[serde(rename = "SecretString")]
    pub(super) secret_string: Option<String>,
}
