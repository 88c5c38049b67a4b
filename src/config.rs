//! Configuration loading via `ortho-config`.
//!
//! Settings merge defaults, `tether.toml`, and `TETHER_*` environment
//! variables. A value written as `secret:<id>` is a reference into the secret
//! store and is replaced by [`HarnessConfig::resolve_secrets`] before use.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::api::{ApiError, SecretStore};
use crate::aws::DEFAULT_AWS_BIN;
use crate::companion::DEFAULT_COMPANION_TIMEOUT;
use crate::poller::{
    DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_MIN, DEFAULT_RUN_CEILING, PolicyError, PollPolicy,
};

/// Prefix marking a value as a secret-store reference.
pub const SECRET_PREFIX: &str = "secret:";

/// Harness settings derived from environment variables and configuration
/// files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "TETHER",
    discovery(
        app_name = "tether",
        env_var = "TETHER_CONFIG_PATH",
        config_file_name = "tether.toml",
        dotfile_name = ".tether.toml",
        project_file_name = "tether.toml"
    )
)]
pub struct HarnessConfig {
    /// Region every cloud call is scoped to.
    #[ortho_config(default = "us-east-1".to_owned())]
    pub region: String,
    /// Path to the `aws` executable.
    #[ortho_config(default = DEFAULT_AWS_BIN.to_owned())]
    pub aws_bin: String,
    /// Policy attached to every issued certificate. Required.
    pub policy_name: Option<String>,
    /// Thing group each test thing joins.
    pub thing_group: Option<String>,
    /// Prefix of generated thing names.
    #[ortho_config(default = "tether-".to_owned())]
    pub thing_name_prefix: String,
    /// Suite definition file.
    #[ortho_config(default = "suites.json".to_owned())]
    pub suites_file: String,
    /// Where the issued certificate is written.
    #[ortho_config(default = "certificate.pem.crt".to_owned())]
    pub certificate_path: String,
    /// Where the issued private key is written.
    #[ortho_config(default = "private.pem.key".to_owned())]
    pub key_path: String,
    /// Directory receiving exported failure logs.
    #[ortho_config(default = ".".to_owned())]
    pub log_dir: String,
    /// Bucket receiving exported failure logs; logs stay local when unset.
    pub log_bucket: Option<String>,
    /// Lower bound of the poll delay in seconds.
    #[ortho_config(default = DEFAULT_BACKOFF_MIN.as_secs())]
    pub backoff_min_secs: u64,
    /// Upper bound of the poll delay in seconds.
    #[ortho_config(default = DEFAULT_BACKOFF_MAX.as_secs())]
    pub backoff_max_secs: u64,
    /// Longest a suite run may be polled, in seconds.
    #[ortho_config(default = DEFAULT_RUN_CEILING.as_secs())]
    pub run_ceiling_secs: u64,
    /// Companion process timeout in seconds.
    #[ortho_config(default = DEFAULT_COMPANION_TIMEOUT.as_secs())]
    pub companion_timeout_secs: u64,
    /// Shadow property seeded before each run.
    pub shadow_property: Option<String>,
    /// Value the shadow property is seeded with.
    pub shadow_default: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to tether.toml",
            self.env_var, self.toml_key
        )
    }
}

const REGION: FieldMetadata = FieldMetadata::new("region", "TETHER_REGION", "region");
const AWS_BIN: FieldMetadata = FieldMetadata::new("AWS CLI binary", "TETHER_AWS_BIN", "aws_bin");
const POLICY_NAME: FieldMetadata =
    FieldMetadata::new("IoT policy name", "TETHER_POLICY_NAME", "policy_name");
const THING_GROUP: FieldMetadata =
    FieldMetadata::new("thing group", "TETHER_THING_GROUP", "thing_group");
const THING_NAME_PREFIX: FieldMetadata = FieldMetadata::new(
    "thing name prefix",
    "TETHER_THING_NAME_PREFIX",
    "thing_name_prefix",
);
const SUITES_FILE: FieldMetadata =
    FieldMetadata::new("suite file", "TETHER_SUITES_FILE", "suites_file");
const CERTIFICATE_PATH: FieldMetadata = FieldMetadata::new(
    "certificate path",
    "TETHER_CERTIFICATE_PATH",
    "certificate_path",
);
const KEY_PATH: FieldMetadata =
    FieldMetadata::new("private key path", "TETHER_KEY_PATH", "key_path");
const LOG_DIR: FieldMetadata =
    FieldMetadata::new("log directory", "TETHER_LOG_DIR", "log_dir");
const LOG_BUCKET: FieldMetadata =
    FieldMetadata::new("log bucket", "TETHER_LOG_BUCKET", "log_bucket");
const SHADOW_PROPERTY: FieldMetadata = FieldMetadata::new(
    "shadow property",
    "TETHER_SHADOW_PROPERTY",
    "shadow_property",
);
const SHADOW_DEFAULT: FieldMetadata = FieldMetadata::new(
    "shadow default value",
    "TETHER_SHADOW_DEFAULT",
    "shadow_default",
);

impl HarnessConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    fn require_optional(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        value.map_or(Ok(()), |inner| Self::require_field(inner, metadata))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("tether")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is empty
    /// and [`ConfigError::Invalid`] when values are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.region, &REGION)?;
        Self::require_field(&self.aws_bin, &AWS_BIN)?;
        Self::require_field(self.policy_name.as_deref().unwrap_or_default(), &POLICY_NAME)?;
        Self::require_optional(self.thing_group.as_deref(), &THING_GROUP)?;
        Self::require_field(&self.thing_name_prefix, &THING_NAME_PREFIX)?;
        Self::require_field(&self.suites_file, &SUITES_FILE)?;
        Self::require_field(&self.certificate_path, &CERTIFICATE_PATH)?;
        Self::require_field(&self.key_path, &KEY_PATH)?;
        Self::require_field(&self.log_dir, &LOG_DIR)?;
        Self::require_optional(self.log_bucket.as_deref(), &LOG_BUCKET)?;
        Self::require_optional(self.shadow_property.as_deref(), &SHADOW_PROPERTY)?;
        Self::require_optional(self.shadow_default.as_deref(), &SHADOW_DEFAULT)?;

        match (&self.shadow_property, &self.shadow_default) {
            (Some(_), None) => {
                return Err(ConfigError::MissingField(format!(
                    "missing {} for the configured shadow property: {}",
                    SHADOW_DEFAULT.description,
                    SHADOW_DEFAULT.hint()
                )));
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingField(format!(
                    "missing {} for the configured shadow default: {}",
                    SHADOW_PROPERTY.description,
                    SHADOW_PROPERTY.hint()
                )));
            }
            _ => {}
        }

        if self.companion_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "companion timeout must be at least one second: \
                 set TETHER_COMPANION_TIMEOUT_SECS or add companion_timeout_secs to tether.toml",
            )));
        }
        self.poll_policy().map(drop)
    }

    /// Builds the poll policy from the backoff bounds and run ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the bounds are inverted or the
    /// ceiling allows no polls.
    pub fn poll_policy(&self) -> Result<PollPolicy, ConfigError> {
        PollPolicy::from_ceiling(
            Duration::from_secs(self.backoff_min_secs),
            Duration::from_secs(self.backoff_max_secs),
            Duration::from_secs(self.run_ceiling_secs),
        )
        .map_err(|err| {
            let hint = match err {
                PolicyError::InvertedBackoff { .. } => {
                    "adjust TETHER_BACKOFF_MIN_SECS or TETHER_BACKOFF_MAX_SECS \
                     (backoff_min_secs / backoff_max_secs in tether.toml)"
                }
                PolicyError::EmptyBudget { .. } => {
                    "raise TETHER_RUN_CEILING_SECS or add run_ceiling_secs to tether.toml"
                }
            };
            ConfigError::Invalid(format!("{err}: {hint}"))
        })
    }

    /// Policy name, empty when unset; [`Self::validate`] rejects that case.
    #[must_use]
    pub fn policy_name(&self) -> &str {
        self.policy_name.as_deref().unwrap_or_default()
    }

    /// Companion process timeout.
    #[must_use]
    pub const fn companion_timeout(&self) -> Duration {
        Duration::from_secs(self.companion_timeout_secs)
    }

    /// Shadow property and default value, when both are configured.
    #[must_use]
    pub fn shadow(&self) -> Option<(&str, &str)> {
        self.shadow_property
            .as_deref()
            .zip(self.shadow_default.as_deref())
    }

    /// Suite file path.
    #[must_use]
    pub fn suites_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.suites_file)
    }

    /// Certificate output path.
    #[must_use]
    pub fn certificate_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.certificate_path)
    }

    /// Private key output path.
    #[must_use]
    pub fn key_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.key_path)
    }

    /// Log export directory.
    #[must_use]
    pub fn log_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.log_dir)
    }

    /// Replaces `secret:<id>` references in the policy name, thing group,
    /// and log bucket with values from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Secret`] when a referenced secret cannot be
    /// read.
    pub async fn resolve_secrets<S>(mut self, store: &S) -> Result<Self, ConfigError>
    where
        S: SecretStore + ?Sized,
    {
        self.policy_name = resolve(store, "policy_name", self.policy_name.take()).await?;
        self.thing_group = resolve(store, "thing_group", self.thing_group.take()).await?;
        self.log_bucket = resolve(store, "log_bucket", self.log_bucket.take()).await?;
        Ok(self)
    }
}

async fn resolve<S>(
    store: &S,
    field: &'static str,
    value: Option<String>,
) -> Result<Option<String>, ConfigError>
where
    S: SecretStore + ?Sized,
{
    let Some(raw) = value else {
        return Ok(None);
    };
    let Some(secret_id) = raw.strip_prefix(SECRET_PREFIX) else {
        return Ok(Some(raw));
    };
    let resolved = store
        .get_secret(secret_id.trim())
        .await
        .map_err(|source| ConfigError::Secret { field, source })?;
    tracing::debug!(field, "resolved configuration secret");
    Ok(Some(resolved.trim().to_owned()))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates configured values are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a `secret:` reference cannot be resolved.
    #[error("failed to resolve secret for {field}: {source}")]
    Secret {
        /// Field holding the reference.
        field: &'static str,
        /// Underlying secret store error.
        #[source]
        source: ApiError,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
