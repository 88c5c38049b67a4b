//! Provisioning and teardown of disposable device identities.
//!
//! A test resource is a registered thing with one active certificate attached
//! and a policy bound to that certificate. Credentials are written to local
//! files so the companion process can authenticate as the device. Partial
//! provisioning is always rolled back, and teardown treats resources that are
//! already gone as removed.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use thiserror::Error;

use crate::api::{ApiError, CertificateStatus, DeviceRegistry, ThingRecord};
use crate::files::{FileError, remove_if_present, write_file, write_private_file};

/// Steps of the resource lifecycle, used to label failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleStep {
    /// Registering the thing.
    CreateThing,
    /// Adding the thing to its group.
    AddToGroup,
    /// Issuing the certificate and key pair.
    CreateCertificate,
    /// Attaching the policy to the certificate.
    AttachPolicy,
    /// Attaching the certificate to the thing.
    AttachPrincipal,
    /// Seeding the thing shadow.
    SeedShadow,
    /// Listing principals during teardown.
    ListPrincipals,
    /// Detaching a principal during teardown.
    DetachPrincipal,
    /// Marking a certificate inactive.
    DeactivateCertificate,
    /// Deleting a certificate.
    DeleteCertificate,
    /// Deleting the thing.
    DeleteThing,
}

impl LifecycleStep {
    const fn label(self) -> &'static str {
        match self {
            Self::CreateThing => "create thing",
            Self::AddToGroup => "add thing to group",
            Self::CreateCertificate => "create certificate",
            Self::AttachPolicy => "attach policy",
            Self::AttachPrincipal => "attach certificate",
            Self::SeedShadow => "seed shadow",
            Self::ListPrincipals => "list principals",
            Self::DetachPrincipal => "detach principal",
            Self::DeactivateCertificate => "deactivate certificate",
            Self::DeleteCertificate => "delete certificate",
            Self::DeleteThing => "delete thing",
        }
    }
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors raised while provisioning or tearing down a test resource.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when a registry call fails.
    #[error("failed to {step} for {thing}: {source}")]
    Api {
        /// Lifecycle step that failed.
        step: LifecycleStep,
        /// Thing being provisioned or removed.
        thing: String,
        /// Underlying service error.
        #[source]
        source: ApiError,
    },
    /// Raised when credential files cannot be written.
    #[error("failed to write credentials for {thing}: {source}")]
    Credentials {
        /// Thing whose credentials were being written.
        thing: String,
        /// Underlying file error.
        #[source]
        source: FileError,
    },
}

impl ProvisionError {
    fn api(step: LifecycleStep, thing: &str, source: ApiError) -> Self {
        Self::Api {
            step,
            thing: thing.to_owned(),
            source,
        }
    }

    /// Lifecycle step that failed, when the failure came from the registry.
    #[must_use]
    pub const fn step(&self) -> Option<LifecycleStep> {
        match self {
            Self::Api { step, .. } => Some(*step),
            Self::Credentials { .. } => None,
        }
    }
}

/// Parameters for provisioning one test resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Unique thing name.
    pub thing_name: String,
    /// Policy attached to the issued certificate.
    pub policy_name: String,
    /// Optional thing group.
    pub thing_group: Option<String>,
    /// Destination of the PEM certificate.
    pub certificate_path: Utf8PathBuf,
    /// Destination of the PEM private key.
    pub key_path: Utf8PathBuf,
}

/// A fully provisioned test resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceHandle {
    /// Thing name.
    pub thing_name: String,
    /// Thing ARN, used to start suite runs.
    pub thing_arn: String,
    /// Attached certificate ARN.
    pub certificate_arn: String,
    /// Attached certificate identifier.
    pub certificate_id: String,
    /// Policy bound to the certificate.
    pub policy_name: String,
    /// Group the thing joined, if any.
    pub thing_group: Option<String>,
    /// Local certificate file.
    pub certificate_path: Utf8PathBuf,
    /// Local private key file.
    pub key_path: Utf8PathBuf,
}

impl ResourceHandle {
    /// Removes both credential files. Missing files are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FileError`] when an existing file cannot be removed. Both
    /// files are attempted before the first error is returned.
    pub fn remove_credentials(&self) -> Result<(), FileError> {
        let cert = remove_if_present(&self.certificate_path);
        let key = remove_if_present(&self.key_path);
        cert.and(key).map(drop)
    }
}

/// Counts of resources removed by [`Provisioner::deprovision`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeprovisionSummary {
    /// Certificates deleted by this call.
    pub certificates_deleted: usize,
    /// Whether this call deleted the thing; `false` when it was already gone.
    pub thing_deleted: bool,
}

/// Extracts the certificate id from a certificate ARN (`.../cert/<id>`).
#[must_use]
pub fn certificate_id_from_arn(arn: &str) -> &str {
    arn.rsplit_once('/').map_or(arn, |(_, id)| id)
}

#[derive(Debug, Default)]
struct Progress {
    certificate_id: Option<String>,
    attached: bool,
    written: Vec<Utf8PathBuf>,
}

/// Provisions and removes test resources through a [`DeviceRegistry`].
#[derive(Debug)]
pub struct Provisioner<'a, D: ?Sized> {
    registry: &'a D,
}

impl<'a, D> Provisioner<'a, D>
where
    D: DeviceRegistry + ?Sized,
{
    /// Creates a provisioner backed by `registry`.
    #[must_use]
    pub const fn new(registry: &'a D) -> Self {
        Self { registry }
    }

    /// Creates the thing, its certificate, and the credential files.
    ///
    /// When any step after the thing is registered fails, everything created
    /// so far is rolled back before the original error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] describing the first failed step.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ResourceHandle, ProvisionError> {
        let thing = self
            .registry
            .create_thing(&request.thing_name)
            .await
            .map_err(|err| {
                ProvisionError::api(LifecycleStep::CreateThing, &request.thing_name, err)
            })?;
        tracing::info!(thing = %thing.name, "registered thing");

        let mut progress = Progress::default();
        match self.complete(request, &thing, &mut progress).await {
            Ok(handle) => Ok(handle),
            Err(err) => {
                tracing::warn!(
                    thing = %thing.name,
                    error = %err,
                    "provisioning failed; rolling back"
                );
                self.rollback(&request.thing_name, &progress).await;
                Err(err)
            }
        }
    }

    async fn complete(
        &self,
        request: &ProvisionRequest,
        thing: &ThingRecord,
        progress: &mut Progress,
    ) -> Result<ResourceHandle, ProvisionError> {
        let name = thing.name.as_str();
        if let Some(group) = &request.thing_group {
            self.registry
                .add_thing_to_group(group, name)
                .await
                .map_err(|err| ProvisionError::api(LifecycleStep::AddToGroup, name, err))?;
        }

        let certificate = self
            .registry
            .create_keys_and_certificate()
            .await
            .map_err(|err| ProvisionError::api(LifecycleStep::CreateCertificate, name, err))?;
        progress.certificate_id = Some(certificate.id.clone());

        write_credential(
            name,
            &request.certificate_path,
            write_file(&request.certificate_path, &certificate.certificate_pem),
            progress,
        )?;
        write_credential(
            name,
            &request.key_path,
            write_private_file(&request.key_path, &certificate.private_key),
            progress,
        )?;

        self.registry
            .attach_policy(&request.policy_name, &certificate.arn)
            .await
            .map_err(|err| ProvisionError::api(LifecycleStep::AttachPolicy, name, err))?;
        self.registry
            .attach_thing_principal(name, &certificate.arn)
            .await
            .map_err(|err| ProvisionError::api(LifecycleStep::AttachPrincipal, name, err))?;
        progress.attached = true;
        tracing::info!(thing = %name, certificate = %certificate.id, "attached certificate");

        Ok(ResourceHandle {
            thing_name: thing.name.clone(),
            thing_arn: thing.arn.clone(),
            certificate_arn: certificate.arn,
            certificate_id: certificate.id,
            policy_name: request.policy_name.clone(),
            thing_group: request.thing_group.clone(),
            certificate_path: request.certificate_path.clone(),
            key_path: request.key_path.clone(),
        })
    }

    async fn rollback(&self, thing: &str, progress: &Progress) {
        let unattached = progress
            .certificate_id
            .as_deref()
            .filter(|_| !progress.attached);
        if let Some(id) = unattached {
            if let Err(err) = self.retire_certificate(thing, id).await {
                tracing::warn!(
                    thing = %thing,
                    certificate = %id,
                    error = %err,
                    "rollback could not delete certificate"
                );
            }
        }
        for path in &progress.written {
            if let Err(err) = remove_if_present(path) {
                tracing::warn!(
                    path = %path,
                    error = %err,
                    "rollback could not remove credential file"
                );
            }
        }
        if let Err(err) = self.deprovision(thing).await {
            tracing::warn!(thing = %thing, error = %err, "rollback could not deprovision thing");
        }
    }

    /// Writes the default value of `property` into both the desired and the
    /// reported sections of the thing shadow.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Api`] when the shadow update fails.
    pub async fn seed_shadow(
        &self,
        thing: &str,
        property: &str,
        value: &str,
    ) -> Result<(), ProvisionError> {
        let document = json!({
            "state": {
                "desired": { property: value },
                "reported": { property: value },
            }
        })
        .to_string();
        self.registry
            .update_shadow(thing, &document)
            .await
            .map_err(|err| ProvisionError::api(LifecycleStep::SeedShadow, thing, err))
    }

    /// Detaches and deletes every certificate on `thing`, then deletes it.
    ///
    /// Resources that no longer exist count as removed, so the call is safe
    /// to repeat and succeeds for a thing that was never created.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Api`] on the first failure other than an
    /// absent resource.
    pub async fn deprovision(&self, thing: &str) -> Result<DeprovisionSummary, ProvisionError> {
        let principals = match self.registry.list_thing_principals(thing).await {
            Ok(principals) => principals,
            Err(err) if err.is_not_found() => {
                tracing::info!(thing = %thing, "thing already removed");
                return Ok(DeprovisionSummary::default());
            }
            Err(err) => {
                return Err(ProvisionError::api(
                    LifecycleStep::ListPrincipals,
                    thing,
                    err,
                ));
            }
        };

        let mut summary = DeprovisionSummary::default();
        for principal in &principals {
            absent_ok(
                self.registry.detach_thing_principal(thing, principal).await,
                LifecycleStep::DetachPrincipal,
                thing,
            )?;
            if self
                .retire_certificate(thing, certificate_id_from_arn(principal))
                .await?
            {
                summary.certificates_deleted += 1;
            }
        }

        summary.thing_deleted = absent_ok(
            self.registry.delete_thing(thing).await,
            LifecycleStep::DeleteThing,
            thing,
        )?;
        tracing::info!(
            thing = %thing,
            certificates = summary.certificates_deleted,
            deleted = summary.thing_deleted,
            "deprovisioned thing"
        );
        Ok(summary)
    }

    async fn retire_certificate(&self, thing: &str, id: &str) -> Result<bool, ProvisionError> {
        absent_ok(
            self.registry
                .update_certificate_status(id, CertificateStatus::Inactive)
                .await,
            LifecycleStep::DeactivateCertificate,
            thing,
        )?;
        absent_ok(
            self.registry.delete_certificate(id).await,
            LifecycleStep::DeleteCertificate,
            thing,
        )
    }
}

fn write_credential(
    thing: &str,
    path: &Utf8Path,
    written: Result<(), FileError>,
    progress: &mut Progress,
) -> Result<(), ProvisionError> {
    written.map_err(|source| ProvisionError::Credentials {
        thing: thing.to_owned(),
        source,
    })?;
    progress.written.push(path.to_path_buf());
    Ok(())
}

/// Maps `NotFound` to `Ok(false)`; success is `Ok(true)`.
fn absent_ok(
    result: Result<(), ApiError>,
    step: LifecycleStep,
    thing: &str,
) -> Result<bool, ProvisionError> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(ProvisionError::api(step, thing, err)),
    }
}

#[cfg(test)]
mod tests;
