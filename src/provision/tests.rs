//! Unit tests for provisioning, rollback, and teardown.

use super::*;
use crate::test_support::{FakeCloud, FakeOperation};
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Workspace {
    _tmp: TempDir,
    root: Utf8PathBuf,
}

#[fixture]
fn workspace() -> Workspace {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path not UTF-8: {}", path.display()));
    Workspace { _tmp: tmp, root }
}

fn request(root: &Utf8Path, group: Option<&str>) -> ProvisionRequest {
    ProvisionRequest {
        thing_name: String::from("tether-test"),
        policy_name: String::from("qualification-policy"),
        thing_group: group.map(str::to_owned),
        certificate_path: root.join("certificate.pem.crt"),
        key_path: root.join("private.pem.key"),
    }
}

fn denied(operation: &str) -> ApiError {
    ApiError::Rejected {
        operation: operation.to_owned(),
        message: String::from("AccessDeniedException"),
    }
}

#[rstest]
#[tokio::test]
async fn provision_attaches_certificate_and_writes_credentials(workspace: Workspace) {
    let cloud = FakeCloud::new();
    let req = request(&workspace.root, Some("qualification"));

    let handle = Provisioner::new(&cloud)
        .provision(&req)
        .await
        .expect("provision should succeed");

    assert_eq!(handle.thing_name, "tether-test");
    assert_eq!(cloud.principals_of("tether-test"), vec![handle.certificate_arn.clone()]);
    assert_eq!(cloud.groups_of("tether-test"), vec![String::from("qualification")]);
    assert_eq!(
        cloud.policies_of(&handle.certificate_id),
        vec![String::from("qualification-policy")]
    );
    let pem = std::fs::read_to_string(&handle.certificate_path).expect("certificate written");
    assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
    assert!(handle.key_path.exists());
}

#[cfg(unix)]
#[rstest]
#[tokio::test]
async fn private_key_is_readable_by_owner_only(workspace: Workspace) {
    use std::os::unix::fs::PermissionsExt;

    let cloud = FakeCloud::new();
    let req = request(&workspace.root, None);

    let handle = Provisioner::new(&cloud)
        .provision(&req)
        .await
        .expect("provision should succeed");

    let mode = std::fs::metadata(&handle.key_path)
        .expect("key written")
        .permissions()
        .mode();
    assert_eq!(mode & 0o077, 0, "key mode was {mode:o}");
}

#[rstest]
#[tokio::test]
async fn provision_without_group_skips_group_call(workspace: Workspace) {
    let cloud = FakeCloud::new();

    Provisioner::new(&cloud)
        .provision(&request(&workspace.root, None))
        .await
        .expect("provision should succeed");

    assert_eq!(cloud.call_count(FakeOperation::AddThingToGroup), 0);
}

#[rstest]
#[tokio::test]
async fn create_thing_failure_needs_no_rollback(workspace: Workspace) {
    let cloud = FakeCloud::new();
    cloud.fail_next(FakeOperation::CreateThing, denied("create-thing"));

    let err = Provisioner::new(&cloud)
        .provision(&request(&workspace.root, None))
        .await
        .expect_err("provision should fail");

    assert_eq!(err.step(), Some(LifecycleStep::CreateThing));
    assert_eq!(cloud.calls(), vec![FakeOperation::CreateThing]);
}

#[rstest]
#[case(FakeOperation::AddThingToGroup, LifecycleStep::AddToGroup)]
#[case(FakeOperation::CreateCertificate, LifecycleStep::CreateCertificate)]
#[case(FakeOperation::AttachPolicy, LifecycleStep::AttachPolicy)]
#[case(FakeOperation::AttachPrincipal, LifecycleStep::AttachPrincipal)]
#[tokio::test]
async fn failures_after_create_roll_back_everything(
    workspace: Workspace,
    #[case] failing: FakeOperation,
    #[case] expected_step: LifecycleStep,
) {
    let cloud = FakeCloud::new();
    cloud.fail_next(failing, denied("injected"));
    let req = request(&workspace.root, Some("qualification"));

    let err = Provisioner::new(&cloud)
        .provision(&req)
        .await
        .expect_err("provision should fail");

    assert_eq!(err.step(), Some(expected_step));
    assert!(!cloud.thing_exists("tether-test"), "thing should be deleted");
    assert_eq!(cloud.certificate_count(), 0, "certificate should be deleted");
    assert!(!req.certificate_path.exists());
    assert!(!req.key_path.exists());
    assert_eq!(
        cloud.call_count(FakeOperation::ListPrincipals),
        1,
        "deprovision runs exactly once"
    );
}

#[rstest]
#[tokio::test]
async fn credential_write_failure_rolls_back(workspace: Workspace) {
    let cloud = FakeCloud::new();
    let blocker = workspace.root.join("blocker");
    std::fs::write(&blocker, "file").expect("write blocker");
    let mut req = request(&workspace.root, None);
    req.key_path = blocker.join("private.pem.key");

    let err = Provisioner::new(&cloud)
        .provision(&req)
        .await
        .expect_err("provision should fail");

    assert!(matches!(err, ProvisionError::Credentials { .. }), "{err}");
    assert!(!req.certificate_path.exists(), "partial files are removed");
    assert_eq!(cloud.certificate_count(), 0);
    assert!(!cloud.thing_exists("tether-test"));
}

#[rstest]
#[tokio::test]
async fn rollback_failure_does_not_mask_original_error(workspace: Workspace) {
    let cloud = FakeCloud::new();
    cloud.fail_next(FakeOperation::AttachPolicy, denied("attach-policy"));
    cloud.fail_next(FakeOperation::DeleteThing, denied("delete-thing"));

    let err = Provisioner::new(&cloud)
        .provision(&request(&workspace.root, None))
        .await
        .expect_err("provision should fail");

    assert_eq!(err.step(), Some(LifecycleStep::AttachPolicy));
}

#[tokio::test]
async fn deprovision_removes_all_certificates_then_thing() {
    let cloud = FakeCloud::new();
    cloud.seed_thing("tether-old", &["c1", "c2"]);

    let summary = Provisioner::new(&cloud)
        .deprovision("tether-old")
        .await
        .expect("deprovision should succeed");

    assert_eq!(
        summary,
        DeprovisionSummary {
            certificates_deleted: 2,
            thing_deleted: true,
        }
    );
    assert!(!cloud.thing_exists("tether-old"));
    assert_eq!(cloud.certificate_count(), 0);
}

#[tokio::test]
async fn deprovision_with_no_principals_deletes_thing() {
    let cloud = FakeCloud::new();
    cloud.seed_thing("tether-bare", &[]);

    let summary = Provisioner::new(&cloud)
        .deprovision("tether-bare")
        .await
        .expect("deprovision should succeed");

    assert_eq!(summary.certificates_deleted, 0);
    assert!(summary.thing_deleted);
}

#[tokio::test]
async fn deprovision_is_idempotent() {
    let cloud = FakeCloud::new();
    cloud.seed_thing("tether-twice", &["c1"]);
    let provisioner = Provisioner::new(&cloud);

    provisioner
        .deprovision("tether-twice")
        .await
        .expect("first deprovision");
    let again = provisioner
        .deprovision("tether-twice")
        .await
        .expect("second deprovision");

    assert_eq!(again, DeprovisionSummary::default());
}

#[tokio::test]
async fn deprovision_treats_vanished_certificate_as_removed() {
    let cloud = FakeCloud::new();
    cloud.seed_thing("tether-race", &["c1"]);
    cloud.fail_next(
        FakeOperation::DeleteCertificate,
        ApiError::NotFound {
            operation: String::from("delete-certificate"),
            message: String::from("gone"),
        },
    );

    let summary = Provisioner::new(&cloud)
        .deprovision("tether-race")
        .await
        .expect("deprovision should succeed");

    assert_eq!(summary.certificates_deleted, 0);
    assert!(summary.thing_deleted);
}

#[tokio::test]
async fn deprovision_surfaces_rejections() {
    let cloud = FakeCloud::new();
    cloud.seed_thing("tether-locked", &["c1"]);
    cloud.fail_next(FakeOperation::DetachPrincipal, denied("detach"));

    let err = Provisioner::new(&cloud)
        .deprovision("tether-locked")
        .await
        .expect_err("deprovision should fail");

    assert_eq!(err.step(), Some(LifecycleStep::DetachPrincipal));
    assert!(cloud.thing_exists("tether-locked"));
}

#[tokio::test]
async fn seed_shadow_writes_desired_and_reported() {
    let cloud = FakeCloud::new();
    cloud.seed_thing("tether-shadow", &[]);

    Provisioner::new(&cloud)
        .seed_shadow("tether-shadow", "powerOn", "1")
        .await
        .expect("shadow update");

    let document = cloud.shadow_of("tether-shadow").expect("shadow stored");
    let parsed: serde_json::Value = serde_json::from_str(&document).expect("shadow JSON");
    assert_eq!(parsed["state"]["desired"]["powerOn"], "1");
    assert_eq!(parsed["state"]["reported"]["powerOn"], "1");
}

#[rstest]
#[case("arn:aws:iot:us-east-1:123:cert/abc", "abc")]
#[case("abc", "abc")]
fn certificate_id_is_last_arn_segment(#[case] arn: &str, #[case] expected: &str) {
    assert_eq!(certificate_id_from_arn(arn), expected);
}

#[rstest]
fn remove_credentials_ignores_missing_files(workspace: Workspace) {
    let handle = ResourceHandle {
        thing_name: String::from("t"),
        thing_arn: String::from("arn"),
        certificate_arn: String::from("arn:cert/c"),
        certificate_id: String::from("c"),
        policy_name: String::from("p"),
        thing_group: None,
        certificate_path: workspace.root.join("cert.pem"),
        key_path: workspace.root.join("key.pem"),
    };
    std::fs::write(&handle.certificate_path, "PEM").expect("write cert");

    handle.remove_credentials().expect("remove should succeed");

    assert!(!handle.certificate_path.exists());
}
