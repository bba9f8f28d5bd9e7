//! The harness itself: failure reporting, settle checks and setup errors

mod common;

use anyhow::Result;
use common::*;
use file_storage_provider::client::memory::{MemoryFileStorage, MemoryFileStorageConfig};
use file_storage_provider::client::{FileStorageClient, UpdateExportSetDetails};
use file_storage_provider::env::required_env_setting;
use test_case::test_case;

#[tokio::test]
async fn test_replacement_during_update_is_reported() -> Result<()> {
    let fixtures = fixtures()?;
    let ids = IdentityLog::new();

    let err = TestCase::new()
        .step(TestStep::new(fixtures.full(&ExportSetVariables::default())).check(ids.capture(EXPORT_SET)))
        .step(
            TestStep::new(fixtures.force_new(&ExportSetVariables::on_mount_target_2()))
                .check(compose_aggregate(vec![ids.assert_unchanged(EXPORT_SET)])),
        )
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Step { step: 2, .. }), "{}", err);
    assert!(err.to_string().contains(RECREATED_ON_UPDATE), "{}", err);
    Ok(())
}

#[tokio::test]
async fn test_missing_replacement_is_reported() -> Result<()> {
    let fixtures = fixtures()?;
    let vars = ExportSetVariables::default();
    let ids = IdentityLog::new();

    let err = TestCase::new()
        .step(TestStep::new(fixtures.required_only(&vars)).check(ids.capture(EXPORT_SET)))
        .step(TestStep::new(fixtures.full(&vars)).check(ids.assert_changed(EXPORT_SET)))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Step { step: 2, .. }), "{}", err);
    assert!(err.to_string().contains(NOT_RECREATED), "{}", err);
    Ok(())
}

#[tokio::test]
async fn test_failed_check_still_destroys() -> Result<()> {
    let fixtures = fixtures()?;
    let err = TestCase::new()
        .step(
            TestStep::new(fixtures.required_only(&ExportSetVariables::default()))
                .check(check_resource_attr(EXPORT_SET, "state", "FAILED")),
        )
        .check_destroy(check_fn(|_| anyhow::bail!("destroy check must not decide the outcome")))
        .run()
        .await
        .unwrap_err();

    // The step failure wins over the failing destroy check
    assert!(matches!(err, HarnessError::Step { step: 1, .. }), "{}", err);
    Ok(())
}

#[tokio::test]
async fn test_destroy_check_failure() -> Result<()> {
    let fixtures = fixtures()?;
    let err = TestCase::new()
        .step(TestStep::new(fixtures.required_only(&ExportSetVariables::default())))
        .check_destroy(check_resource_attr_set(EXPORT_SET, "id"))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Destroy(_)), "{}", err);
    Ok(())
}

#[tokio::test]
async fn test_import_verify_with_ignored_attributes() -> Result<()> {
    let fixtures = fixtures()?;
    TestCase::new()
        .step(
            TestStep::new(fixtures.required_only(&ExportSetVariables::default()))
                .import_state_verify("file_storage_mount_target.test_mount_target")
                .import_state_verify_ignore("private_ip_ids")
                .check(check_resource_attr(
                    "file_storage_mount_target.test_mount_target",
                    "state",
                    "ACTIVE",
                )),
        )
        .run()
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_import_drift_fails_the_step() -> Result<()> {
    let fixtures = fixtures()?;
    let storage = MemoryFileStorage::default();
    let remote = storage.clone();

    // Rename the export set behind the engine's back before the import runs
    let rename = check_fn(move |state| {
        let id = from_instance_state(state, EXPORT_SET, "id")?;
        let update = UpdateExportSetDetails {
            display_name: Some("renamed elsewhere".to_string()),
            ..Default::default()
        };
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(remote.update_export_set(&id, update))
        })?;
        Ok(())
    });

    let err = TestCase::new()
        .control_plane(storage.clone())
        .step(
            TestStep::new(fixtures.full(&ExportSetVariables::default()))
                .import_state_verify(EXPORT_SET)
                .check(rename),
        )
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Step { step: 1, .. }), "{}", err);
    let message = err.to_string();
    assert!(message.contains("ImportStateVerify attributes not equivalent"), "{}", message);
    assert!(message.contains("display_name"), "{}", message);
    assert!(!message.contains("max_fs_stat_bytes"), "{}", message);
    // The failed step is still cleaned up
    assert_eq!(storage.mount_target_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_setting_aborts_before_any_step() -> Result<()> {
    let fixtures = Fixtures::new("ocid1.compartment.oc1..unused");
    let ids = IdentityLog::new();

    let err = TestCase::new()
        .pre_check(|| {
            required_env_setting("compartment_id_for_nothing")?;
            Ok(())
        })
        .step(
            TestStep::new(fixtures.required_only(&ExportSetVariables::default()))
                .check(ids.capture(EXPORT_SET)),
        )
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Setup(_)), "{}", err);
    assert!(err.to_string().contains("TF_VAR_compartment_id_for_nothing"), "{}", err);
    assert!(ids.ids().is_empty());
    Ok(())
}

#[test_case(0, 100 ; "already active")]
#[test_case(1, 1 ; "one read with single item pages")]
#[test_case(4, 2 ; "slow activation")]
#[tokio::test]
async fn test_query_settles_regardless_of_backend(activation_reads: u32, page_size: usize) -> Result<()> {
    let fixtures = fixtures()?;
    let vars = ExportSetVariables::default();

    TestCase::new()
        .backend(MemoryFileStorageConfig {
            activation_reads,
            page_size,
            ..Default::default()
        })
        .step(TestStep::new(fixtures.query(&vars)).check(compose(vec![
            check_resource_attr(EXPORT_SETS_QUERY, "export_sets.#", "1"),
            check_resource_attr(EXPORT_SETS_QUERY, "export_sets.0.state", "ACTIVE"),
            check_resource_attr(EXPORT_SET, "display_name", "export set display name"),
        ])))
        .run()
        .await?;
    Ok(())
}
