//! Restore of completed backups, plain and encrypted

use backup_manager::utils::encryption::EncryptionFormat;
use backup_manager::{BackupError, BackupJob, JobStatus};
use rstest::rstest;
use std::fs;
use test_utils::{
    encrypted_policy, sample_policy, verify_source_tree, ConfigBuilder, TestContext,
};
use tokio_util::sync::CancellationToken;

const PASSWORD: &str = "Restore!Me42";

async fn backup(ctx: &TestContext, encrypted: bool) -> BackupJob {
    let source = ctx.source_tree("data");
    let manager = ctx.manager();
    let mut policy = if encrypted {
        encrypted_policy(&source, &ctx.backup_destination(), PASSWORD)
    } else {
        sample_policy(&source, &ctx.backup_destination(), 3)
    };
    let mut job = manager.create_backup_job(&mut policy).await.unwrap();
    manager
        .execute_backup(&mut job, &CancellationToken::new())
        .await
        .unwrap();
    job
}

#[tokio::test]
async fn test_restore_plain_backup() {
    let ctx = TestContext::new();
    let job = backup(&ctx, false).await;
    let target = ctx.temp_dir().join("restore");

    let entries = ctx
        .manager()
        .restore_backup(&job.id, &target, None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(entries > 0);
    assert!(verify_source_tree(&target.join("data")));
    assert_eq!(ctx.leftover_workspaces(), 0);
}

#[rstest]
#[case::legacy(EncryptionFormat::Legacy)]
#[case::salted(EncryptionFormat::Salted)]
#[tokio::test]
async fn test_restore_encrypted_backup(#[case] format: EncryptionFormat) {
    let ctx = TestContext::from_builder(ConfigBuilder::new().with_encryption_format(format));
    let job = backup(&ctx, true).await;
    assert!(job.backup_path.ends_with(".tar.gz.enc"));

    // Explicit passphrase
    let explicit = ctx.temp_dir().join("explicit");
    ctx.manager()
        .restore_backup(&job.id, &explicit, Some(PASSWORD), &CancellationToken::new())
        .await
        .unwrap();
    assert!(verify_source_tree(&explicit.join("data")));

    // Falls back to the stored policy's passphrase
    let fallback = ctx.temp_dir().join("fallback");
    ctx.manager()
        .restore_backup(&job.id, &fallback, None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(verify_source_tree(&fallback.join("data")));
}

#[tokio::test]
async fn test_restore_with_wrong_password() {
    let ctx = TestContext::new();
    let job = backup(&ctx, true).await;
    let target = ctx.temp_dir().join("restore");

    let err = ctx
        .manager()
        .restore_backup(&job.id, &target, Some("Wrong!Pass42"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::Crypto(_)), "got {}", err);
    assert!(!target.join("data").exists());
}

#[tokio::test]
async fn test_restore_detects_tampering() {
    let ctx = TestContext::new();
    let job = backup(&ctx, false).await;

    let mut bytes = fs::read(&job.backup_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&job.backup_path, bytes).unwrap();

    let err = ctx
        .manager()
        .restore_backup(&job.id, &ctx.temp_dir().join("restore"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Security(_)), "got {}", err);
}

#[tokio::test]
async fn test_restore_of_missing_artifact() {
    let ctx = TestContext::new();
    let job = backup(&ctx, false).await;
    fs::remove_file(&job.backup_path).unwrap();

    let err = ctx
        .manager()
        .restore_backup(&job.id, &ctx.temp_dir().join("restore"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "got {}", err);
}

#[tokio::test]
async fn test_restore_requires_completed_job() {
    let ctx = TestContext::new();
    let mut job = BackupJob::new("job-failed", "policy-1");
    job.status = JobStatus::Failed;
    ctx.catalog().save_job(&job).await.unwrap();

    let err = ctx
        .manager()
        .restore_backup(&job.id, &ctx.temp_dir().join("restore"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Validation(_)));

    let err = ctx
        .manager()
        .restore_backup("no-such-job", &ctx.temp_dir().join("restore"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
