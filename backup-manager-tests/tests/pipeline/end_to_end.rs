//! Full pipeline runs against the local filesystem backend

use backup_manager::utils::encryption::calculate_checksum;
use backup_manager::JobStatus;
use std::path::Path;
use test_utils::{
    sample_policy, ConfigBuilder, MockStorage, TestContext, LARGE_TREE_FILES, LARGE_TREE_SIZE,
    SOURCE_FILES,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_three_runs_with_retention_two() {
    let ctx = TestContext::new();
    let source = ctx.large_source_tree("data");
    let manager = ctx.manager();
    let token = CancellationToken::new();

    let mut policy = sample_policy(&source, &ctx.backup_destination(), 2);
    let mut first = manager.create_backup_job(&mut policy).await.unwrap();
    manager.execute_backup(&mut first, &token).await.unwrap();
    let (second, _) = manager.run_policy(&policy.id, &token).await.unwrap();
    let (third, result) = manager.run_policy(&policy.id, &token).await.unwrap();

    // The oldest artifact is gone, the two newest remain
    assert_eq!(ctx.stored_artifacts().len(), 2);
    assert!(!Path::new(&first.backup_path).exists());
    assert!(Path::new(&second.backup_path).exists());
    assert!(Path::new(&third.backup_path).exists());

    let catalog = ctx.catalog();
    assert_eq!(catalog.get_job(&first.id).await.unwrap().status, JobStatus::Deleted);
    assert!(catalog.get_result(&first.id).await.unwrap_err().is_not_found());
    let completed = catalog.get_completed_jobs(&policy.id, 10).await.unwrap();
    let ids: Vec<_> = completed.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec![third.id.as_str(), second.id.as_str()]);
    assert_eq!(catalog.get_backup_history(&policy.id, 10).await.unwrap().len(), 3);

    // Surviving artifacts still match their recorded checksums
    for job in [&second, &third] {
        let stored = catalog.get_result(&job.id).await.unwrap();
        assert_eq!(calculate_checksum(Path::new(&job.backup_path)).unwrap(), stored.checksum);
        assert_eq!(catalog.list_files(&job.id).await.unwrap().len(), LARGE_TREE_FILES);
    }

    assert_eq!(result.files_processed, LARGE_TREE_FILES as i64);
    assert_eq!(result.total_size, LARGE_TREE_SIZE as i64);
    // Random bytes barely compress; the gzip stream spans many deflate blocks
    assert!(result.compressed_size as u64 > LARGE_TREE_SIZE / 2);
    assert!(result.compressed);
    assert!(!result.encrypted);
    assert!(result.backup_path.ends_with(".tar.gz"));
    assert_eq!(ctx.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_checksums_are_recorded() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let manager = ctx.manager();

    let mut policy = sample_policy(&source, &ctx.backup_destination(), 3);
    let mut job = manager.create_backup_job(&mut policy).await.unwrap();
    let result = manager
        .execute_backup(&mut job, &CancellationToken::new())
        .await
        .unwrap();

    // Artifact checksum matches the uploaded file
    let stored = ctx.catalog().get_result(&job.id).await.unwrap();
    assert_eq!(stored.checksum, result.checksum);
    assert_eq!(
        calculate_checksum(Path::new(&job.backup_path)).unwrap(),
        stored.checksum
    );

    // One file row per source file, each with the source file's hash
    let files = ctx.catalog().list_files(&job.id).await.unwrap();
    assert_eq!(files.len(), SOURCE_FILES.len());
    for file in &files {
        assert!(file.processed);
        let original = source.join(&file.relative_path);
        assert_eq!(file.checksum, calculate_checksum(&original).unwrap());
        assert_eq!(file.file_size as u64, std::fs::metadata(&original).unwrap().len());
    }
}

#[tokio::test]
async fn test_uncompressed_policy_uploads_plain_tar() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let manager = ctx.manager();

    let mut policy = sample_policy(&source, &ctx.backup_destination(), 3);
    policy.archive_enabled = false;
    let mut job = manager.create_backup_job(&mut policy).await.unwrap();
    let result = manager
        .execute_backup(&mut job, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.backup_path.ends_with(".tar"));
    assert!(!result.compressed);
    let info = backup_manager::utils::archive::get_archive_info(Path::new(&result.backup_path))
        .unwrap();
    assert!(!info.compressed);
}

#[tokio::test]
async fn test_mirror_receives_copy() {
    let ctx = TestContext::from_builder(ConfigBuilder::new().add_local_mirror("mirror"));
    let source = ctx.source_tree("data");
    let manager = ctx.manager();

    let mut policy = sample_policy(&source, &ctx.backup_destination(), 3);
    let mut job = manager.create_backup_job(&mut policy).await.unwrap();
    manager
        .execute_backup(&mut job, &CancellationToken::new())
        .await
        .unwrap();

    assert!(Path::new(&job.backup_path).exists());
    // Local keys are absolute paths, so the mirror holds them under its own root
    let mirrored = ctx
        .temp_dir()
        .join("mirror")
        .join(job.backup_path.trim_start_matches('/'));
    assert!(mirrored.exists(), "missing mirror copy {}", mirrored.display());
}

#[tokio::test]
async fn test_object_store_destination_keys() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let mock = MockStorage::new();
    let manager = ctx.manager_with_mock(&mock);

    let mut policy = sample_policy(&source, "s3://backups/nightly/app", 3);
    policy.name = "app data".to_string();
    let mut job = manager.create_backup_job(&mut policy).await.unwrap();
    let result = manager
        .execute_backup(&mut job, &CancellationToken::new())
        .await
        .unwrap();

    let keys = mock.keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("nightly/app/app-data-"), "key {}", keys[0]);
    assert!(keys[0].ends_with(&format!("-{}.tar.gz", &job.id[..8])));
    assert_eq!(result.backup_path, format!("s3://backups/{}", keys[0]));
}

#[tokio::test]
async fn test_upload_failure_is_recorded() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let mock = MockStorage::new().with_failing_upload();
    let manager = ctx.manager_with_mock(&mock);

    let mut policy = sample_policy(&source, "s3://backups/nightly", 3);
    let mut job = manager.create_backup_job(&mut policy).await.unwrap();
    let err = manager
        .execute_backup(&mut job, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("upload phase failed"), "got {}", err);
    let stored = ctx.catalog().get_job(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.unwrap().contains("upload"));
    assert!(stored.completed_at.is_some());
    assert!(ctx.catalog().get_result(&job.id).await.unwrap_err().is_not_found());
    assert_eq!(ctx.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_missing_source_fails_in_scan() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let manager = ctx.manager();

    let mut policy = sample_policy(&source, &ctx.backup_destination(), 3);
    let mut job = manager.create_backup_job(&mut policy).await.unwrap();
    std::fs::remove_dir_all(&source).unwrap();

    let err = manager
        .execute_backup(&mut job, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("scan phase failed"), "got {}", err);
    assert_eq!(
        ctx.catalog().get_job(&job.id).await.unwrap().status,
        JobStatus::Failed
    );
}
