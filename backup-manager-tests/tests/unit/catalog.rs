//! Unit tests for the SQLite catalog on disk

use backup_manager::{BackupError, BackupFileRecord, BackupJob, BackupResult, Catalog, JobStatus};
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use test_utils::{sample_policy, TestContext};

fn completed_job(id: &str, policy_id: &str, age_minutes: i64) -> BackupJob {
    let mut job = BackupJob::new(id, policy_id);
    job.status = JobStatus::Completed;
    job.created_at = Utc::now() - ChronoDuration::minutes(age_minutes);
    job.started_at = Some(job.created_at);
    job.completed_at = Some(job.created_at + ChronoDuration::seconds(5));
    job.backup_path = format!("/backups/{}.tar.gz", id);
    job.files_processed = 2;
    job.total_size = 64;
    job
}

fn result_for(job: &BackupJob) -> BackupResult {
    BackupResult {
        job_id: job.id.clone(),
        backup_path: job.backup_path.clone(),
        files_processed: job.files_processed,
        total_size: job.total_size,
        compressed_size: 40,
        compression_ratio: 1.6,
        encrypted: false,
        compressed: true,
        checksum: "ab".repeat(32),
        duration: Duration::from_secs(7),
    }
}

fn file_record(relative: &str) -> BackupFileRecord {
    BackupFileRecord {
        file_path: format!("/data/{}", relative),
        relative_path: relative.to_string(),
        file_size: 32,
        checksum: "cd".repeat(32),
        processed: true,
    }
}

#[tokio::test]
async fn test_catalog_survives_reopen() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let path = ctx.config().database.path.clone();

    let mut policy = sample_policy(&source, "/backups", 2);
    policy.id = "policy-1".to_string();
    policy.encryption_enabled = true;
    policy.encryption_password = "Str0ng!Pass".to_string();
    ctx.catalog().save_policy(&policy).await.unwrap();

    let job = completed_job("job-1", "policy-1", 1);
    ctx.catalog()
        .record_completion(&job, &result_for(&job), &[file_record("b.txt"), file_record("a.txt")])
        .await
        .unwrap();

    let reopened = Catalog::open(&path).unwrap();
    let stored = reopened.get_policy("policy-1").await.unwrap();
    assert_eq!(stored.name, "fixture-backup");
    assert_eq!(stored.encryption_password, "Str0ng!Pass");
    assert_eq!(stored.created_at, policy.created_at);

    let result = reopened.get_result("job-1").await.unwrap();
    assert_eq!(result.duration, Duration::from_secs(7));
    assert!(result.compressed);

    let files = reopened.list_files("job-1").await.unwrap();
    let names: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn test_listing_hides_passwords() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");

    let mut policy = sample_policy(&source, "/backups", 2);
    policy.id = "policy-1".to_string();
    policy.encryption_enabled = true;
    policy.encryption_password = "Str0ng!Pass".to_string();
    ctx.catalog().save_policy(&policy).await.unwrap();

    let all = ctx.catalog().get_all_policies().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].encryption_password.is_empty());
}

#[tokio::test]
async fn test_history_is_newest_first_and_bounded() {
    let catalog = Catalog::open_in_memory().unwrap();
    for (id, age) in [("old", 30), ("newest", 1), ("middle", 10)] {
        catalog.save_job(&completed_job(id, "policy-1", age)).await.unwrap();
    }
    catalog.save_job(&completed_job("other", "policy-2", 0)).await.unwrap();

    let history = catalog.get_backup_history("policy-1", 10).await.unwrap();
    let ids: Vec<_> = history.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["newest", "middle", "old"]);

    let bounded = catalog.get_backup_history("policy-1", 2).await.unwrap();
    assert_eq!(bounded.len(), 2);
}

#[tokio::test]
async fn test_delete_policy_cascades() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");

    let mut policy = sample_policy(&source, "/backups", 2);
    policy.id = "policy-1".to_string();
    ctx.catalog().save_policy(&policy).await.unwrap();

    let job = completed_job("job-1", "policy-1", 1);
    ctx.catalog()
        .record_completion(&job, &result_for(&job), &[file_record("a.txt")])
        .await
        .unwrap();

    ctx.catalog().delete_policy("policy-1").await.unwrap();

    assert!(ctx.catalog().get_policy("policy-1").await.unwrap_err().is_not_found());
    assert!(ctx.catalog().get_job("job-1").await.unwrap_err().is_not_found());
    assert!(ctx.catalog().list_files("job-1").await.unwrap().is_empty());

    let again = ctx.catalog().delete_policy("policy-1").await.unwrap_err();
    assert!(matches!(again, BackupError::NotFound(_)));
}

#[tokio::test]
async fn test_mark_deleted_keeps_job_row() {
    let catalog = Catalog::open_in_memory().unwrap();
    let job = completed_job("job-1", "policy-1", 1);
    catalog
        .record_completion(&job, &result_for(&job), &[file_record("a.txt")])
        .await
        .unwrap();

    catalog.mark_backup_deleted("job-1").await.unwrap();

    let stored = catalog.get_job("job-1").await.unwrap();
    assert_eq!(stored.status, JobStatus::Deleted);
    assert!(catalog.get_result("job-1").await.unwrap_err().is_not_found());
    assert!(catalog.list_files("job-1").await.unwrap().is_empty());
    assert!(catalog.get_completed_jobs("policy-1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_jobs_before_cutoff() {
    let catalog = Catalog::open_in_memory().unwrap();

    let mut stale = BackupJob::new("stale", "policy-1");
    stale.status = JobStatus::Failed;
    stale.created_at = Utc::now() - ChronoDuration::days(10);
    catalog.save_job(&stale).await.unwrap();

    let mut fresh = BackupJob::new("fresh", "policy-1");
    fresh.status = JobStatus::Failed;
    catalog.save_job(&fresh).await.unwrap();

    let found = catalog
        .get_failed_jobs_before(Utc::now() - ChronoDuration::days(7))
        .await
        .unwrap();
    let ids: Vec<_> = found.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["stale"]);
}
