//! Retention engine - removes backups that fall outside a policy's limits
//!
//! Every strategy only deletes backups whose artifact is confirmed present
//! in storage. A failed delete is logged and skipped, so the strategies are
//! safe to re-run.

use chrono::{Duration as ChronoDuration, Utc};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::RetentionSettings;
use crate::error::{check_cancelled, Result};
use crate::storage::{Destination, StorageBackend, StorageProvider};
use crate::types::{BackupJob, BackupPolicy};

/// Prefix of pipeline working directories under the temp root
pub const WORKSPACE_PREFIX: &str = "backup-";

/// Workspaces younger than this are assumed to belong to a live run
pub const STALE_WORKSPACE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: usize,
    pub failed: usize,
}

impl RetentionReport {
    fn merge(&mut self, other: RetentionReport) {
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

#[derive(Clone)]
pub struct RetentionManager {
    catalog: Catalog,
    storage: StorageProvider,
    history_limit: usize,
}

impl RetentionManager {
    pub fn new(catalog: Catalog, storage: StorageProvider, history_limit: usize) -> Self {
        Self {
            catalog,
            storage,
            history_limit,
        }
    }

    /// Keep the newest `retention_count` verified backups of a policy
    pub async fn cleanup_old_backups(
        &self,
        policy: &BackupPolicy,
        cancel: &CancellationToken,
    ) -> Result<RetentionReport> {
        if policy.retention_count <= 0 {
            debug!(policy_id = %policy.id, "Unlimited retention, skipping cleanup");
            return Ok(RetentionReport::default());
        }
        let keep = policy.retention_count as usize;

        let storage = self.storage.for_location(&policy.destination_path).await?;
        let mut verified = self.verified_backups(policy, storage.as_ref(), cancel).await?;
        if verified.len() <= keep {
            debug!(
                policy_id = %policy.id,
                "{} verified backups within retention of {}",
                verified.len(),
                keep
            );
            return Ok(RetentionReport::default());
        }

        verified.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        let expired = verified.split_off(keep);

        info!(
            policy_id = %policy.id,
            "Retention keeps {} backups, removing {}",
            keep,
            expired.len()
        );
        self.delete_backups(storage.as_ref(), &expired, cancel).await
    }

    /// Delete verified backups of a policy older than `max_age`
    pub async fn apply_age_based_retention(
        &self,
        policy: &BackupPolicy,
        max_age: ChronoDuration,
        cancel: &CancellationToken,
    ) -> Result<RetentionReport> {
        let cutoff = Utc::now() - max_age;
        let storage = self.storage.for_location(&policy.destination_path).await?;
        let expired: Vec<BackupJob> = self
            .verified_backups(policy, storage.as_ref(), cancel)
            .await?
            .into_iter()
            .filter(|job| job.created_at < cutoff)
            .collect();

        if expired.is_empty() {
            return Ok(RetentionReport::default());
        }

        info!(
            policy_id = %policy.id,
            "Removing {} backups older than {}",
            expired.len(),
            cutoff
        );
        self.delete_backups(storage.as_ref(), &expired, cancel).await
    }

    /// Delete completed backups whose policy no longer exists
    pub async fn cleanup_orphaned_backups(&self, cancel: &CancellationToken) -> Result<RetentionReport> {
        let orphans = self.catalog.get_orphaned_jobs().await?;
        let mut report = RetentionReport::default();

        for job in orphans {
            check_cancelled(cancel, "orphan cleanup")?;
            let storage = match self.storage.for_location(&job.backup_path).await {
                Ok(storage) => storage,
                Err(e) => {
                    warn!(job_id = %job.id, "No storage for orphaned backup: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            match storage.exists(cancel, &object_key(&job)).await {
                Ok(true) => report.merge(self.delete_backups(storage.as_ref(), &[job], cancel).await?),
                Ok(false) => {
                    // Nothing left in storage, only the catalog rows remain
                    match self.catalog.mark_backup_deleted(&job.id).await {
                        Ok(()) => report.deleted += 1,
                        Err(e) => {
                            warn!(job_id = %job.id, "Failed to retire orphaned job: {}", e);
                            report.failed += 1;
                        }
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(job_id = %job.id, "Cannot verify orphaned backup: {}", e);
                    report.failed += 1;
                }
            }
        }

        if report.deleted > 0 {
            info!("Removed {} orphaned backups", report.deleted);
        }
        Ok(report)
    }

    /// Remove catalog rows of failed jobs older than `max_age`.
    /// Any artifact they left behind is deleted best-effort.
    pub async fn cleanup_failed_backups(
        &self,
        max_age: ChronoDuration,
        cancel: &CancellationToken,
    ) -> Result<RetentionReport> {
        let cutoff = Utc::now() - max_age;
        let failed = self.catalog.get_failed_jobs_before(cutoff).await?;
        let mut report = RetentionReport::default();

        for job in failed {
            check_cancelled(cancel, "failed job cleanup")?;

            if !job.backup_path.is_empty() {
                match self.storage.for_location(&job.backup_path).await {
                    Ok(storage) => {
                        if let Err(e) = storage.delete(cancel, &object_key(&job)).await {
                            debug!(job_id = %job.id, "Ignoring artifact delete failure: {}", e);
                        }
                    }
                    Err(e) => debug!(job_id = %job.id, "Ignoring storage lookup failure: {}", e),
                }
            }

            match self.catalog.delete_job(&job.id).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!(job_id = %job.id, "Failed to remove failed job: {}", e);
                    report.failed += 1;
                }
            }
        }

        if report.deleted > 0 {
            info!("Removed {} failed jobs", report.deleted);
        }
        Ok(report)
    }

    /// Remove pipeline working directories under `temp_root` untouched for `older_than`
    pub fn cleanup_temp_files(&self, temp_root: &Path, older_than: Duration) -> Result<usize> {
        if !temp_root.exists() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(temp_root)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(WORKSPACE_PREFIX) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }

            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    debug!("Removed stale workspace {:?}", entry.path());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove workspace {:?}: {}", entry.path(), e),
            }
        }

        if removed > 0 {
            info!("Removed {} stale working directories", removed);
        }
        Ok(removed)
    }

    /// Count-based retention across every stored policy
    pub async fn apply_retention_policies(&self, cancel: &CancellationToken) -> Result<RetentionReport> {
        let mut report = RetentionReport::default();
        for policy in self.catalog.get_all_policies().await? {
            match self.cleanup_old_backups(&policy, cancel).await {
                Ok(r) => report.merge(r),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(policy_id = %policy.id, "Retention failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Run every strategy plus the workspace sweep. Errors are logged, never returned.
    pub async fn run_maintenance(
        &self,
        settings: &RetentionSettings,
        temp_root: &Path,
        cancel: &CancellationToken,
    ) -> RetentionReport {
        let mut report = RetentionReport::default();

        match self.apply_retention_policies(cancel).await {
            Ok(r) => report.merge(r),
            Err(e) => {
                warn!("Count-based retention failed: {}", e);
                report.failed += 1;
            }
        }

        if let Some(days) = settings.max_age_days {
            match self.catalog.get_all_policies().await {
                Ok(policies) => {
                    for policy in policies {
                        let max_age = ChronoDuration::days(days as i64);
                        match self.apply_age_based_retention(&policy, max_age, cancel).await {
                            Ok(r) => report.merge(r),
                            Err(e) => {
                                warn!(policy_id = %policy.id, "Age-based retention failed: {}", e);
                                report.failed += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to list policies: {}", e);
                    report.failed += 1;
                }
            }
        }

        match self.cleanup_orphaned_backups(cancel).await {
            Ok(r) => report.merge(r),
            Err(e) => {
                warn!("Orphan cleanup failed: {}", e);
                report.failed += 1;
            }
        }

        let failed_age = ChronoDuration::hours(settings.failed_job_max_age_hours as i64);
        match self.cleanup_failed_backups(failed_age, cancel).await {
            Ok(r) => report.merge(r),
            Err(e) => {
                warn!("Failed job cleanup failed: {}", e);
                report.failed += 1;
            }
        }

        match self.cleanup_temp_files(temp_root, STALE_WORKSPACE_AGE) {
            Ok(n) => report.deleted += n,
            Err(e) => {
                warn!("Workspace sweep failed: {}", e);
                report.failed += 1;
            }
        }

        info!(
            deleted = report.deleted,
            failed = report.failed,
            "Maintenance finished"
        );
        report
    }

    /// Completed jobs of a policy whose artifact is confirmed present
    async fn verified_backups(
        &self,
        policy: &BackupPolicy,
        storage: &dyn StorageBackend,
        cancel: &CancellationToken,
    ) -> Result<Vec<BackupJob>> {
        let jobs = self
            .catalog
            .get_completed_jobs(&policy.id, self.history_limit)
            .await?;

        let mut verified = Vec::with_capacity(jobs.len());
        for job in jobs {
            check_cancelled(cancel, "retention")?;
            match storage.exists(cancel, &object_key(&job)).await {
                Ok(true) => verified.push(job),
                Ok(false) => warn!(job_id = %job.id, path = %job.backup_path, "Backup artifact missing from storage"),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!(job_id = %job.id, "Cannot verify backup artifact: {}", e),
            }
        }
        Ok(verified)
    }

    async fn delete_backups(
        &self,
        storage: &dyn StorageBackend,
        jobs: &[BackupJob],
        cancel: &CancellationToken,
    ) -> Result<RetentionReport> {
        let mut report = RetentionReport::default();
        for job in jobs {
            check_cancelled(cancel, "retention")?;
            match self.delete_backup(storage, job, cancel).await {
                Ok(()) => {
                    info!(job_id = %job.id, path = %job.backup_path, "Deleted backup");
                    report.deleted += 1;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(job_id = %job.id, "Failed to delete backup: {}", e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn delete_backup(
        &self,
        storage: &dyn StorageBackend,
        job: &BackupJob,
        cancel: &CancellationToken,
    ) -> Result<()> {
        storage.delete(cancel, &object_key(job)).await?;
        self.catalog.mark_backup_deleted(&job.id).await
    }
}

/// Remote key of a job's artifact
fn object_key(job: &BackupJob) -> String {
    Destination::parse(&job.backup_path).object_key()
}
