//! Backup manager - orchestrates backup execution
//!
//! A run moves through scan, copy, archive, encrypt, checksum, upload and
//! persist, checking the cancellation token before every phase and inside
//! every per-file or per-chunk loop. Codec work runs on the blocking pool.
//! The working directory is removed on every exit path.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::config::{validate_policy, Config};
use crate::error::{check_cancelled, BackupError, Phase, Result};
use crate::managers::logging::BackupLogger;
use crate::managers::retention::{RetentionManager, WORKSPACE_PREFIX};
use crate::storage::{Destination, StorageBackend, StorageProvider};
use crate::types::{BackupFileRecord, BackupJob, BackupPolicy, BackupResult, JobStatus};
use crate::utils::archive::{create_archive, create_tarball, extract_archive};
use crate::utils::encryption::{calculate_checksum, decrypt_file, encrypt_file};
use crate::utils::locker::PolicyLock;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

pub struct BackupManager {
    config: Config,
    catalog: Catalog,
    storage: StorageProvider,
    retention: RetentionManager,
}

impl BackupManager {
    /// Create a manager that builds storage backends from each policy's destination
    pub fn new(config: Config, catalog: Catalog) -> Self {
        let storage = StorageProvider::Configured(config.storage.clone());
        Self::with_provider(config, catalog, storage)
    }

    /// Create a manager that sends every artifact to one backend
    pub fn with_storage(config: Config, catalog: Catalog, storage: Arc<dyn StorageBackend>) -> Self {
        Self::with_provider(config, catalog, StorageProvider::Fixed(storage))
    }

    fn with_provider(config: Config, catalog: Catalog, storage: StorageProvider) -> Self {
        let retention = RetentionManager::new(
            catalog.clone(),
            storage.clone(),
            config.pipeline.history_limit,
        );
        Self {
            config,
            catalog,
            storage,
            retention,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn retention(&self) -> &RetentionManager {
        &self.retention
    }

    /// Validate and store a policy, then register a pending job for it.
    /// Missing ids and names are filled in.
    pub async fn create_backup_job(&self, policy: &mut BackupPolicy) -> Result<BackupJob> {
        if policy.id.is_empty() {
            policy.id = uuid::Uuid::new_v4().to_string();
        }
        if policy.name.is_empty() {
            let base = Path::new(&policy.source_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "source".to_string());
            policy.name = format!("backup-{}", base);
        }

        validate_policy(policy, &self.config.retention)?;
        self.catalog.save_policy(policy).await?;

        let job = BackupJob::new(uuid::Uuid::new_v4().to_string(), policy.id.clone());
        self.catalog.save_job(&job).await?;

        info!(job_id = %job.id, policy_id = %policy.id, "Backup job created");
        Ok(job)
    }

    /// Create and execute a job for a stored policy
    pub async fn run_policy(
        &self,
        policy_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(BackupJob, BackupResult)> {
        let mut policy = self.catalog.get_policy(policy_id).await?;
        let mut job = self.create_backup_job(&mut policy).await?;
        let result = self.execute_backup(&mut job, cancel).await?;
        Ok((job, result))
    }

    /// Run the pipeline for a pending job.
    ///
    /// Only `pending` jobs are accepted. On success the job, result and file
    /// rows are stored together and count-based retention runs for the
    /// policy; retention errors are only logged. On failure the job is stored as `failed` (or `cancelled`) with
    /// the error text and the error is returned.
    pub async fn execute_backup(
        &self,
        job: &mut BackupJob,
        cancel: &CancellationToken,
    ) -> Result<BackupResult> {
        // A job reaches a terminal state exactly once
        if job.status != JobStatus::Pending {
            return Err(BackupError::Validation(format!(
                "job {} is {}, only pending jobs can be executed",
                job.id, job.status
            )));
        }

        let logger = BackupLogger::new(&job.id, &job.policy_id);

        let policy = match self.catalog.get_policy(&job.policy_id).await {
            Ok(policy) => policy,
            Err(e) => return Err(self.fail_job(job, e, &logger).await),
        };

        let _lock = match PolicyLock::acquire(&self.config.pipeline.lock_root(), &policy.id) {
            Ok(lock) => lock,
            Err(e) => return Err(self.fail_job(job, e, &logger).await),
        };

        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.error = None;
        self.catalog.save_job(job).await?;
        logger.log_backup_start(&policy.source_path, &policy.destination_path);

        let output = match self.run_in_workspace(&policy, &job.id, &logger, cancel).await {
            Ok(output) => output,
            Err(e) => return Err(self.fail_job(job, e, &logger).await),
        };

        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.files_processed = output.result.files_processed;
        job.total_size = output.result.total_size;
        job.backup_path = output.result.backup_path.clone();

        if let Err(e) = self
            .catalog
            .record_completion(job, &output.result, &output.files)
            .await
        {
            return Err(self.fail_job(job, e.in_phase(Phase::Persist), &logger).await);
        }
        logger.log_backup_complete(&output.result);

        match self.retention.cleanup_old_backups(&policy, cancel).await {
            Ok(report) if report.deleted > 0 || report.failed > 0 => info!(
                policy_id = %policy.id,
                deleted = report.deleted,
                failed = report.failed,
                "Retention applied"
            ),
            Ok(_) => {}
            Err(e) => warn!(policy_id = %policy.id, "Retention failed after backup: {}", e),
        }

        Ok(output.result)
    }

    /// Download, verify and unpack a completed backup into `target_dir`.
    /// Encrypted artifacts use `passphrase`, falling back to the policy's.
    /// Returns the number of extracted entries.
    pub async fn restore_backup(
        &self,
        job_id: &str,
        target_dir: &Path,
        passphrase: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let job = self.catalog.get_job(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(BackupError::Validation(format!(
                "job {} is {}, only completed backups can be restored",
                job_id, job.status
            )));
        }
        let result = self.catalog.get_result(job_id).await?;

        let storage = self.storage.for_location(&job.backup_path).await?;
        let key = Destination::parse(&job.backup_path).object_key();
        let workspace = self.create_workspace()?;

        let file_name = Path::new(&key)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "artifact".into());
        let downloaded = workspace.path().join(file_name);
        storage.download(cancel, &key, &downloaded).await?;
        info!(job_id, "Downloaded {} from {}", key, storage.name());

        let path = downloaded.clone();
        let checksum = run_blocking(move || calculate_checksum(&path)).await?;
        if !result.checksum.is_empty() && checksum != result.checksum {
            return Err(BackupError::Security(format!(
                "checksum mismatch for job {}: expected {}, got {}",
                job_id, result.checksum, checksum
            )));
        }

        let archive = if result.encrypted {
            let password = match passphrase {
                Some(p) if !p.is_empty() => p.to_string(),
                _ => self
                    .catalog
                    .get_policy(&job.policy_id)
                    .await
                    .ok()
                    .map(|policy| policy.encryption_password)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        BackupError::Validation(
                            "a passphrase is required to restore this encrypted backup".to_string(),
                        )
                    })?,
            };

            let decrypted = workspace.path().join("decrypted.tar");
            let (input, output, token) = (downloaded.clone(), decrypted.clone(), cancel.clone());
            run_blocking(move || decrypt_file(&input, &output, &password, &token)).await?;
            decrypted
        } else {
            downloaded
        };

        let (target, token) = (target_dir.to_path_buf(), cancel.clone());
        let entries = run_blocking(move || extract_archive(&archive, &target, &token)).await?;

        info!(job_id, entries, target = %target_dir.display(), "Backup restored");
        Ok(entries)
    }

    async fn fail_job(&self, job: &mut BackupJob, err: BackupError, logger: &BackupLogger) -> BackupError {
        job.status = if err.is_cancelled() {
            JobStatus::Cancelled
        } else {
            JobStatus::Failed
        };
        job.error = Some(err.to_string());
        job.completed_at = Some(Utc::now());

        if let Err(e) = self.catalog.save_job(job).await {
            warn!(job_id = %job.id, "Failed to record job failure: {}", e);
        }
        logger.log_backup_error(&err);
        err
    }

    fn create_workspace(&self) -> Result<TempDir> {
        let temp_root = self.config.pipeline.temp_root();
        fs::create_dir_all(&temp_root)?;
        Ok(tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&temp_root)?)
    }

    /// The workspace lives exactly as long as this call
    async fn run_in_workspace(
        &self,
        policy: &BackupPolicy,
        job_id: &str,
        logger: &BackupLogger,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        let workspace = self.create_workspace().map_err(|e| e.in_phase(Phase::Scan))?;
        debug!(job_id, workspace = %workspace.path().display(), "Workspace created");
        self.run_pipeline(policy, job_id, workspace.path(), logger, cancel)
            .await
    }

    async fn run_pipeline(
        &self,
        policy: &BackupPolicy,
        job_id: &str,
        workspace: &Path,
        logger: &BackupLogger,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        let started = Instant::now();

        // Scan
        check_cancelled(cancel, "scan").map_err(|e| e.in_phase(Phase::Scan))?;
        let (source, token) = (PathBuf::from(&policy.source_path), cancel.clone());
        let scan = run_blocking(move || scan_source(&source, &token))
            .await
            .map_err(|e| e.in_phase(Phase::Scan))?;
        let (file_count, total_size) = (scan.file_count, scan.total_size);
        logger.log_backup_progress(
            Phase::Scan,
            &format!("Found {} files ({} bytes)", file_count, total_size),
        );

        // Copy
        check_cancelled(cancel, "copy").map_err(|e| e.in_phase(Phase::Copy))?;
        let work_dir = workspace.join("work").join(&scan.base_name);
        let (dest, token) = (work_dir.clone(), cancel.clone());
        let files = run_blocking(move || copy_tree(&scan, &dest, &token))
            .await
            .map_err(|e| e.in_phase(Phase::Copy))?;
        logger.log_backup_progress(Phase::Copy, &format!("Copied {} files", files.len()));

        // Archive; a plain tar when compression is off keeps the artifact a single file
        check_cancelled(cancel, "archive").map_err(|e| e.in_phase(Phase::Archive))?;
        let base_name = artifact_base_name(policy, job_id);
        let extension = if policy.archive_enabled { "tar.gz" } else { "tar" };
        let archive_path = workspace.join(format!("{}.{}", base_name, extension));
        let (source, output, token) = (work_dir.clone(), archive_path.clone(), cancel.clone());
        let level = self.config.compression.level;
        let compress = policy.archive_enabled;
        run_blocking(move || {
            if compress {
                create_archive(&source, &output, level, &token)
            } else {
                create_tarball(&source, &output, &token)
            }
        })
        .await
        .map_err(|e| e.in_phase(Phase::Archive))?;

        let compressed_size = fs::metadata(&archive_path)
            .map_err(|e| BackupError::from(e).in_phase(Phase::Archive))?
            .len();
        let compression_ratio = if compressed_size > 0 {
            total_size as f64 / compressed_size as f64
        } else {
            0.0
        };
        logger.log_backup_progress(
            Phase::Archive,
            &format!("Archive is {} bytes (ratio {:.2})", compressed_size, compression_ratio),
        );

        // Encrypt
        let artifact = if policy.encryption_enabled {
            check_cancelled(cancel, "encrypt").map_err(|e| e.in_phase(Phase::Encrypt))?;
            let encrypted = workspace.join(format!("{}.{}.enc", base_name, extension));
            let (input, output, token) = (archive_path.clone(), encrypted.clone(), cancel.clone());
            let password = policy.encryption_password.clone();
            let options = self.config.encryption.options();
            run_blocking(move || encrypt_file(&input, &output, &password, &options, &token))
                .await
                .map_err(|e| e.in_phase(Phase::Encrypt))?;
            if let Err(e) = fs::remove_file(&archive_path) {
                debug!("Failed to remove plaintext archive: {}", e);
            }
            logger.log_backup_progress(Phase::Encrypt, "Artifact encrypted");
            encrypted
        } else {
            archive_path
        };

        // Checksum
        check_cancelled(cancel, "checksum").map_err(|e| e.in_phase(Phase::Checksum))?;
        let path = artifact.clone();
        let checksum = run_blocking(move || calculate_checksum(&path))
            .await
            .map_err(|e| e.in_phase(Phase::Checksum))?;

        // Upload
        check_cancelled(cancel, "upload").map_err(|e| e.in_phase(Phase::Upload))?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BackupError::Internal("artifact has no file name".to_string()))?;
        let destination = Destination::parse(&policy.destination_path);
        let remote_path = destination.remote_path(&file_name);
        let storage = self
            .storage
            .for_location(&policy.destination_path)
            .await
            .map_err(|e| e.in_phase(Phase::Upload))?;
        storage
            .upload(cancel, &artifact, &remote_path)
            .await
            .map_err(|e| e.in_phase(Phase::Upload))?;
        logger.log_backup_progress(
            Phase::Upload,
            &format!("Uploaded {} to {}", remote_path, storage.name()),
        );

        let result = BackupResult {
            job_id: job_id.to_string(),
            backup_path: destination.location(&file_name),
            files_processed: file_count as i64,
            total_size: total_size as i64,
            compressed_size: compressed_size as i64,
            compression_ratio,
            encrypted: policy.encryption_enabled,
            compressed: policy.archive_enabled,
            checksum,
            duration: started.elapsed(),
        };

        Ok(PipelineOutput { result, files })
    }
}

struct PipelineOutput {
    result: BackupResult,
    files: Vec<BackupFileRecord>,
}

struct ScanEntry {
    path: PathBuf,
    relative: PathBuf,
    is_dir: bool,
    size: u64,
}

struct SourceScan {
    base_name: String,
    entries: Vec<ScanEntry>,
    file_count: u64,
    total_size: u64,
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackupError::Internal(format!("blocking task failed: {}", e)))?
}

/// `<policy name with dashes>-<YYYYMMDD-HHMMSS>-<job id prefix>`
fn artifact_base_name(policy: &BackupPolicy, job_id: &str) -> String {
    let name: String = policy
        .name
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' || c == '\\' { '-' } else { c })
        .collect();
    let short_id: String = job_id.chars().take(8).collect();
    format!("{}-{}-{}", name, Utc::now().format("%Y%m%d-%H%M%S"), short_id)
}

/// Enumerate the source tree; symlinks are not followed
fn scan_source(source: &Path, cancel: &CancellationToken) -> Result<SourceScan> {
    if !source.is_dir() {
        return Err(BackupError::Validation(format!(
            "source path is not a directory: {}",
            source.display()
        )));
    }

    let base_name = source
        .canonicalize()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());

    let mut scan = SourceScan {
        base_name,
        entries: Vec::new(),
        file_count: 0,
        total_size: 0,
    };

    for entry in WalkDir::new(source).min_depth(1) {
        check_cancelled(cancel, "scan")?;
        let entry = entry?;
        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            debug!("Skipping special file {}", entry.path().display());
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| BackupError::Internal(format!("{} escaped the source tree", entry.path().display())))?
            .to_path_buf();
        let size = if file_type.is_file() {
            entry.metadata()?.len()
        } else {
            0
        };

        if file_type.is_file() {
            scan.file_count += 1;
            scan.total_size += size;
        }
        scan.entries.push(ScanEntry {
            path: entry.path().to_path_buf(),
            relative,
            is_dir: file_type.is_dir(),
            size,
        });
    }

    Ok(scan)
}

/// Copy scanned entries under `dest`, hashing each file on the way
fn copy_tree(scan: &SourceScan, dest: &Path, cancel: &CancellationToken) -> Result<Vec<BackupFileRecord>> {
    fs::create_dir_all(dest)?;
    let mut records = Vec::with_capacity(scan.file_count as usize);

    for entry in &scan.entries {
        check_cancelled(cancel, "copy")?;
        let target = dest.join(&entry.relative);

        if entry.is_dir {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let checksum = copy_file_hashed(&entry.path, &target, cancel)?;
        if let Ok(metadata) = fs::metadata(&entry.path) {
            fs::set_permissions(&target, metadata.permissions())?;
        }

        records.push(BackupFileRecord {
            file_path: entry.path.to_string_lossy().into_owned(),
            relative_path: entry.relative.to_string_lossy().replace('\\', "/"),
            file_size: entry.size as i64,
            checksum,
            processed: true,
        });
    }

    Ok(records)
}

fn copy_file_hashed(from: &Path, to: &Path, cancel: &CancellationToken) -> Result<String> {
    let mut reader = BufReader::new(File::open(from)?);
    let mut writer = BufWriter::new(File::create(to)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        check_cancelled(cancel, "copy")?;
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
    }
    writer.flush()?;

    Ok(hex::encode(hasher.finalize()))
}
