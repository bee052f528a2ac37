//! SQLite catalog of policies, jobs, results and per-file records.
//!
//! One connection is shared behind an async mutex. Every multi-statement
//! mutation runs inside a transaction that is committed only after all of
//! its statements succeed.

mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{BackupError, Result};
use crate::types::{BackupFileRecord, BackupJob, BackupPolicy, BackupResult, JobStatus};

const POLICY_COLUMNS: &str = "id, name, source_path, destination_path, schedule_cron, \
     retention_count, archive_enabled, encryption_enabled, encryption_password, \
     created_at, updated_at";

const JOB_COLUMNS: &str = "id, policy_id, status, started_at, completed_at, error, \
     files_processed, total_size, backup_path, created_at";

/// Handle to the backup catalog; clones share one connection
#[derive(Clone)]
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    /// Open (or create) the catalog database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("Opened catalog at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // --- policies ---

    /// Insert or update a policy; `created_at` of an existing row is kept
    pub async fn save_policy(&self, policy: &BackupPolicy) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO backup_policies (
                id, name, source_path, destination_path, schedule_cron,
                retention_count, archive_enabled, encryption_enabled, encryption_password,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                source_path = excluded.source_path,
                destination_path = excluded.destination_path,
                schedule_cron = excluded.schedule_cron,
                retention_count = excluded.retention_count,
                archive_enabled = excluded.archive_enabled,
                encryption_enabled = excluded.encryption_enabled,
                encryption_password = excluded.encryption_password,
                updated_at = excluded.updated_at",
            params![
                policy.id,
                policy.name,
                policy.source_path,
                policy.destination_path,
                policy.schedule,
                policy.retention_count,
                policy.archive_enabled,
                policy.encryption_enabled,
                policy.encryption_password,
                policy.created_at,
                Utc::now(),
            ],
        )?;

        info!(policy_id = %policy.id, name = %policy.name, "Backup policy saved");
        Ok(())
    }

    pub async fn get_policy(&self, policy_id: &str) -> Result<BackupPolicy> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {} FROM backup_policies WHERE id = ?1", POLICY_COLUMNS),
            params![policy_id],
            policy_from_row,
        )
        .optional()?
        .ok_or_else(|| BackupError::NotFound(format!("policy {} not found", policy_id)))
    }

    /// All policies, newest first. Passphrases are not loaded.
    pub async fn get_all_policies(&self) -> Result<Vec<BackupPolicy>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM backup_policies ORDER BY created_at DESC",
            POLICY_COLUMNS
        ))?;
        let policies = stmt
            .query_map([], |row| {
                let mut policy = policy_from_row(row)?;
                policy.encryption_password.clear();
                Ok(policy)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(policies)
    }

    /// Remove a policy with all of its jobs, results and file records
    pub async fn delete_policy(&self, policy_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM backup_policies WHERE id = ?1)",
            params![policy_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(BackupError::NotFound(format!("policy {} not found", policy_id)));
        }

        tx.execute(
            "DELETE FROM backup_files WHERE job_id IN (SELECT id FROM backup_jobs WHERE policy_id = ?1)",
            params![policy_id],
        )?;
        tx.execute(
            "DELETE FROM backup_results WHERE job_id IN (SELECT id FROM backup_jobs WHERE policy_id = ?1)",
            params![policy_id],
        )?;
        tx.execute("DELETE FROM backup_jobs WHERE policy_id = ?1", params![policy_id])?;
        tx.execute("DELETE FROM backup_policies WHERE id = ?1", params![policy_id])?;
        tx.commit()?;

        info!(policy_id, "Backup policy deleted");
        Ok(())
    }

    // --- jobs ---

    pub async fn save_job(&self, job: &BackupJob) -> Result<()> {
        let conn = self.conn.lock().await;
        upsert_job(&conn, job)?;
        debug!(job_id = %job.id, status = %job.status, "Job saved");
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<BackupJob> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {} FROM backup_jobs WHERE id = ?1", JOB_COLUMNS),
            params![job_id],
            job_from_row,
        )
        .optional()?
        .ok_or_else(|| BackupError::NotFound(format!("job {} not found", job_id)))
    }

    /// Most recent jobs of a policy, newest first, at most `limit` rows
    pub async fn get_backup_history(&self, policy_id: &str, limit: usize) -> Result<Vec<BackupJob>> {
        self.query_jobs(
            &format!(
                "SELECT {} FROM backup_jobs WHERE policy_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
                JOB_COLUMNS
            ),
            params![policy_id, limit as i64],
        )
        .await
    }

    /// Completed jobs of a policy, newest first, at most `limit` rows
    pub async fn get_completed_jobs(&self, policy_id: &str, limit: usize) -> Result<Vec<BackupJob>> {
        self.query_jobs(
            &format!(
                "SELECT {} FROM backup_jobs WHERE policy_id = ?1 AND status = 'completed'
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
                JOB_COLUMNS
            ),
            params![policy_id, limit as i64],
        )
        .await
    }

    /// Completed jobs whose policy row no longer exists
    pub async fn get_orphaned_jobs(&self) -> Result<Vec<BackupJob>> {
        self.query_jobs(
            "SELECT j.id, j.policy_id, j.status, j.started_at, j.completed_at, j.error,
                    j.files_processed, j.total_size, j.backup_path, j.created_at
             FROM backup_jobs j
             LEFT JOIN backup_policies p ON j.policy_id = p.id
             WHERE p.id IS NULL AND j.status = 'completed'
             ORDER BY j.created_at",
            [],
        )
        .await
    }

    /// Failed jobs created before `cutoff`
    pub async fn get_failed_jobs_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupJob>> {
        self.query_jobs(
            &format!(
                "SELECT {} FROM backup_jobs WHERE status = 'failed' AND created_at < ?1
                 ORDER BY created_at",
                JOB_COLUMNS
            ),
            params![cutoff],
        )
        .await
    }

    async fn query_jobs<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<BackupJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let jobs = stmt
            .query_map(params, job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Drop a retired backup's result and file rows and mark the job `deleted`
    pub async fn mark_backup_deleted(&self, job_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        delete_job_children(&tx, job_id)?;
        let updated = tx.execute(
            "UPDATE backup_jobs SET status = ?1 WHERE id = ?2",
            params![JobStatus::Deleted.as_str(), job_id],
        )?;
        if updated == 0 {
            return Err(BackupError::NotFound(format!("job {} not found", job_id)));
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove a job with its result and file rows
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        delete_job_children(&tx, job_id)?;
        let deleted = tx.execute("DELETE FROM backup_jobs WHERE id = ?1", params![job_id])?;
        if deleted == 0 {
            return Err(BackupError::NotFound(format!("job {} not found", job_id)));
        }
        tx.commit()?;
        Ok(())
    }

    // --- results and files ---

    pub async fn save_result(&self, result: &BackupResult) -> Result<()> {
        let conn = self.conn.lock().await;
        insert_result(&conn, result)?;
        Ok(())
    }

    pub async fn get_result(&self, job_id: &str) -> Result<BackupResult> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT job_id, backup_path, files_processed, total_size, compressed_size,
                    compression_ratio, encrypted, compressed, checksum, duration_seconds
             FROM backup_results WHERE job_id = ?1",
            params![job_id],
            |row| {
                let duration: i64 = row.get(9)?;
                Ok(BackupResult {
                    job_id: row.get(0)?,
                    backup_path: row.get(1)?,
                    files_processed: row.get(2)?,
                    total_size: row.get(3)?,
                    compressed_size: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
                    compression_ratio: row.get::<_, Option<f64>>(5)?.unwrap_or_default(),
                    encrypted: row.get::<_, Option<bool>>(6)?.unwrap_or_default(),
                    compressed: row.get::<_, Option<bool>>(7)?.unwrap_or_default(),
                    checksum: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                    duration: Duration::from_secs(duration.max(0) as u64),
                })
            },
        )
        .optional()?
        .ok_or_else(|| BackupError::NotFound(format!("result for job {} not found", job_id)))
    }

    pub async fn save_files(&self, job_id: &str, files: &[BackupFileRecord]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        insert_files(&tx, job_id, files)?;
        tx.commit()?;
        Ok(())
    }

    pub async fn list_files(&self, job_id: &str) -> Result<Vec<BackupFileRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT file_path, relative_path, file_size, checksum, processed
             FROM backup_files WHERE job_id = ?1 ORDER BY relative_path",
        )?;
        let files = stmt
            .query_map(params![job_id], |row| {
                Ok(BackupFileRecord {
                    file_path: row.get(0)?,
                    relative_path: row.get(1)?,
                    file_size: row.get(2)?,
                    checksum: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    processed: row.get::<_, Option<bool>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Persist a finished job together with its result and file records
    pub async fn record_completion(
        &self,
        job: &BackupJob,
        result: &BackupResult,
        files: &[BackupFileRecord],
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        upsert_job(&tx, job)?;
        insert_result(&tx, result)?;
        insert_files(&tx, &job.id, files)?;
        tx.commit()?;
        debug!(job_id = %job.id, files = files.len(), "Job completion recorded");
        Ok(())
    }
}

fn upsert_job(conn: &Connection, job: &BackupJob) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO backup_jobs (
            id, policy_id, status, started_at, completed_at, error,
            files_processed, total_size, backup_path, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at,
            error = excluded.error,
            files_processed = excluded.files_processed,
            total_size = excluded.total_size,
            backup_path = excluded.backup_path",
        params![
            job.id,
            job.policy_id,
            job.status.as_str(),
            job.started_at,
            job.completed_at,
            job.error,
            job.files_processed,
            job.total_size,
            job.backup_path,
            job.created_at,
        ],
    )
}

fn insert_result(conn: &Connection, result: &BackupResult) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR REPLACE INTO backup_results (
            id, job_id, backup_path, files_processed, total_size,
            compressed_size, compression_ratio, encrypted, compressed,
            checksum, duration_seconds, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            format!("result_{}", result.job_id),
            result.job_id,
            result.backup_path,
            result.files_processed,
            result.total_size,
            result.compressed_size,
            result.compression_ratio,
            result.encrypted,
            result.compressed,
            result.checksum,
            result.duration.as_secs() as i64,
            Utc::now(),
        ],
    )
}

fn insert_files(tx: &Transaction<'_>, job_id: &str, files: &[BackupFileRecord]) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO backup_files (
            id, job_id, file_path, relative_path, file_size, checksum, processed, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    let now = Utc::now();
    for file in files {
        stmt.execute(params![
            uuid::Uuid::new_v4().to_string(),
            job_id,
            file.file_path,
            file.relative_path,
            file.file_size,
            file.checksum,
            file.processed,
            now,
        ])?;
    }
    Ok(())
}

fn delete_job_children(tx: &Transaction<'_>, job_id: &str) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM backup_files WHERE job_id = ?1", params![job_id])?;
    tx.execute("DELETE FROM backup_results WHERE job_id = ?1", params![job_id])?;
    Ok(())
}

fn policy_from_row(row: &Row<'_>) -> rusqlite::Result<BackupPolicy> {
    Ok(BackupPolicy {
        id: row.get(0)?,
        name: row.get(1)?,
        source_path: row.get(2)?,
        destination_path: row.get(3)?,
        schedule: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        retention_count: row.get::<_, Option<i64>>(5)?.unwrap_or(1),
        archive_enabled: row.get::<_, Option<bool>>(6)?.unwrap_or(true),
        encryption_enabled: row.get::<_, Option<bool>>(7)?.unwrap_or(false),
        encryption_password: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        status: Default::default(),
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<BackupJob> {
    let status: String = row.get(2)?;
    let status = status.parse::<JobStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    Ok(BackupJob {
        id: row.get(0)?,
        policy_id: row.get(1)?,
        status,
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        error: row.get(5)?,
        files_processed: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
        total_size: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
        backup_path: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        created_at: row.get(9)?,
    })
}
