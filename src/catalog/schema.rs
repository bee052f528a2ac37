//! Catalog schema. Table and column names are shared with existing
//! databases, so changes here must stay additive.

use rusqlite::Connection;

pub(crate) const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS backup_policies (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        source_path TEXT NOT NULL,
        destination_path TEXT NOT NULL,
        schedule_cron TEXT,
        retention_count INTEGER DEFAULT 1,
        archive_enabled BOOLEAN DEFAULT true,
        encryption_enabled BOOLEAN DEFAULT false,
        encryption_password TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS backup_jobs (
        id TEXT PRIMARY KEY,
        policy_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at DATETIME,
        completed_at DATETIME,
        error TEXT,
        files_processed INTEGER DEFAULT 0,
        total_size INTEGER DEFAULT 0,
        backup_path TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (policy_id) REFERENCES backup_policies(id)
    )",
    "CREATE TABLE IF NOT EXISTS backup_results (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL,
        backup_path TEXT NOT NULL,
        files_processed INTEGER NOT NULL,
        total_size INTEGER NOT NULL,
        compressed_size INTEGER DEFAULT 0,
        compression_ratio REAL DEFAULT 0,
        encrypted BOOLEAN DEFAULT false,
        compressed BOOLEAN DEFAULT false,
        checksum TEXT,
        duration_seconds INTEGER DEFAULT 0,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (job_id) REFERENCES backup_jobs(id)
    )",
    "CREATE TABLE IF NOT EXISTS backup_files (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL,
        file_path TEXT NOT NULL,
        relative_path TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        checksum TEXT,
        processed BOOLEAN DEFAULT false,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (job_id) REFERENCES backup_jobs(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_backup_policies_name ON backup_policies(name)",
    "CREATE INDEX IF NOT EXISTS idx_backup_jobs_policy_id ON backup_jobs(policy_id)",
    "CREATE INDEX IF NOT EXISTS idx_backup_jobs_status ON backup_jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_backup_results_job_id ON backup_results(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_backup_files_job_id ON backup_files(job_id)",
];

/// Create tables and indices if they do not exist yet
pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    for statement in SCHEMA {
        conn.execute(statement, [])?;
    }
    Ok(())
}
