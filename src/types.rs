//! Domain records persisted by the catalog and produced by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Declarative description of what to back up and where.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackupPolicy {
    pub id: String,
    pub name: String,
    pub source_path: String,
    /// Local path or `s3://bucket/prefix` / `gcs://bucket/prefix`
    pub destination_path: String,
    #[serde(default)]
    pub schedule: String,
    /// Values <= 0 mean unlimited for the retention engine.
    pub retention_count: i64,
    pub archive_enabled: bool,
    pub encryption_enabled: bool,
    #[serde(skip)]
    pub encryption_password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status: PolicyStatus,
}

impl BackupPolicy {
    pub fn new(source_path: impl Into<String>, destination_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: String::new(),
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            schedule: String::new(),
            retention_count: 1,
            archive_enabled: true,
            encryption_enabled: false,
            encryption_password: String::new(),
            created_at: now,
            updated_at: now,
            status: PolicyStatus::Active,
        }
    }
}

impl fmt::Debug for BackupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupPolicy")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source_path", &self.source_path)
            .field("destination_path", &self.destination_path)
            .field("schedule", &self.schedule)
            .field("retention_count", &self.retention_count)
            .field("archive_enabled", &self.archive_enabled)
            .field("encryption_enabled", &self.encryption_enabled)
            .field("encryption_password", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("status", &self.status)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    #[default]
    Active,
    Inactive,
    Paused,
    Error,
}

/// One execution of a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub policy_id: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub files_processed: i64,
    pub total_size: i64,
    pub backup_path: String,
    pub created_at: DateTime<Utc>,
}

impl BackupJob {
    pub fn new(id: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            policy_id: policy_id.into(),
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            files_processed: 0,
            total_size: 0,
            backup_path: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Deleted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Deleted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "deleted" => Ok(JobStatus::Deleted),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Durable record of a successful job's artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupResult {
    pub job_id: String,
    pub backup_path: String,
    pub files_processed: i64,
    pub total_size: i64,
    pub compressed_size: i64,
    pub compression_ratio: f64,
    pub encrypted: bool,
    pub compressed: bool,
    /// Hex SHA-256 of the uploaded artifact
    pub checksum: String,
    pub duration: Duration,
}

/// A single source file copied by a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFileRecord {
    pub file_path: String,
    pub relative_path: String,
    pub file_size: i64,
    pub checksum: String,
    pub processed: bool,
}
