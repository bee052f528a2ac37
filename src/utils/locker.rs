//! File-based locking to prevent concurrent runs of one policy

use crate::error::{BackupError, Result};
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive lock held for the duration of a policy's pipeline run
pub struct PolicyLock {
    // Dropping the file closes the descriptor, which releases the OS lock
    _lock: RwLock<File>,
    lock_path: PathBuf,
}

impl PolicyLock {
    /// Acquire an exclusive lock for a policy.
    /// Fails immediately if another run of the same policy holds it.
    pub fn acquire(lock_dir: &Path, policy_id: &str) -> Result<Self> {
        let lock_path = Self::lock_path(lock_dir, policy_id);

        debug!("Attempting to acquire lock: {:?}", lock_path);

        std::fs::create_dir_all(lock_dir)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let mut lock = RwLock::new(file);
        match lock.try_write() {
            // The OS lock stays held until the descriptor is closed
            Ok(guard) => std::mem::forget(guard),
            Err(_) => {
                return Err(BackupError::Validation(format!(
                    "policy '{}' already has a backup in progress (lock held)",
                    policy_id
                )))
            }
        }

        info!("Acquired backup lock for policy: {}", policy_id);

        Ok(Self {
            _lock: lock,
            lock_path,
        })
    }

    fn lock_path(lock_dir: &Path, policy_id: &str) -> PathBuf {
        let safe: String = policy_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        lock_dir.join(format!("backup-manager-{}.lock", safe))
    }

    /// Get the lock file path (for cleanup or inspection)
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for PolicyLock {
    fn drop(&mut self) {
        info!("Released backup lock: {:?}", self.lock_path);

        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            debug!("Failed to remove lock file: {}", e);
        }
    }
}
