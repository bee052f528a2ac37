//! Test context and harness for pipeline testing
//!
//! Provides a unified context for setting up a catalog, a source tree and
//! a backup manager against either the configured storage or a mock.

use crate::config_builder::ConfigBuilder;
use crate::fixtures::{create_large_source_tree, create_source_tree};
use anyhow::Result;
use backup_manager::config::Config;
use backup_manager::storage::mock::MockStorage;
use backup_manager::{BackupManager, Catalog};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Test context that manages test resources and provides common utilities
pub struct TestContext {
    /// Temporary directory holding the catalog, backups and workspaces
    temp_dir: TempDir,
    /// The test configuration
    config: Config,
    catalog: Catalog,
}

impl TestContext {
    /// Create a new test context with the default test configuration
    pub fn new() -> Self {
        Self::from_builder(ConfigBuilder::new())
    }

    /// Create a test context from a ConfigBuilder
    pub fn from_builder(builder: ConfigBuilder) -> Self {
        let (config, temp_dir) = builder.persist();
        let catalog = Catalog::open(&config.database.path).expect("Failed to open catalog");

        Self {
            temp_dir,
            config,
            catalog,
        }
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Local destination directory as a policy destination string
    pub fn backup_destination(&self) -> String {
        self.config.storage.local_path.display().to_string()
    }

    /// Manager using storage built from each policy's destination
    pub fn manager(&self) -> BackupManager {
        BackupManager::new(self.config.clone(), self.catalog.clone())
    }

    /// Manager sending every artifact to `mock`
    pub fn manager_with_mock(&self, mock: &MockStorage) -> BackupManager {
        BackupManager::with_storage(
            self.config.clone(),
            self.catalog.clone(),
            Arc::new(mock.clone()),
        )
    }

    /// Create a fixture source tree in a subdirectory
    pub fn source_tree(&self, name: &str) -> PathBuf {
        let path = self.create_subdir(name);
        create_source_tree(&path).expect("Failed to create source tree");
        path
    }

    /// Create the 10-file, 1 MiB tree from [`create_large_source_tree`]
    pub fn large_source_tree(&self, name: &str) -> PathBuf {
        let path = self.create_subdir(name);
        create_large_source_tree(&path).expect("Failed to create large source tree");
        path
    }

    /// Create a subdirectory in the temp dir
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Create a file in the temp dir
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Check if a file exists in the temp directory
    pub fn file_exists(&self, name: &str) -> bool {
        self.temp_dir.path().join(name).exists()
    }

    /// Read a file from the temp directory
    pub fn read_file(&self, name: &str) -> Result<String> {
        let path = self.temp_dir.path().join(name);
        Ok(std::fs::read_to_string(path)?)
    }

    /// Artifacts currently stored in the local backup directory, sorted
    pub fn stored_artifacts(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.config.storage.local_path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Working directories left behind under the pipeline temp root
    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.config.pipeline.temp_root())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with("backup-"))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension trait for assertion helpers
pub trait ResultAssertions<T> {
    /// Assert that the result is Ok and return the value
    fn assert_ok(self) -> T;

    /// Assert that the result is Ok with a custom message
    fn assert_ok_msg(self, msg: &str) -> T;

    /// Assert that the result is Err
    fn assert_err(self);

    /// Assert that the result is Err and the error message contains the given string
    fn assert_err_contains(self, needle: &str);
}

impl<T: std::fmt::Debug, E: std::fmt::Display> ResultAssertions<T> for Result<T, E> {
    fn assert_ok(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, got Err: {}", e),
        }
    }

    fn assert_ok_msg(self, msg: &str) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("{}: {}", msg, e),
        }
    }

    fn assert_err(self) {
        if let Ok(v) = self {
            panic!("Expected Err, got Ok: {:?}", v);
        }
    }

    fn assert_err_contains(self, needle: &str) {
        match self {
            Ok(v) => panic!("Expected Err containing '{}', got Ok: {:?}", needle, v),
            Err(e) => {
                let err_msg = e.to_string();
                assert!(
                    err_msg.contains(needle),
                    "Error '{}' does not contain '{}'",
                    err_msg,
                    needle
                );
            }
        }
    }
}

/// Extension trait for Option assertions
pub trait OptionAssertions<T> {
    /// Assert that the option is Some and return the value
    fn assert_some(self) -> T;

    /// Assert that the option is None
    fn assert_none(self);
}

impl<T: std::fmt::Debug> OptionAssertions<T> for Option<T> {
    fn assert_some(self) -> T {
        match self {
            Some(v) => v,
            None => panic!("Expected Some, got None"),
        }
    }

    fn assert_none(self) {
        if let Some(v) = self {
            panic!("Expected None, got Some: {:?}", v);
        }
    }
}
