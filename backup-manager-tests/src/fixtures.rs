//! Test fixtures and sample data
//!
//! Provides source trees, policies and config templates for testing.

use backup_manager::BackupPolicy;
use std::fs;
use std::path::Path;

/// Files written by [`create_source_tree`], relative to the tree root
pub const SOURCE_FILES: &[(&str, &str)] = &[
    ("readme.txt", "Backup fixture\n"),
    ("data/file1.txt", "Test data file 1"),
    ("data/file2.txt", "Test data file 2"),
    ("config/settings.json", r#"{"key": "value"}"#),
    ("config/nested/deep.txt", "deeply nested"),
];

/// Total byte size of [`SOURCE_FILES`]
pub fn source_tree_size() -> u64 {
    SOURCE_FILES.iter().map(|(_, content)| content.len() as u64).sum()
}

/// Create a small source tree with nested directories under `dir`
pub fn create_source_tree(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir.join("empty"))?;
    for (relative, content) in SOURCE_FILES {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }
    Ok(())
}

/// Number of files written by [`create_large_source_tree`]
pub const LARGE_TREE_FILES: usize = 10;

/// Total byte size of the tree written by [`create_large_source_tree`]
pub const LARGE_TREE_SIZE: u64 = 1024 * 1024;

/// Create a 10-file, 1 MiB tree of poorly compressible bytes under `dir`.
/// Files are split across two subdirectories; content is deterministic.
pub fn create_large_source_tree(dir: &Path) -> std::io::Result<()> {
    let per_file = LARGE_TREE_SIZE as usize / LARGE_TREE_FILES;
    for i in 0..LARGE_TREE_FILES {
        let size = if i == LARGE_TREE_FILES - 1 {
            LARGE_TREE_SIZE as usize - per_file * (LARGE_TREE_FILES - 1)
        } else {
            per_file
        };
        let path = dir.join(format!("part{}", i % 2)).join(format!("blob-{:02}.bin", i));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, pseudo_random_bytes(i as u64 + 1, size))?;
    }
    Ok(())
}

/// xorshift64 stream
fn pseudo_random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// Verify a restored tree matches [`SOURCE_FILES`] byte for byte
pub fn verify_source_tree(dir: &Path) -> bool {
    dir.join("empty").is_dir()
        && SOURCE_FILES.iter().all(|(relative, content)| {
            fs::read(dir.join(relative))
                .map(|bytes| bytes == content.as_bytes())
                .unwrap_or(false)
        })
}

/// A policy backing up `source` to `destination`, keeping `retention` backups
pub fn sample_policy(source: &Path, destination: &str, retention: i64) -> BackupPolicy {
    let mut policy = BackupPolicy::new(source.to_string_lossy(), destination);
    policy.name = "fixture-backup".to_string();
    policy.schedule = "0 2 * * *".to_string();
    policy.retention_count = retention;
    policy
}

/// Same as [`sample_policy`] with encryption turned on
pub fn encrypted_policy(source: &Path, destination: &str, password: &str) -> BackupPolicy {
    let mut policy = sample_policy(source, destination, 3);
    policy.encryption_enabled = true;
    policy.encryption_password = password.to_string();
    policy
}

/// Minimal config TOML template; `{root}` is replaced by a temp dir
pub fn minimal_config_toml() -> &'static str {
    r#"
[database]
path = "{root}/backup.db"

[logging]
level = "warn"
format = "text"

[storage]
local_path = "{root}/backups"

[pipeline]
temp_dir = "{root}/tmp"
lock_dir = "{root}/locks"
"#
}

/// Config with S3 defaults and a local mirror
pub fn mirrored_config_toml() -> &'static str {
    r#"
[database]
path = "{root}/backup.db"

[storage]
local_path = "{root}/backups"

[storage.s3]
endpoint = "http://localhost:9000"
region = "us-east-1"
access_key_id = "minioadmin"
secret_access_key = "minioadmin"
use_ssl = false

[[storage.mirrors]]
type = "local"
path = "{root}/mirror"

[encryption]
format = "salted"

[encryption.key_derivation]
iterations = 200000
salt_size = 32

[retention]
allow_unlimited = true
max_age_days = 30
"#
}

/// Render a template against a root directory
pub fn render_config(template: &str, root: &Path) -> String {
    template.replace("{root}", &root.display().to_string())
}
