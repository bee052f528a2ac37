//! tar/gzip archive codec
//!
//! Archives hold one entry per file or directory of a source tree. Entry
//! names are relative to the source's parent directory, so every entry is
//! rooted at the source directory's basename (`data/`, `data/a.txt`, ...).
//! Readers detect gzip by its magic bytes and also accept plain tar.
//!
//! All functions are synchronous and check the cancellation token once per
//! entry; async callers run them on the blocking pool.

use crate::error::{check_cancelled, BackupError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tar::{Archive, Builder, EntryType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read-only summary of an existing archive
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    /// Size of the archive file on disk
    pub size: u64,
    /// Sum of the declared entry sizes
    pub uncompressed_size: u64,
    pub file_count: u64,
    pub directory_count: u64,
    pub compression_ratio: f64,
    pub compressed: bool,
}

/// Create a gzip-compressed tar archive of `source` at `output`.
/// Returns the number of entries written.
pub fn create_archive(
    source: &Path,
    output: &Path,
    level: u32,
    cancel: &CancellationToken,
) -> Result<u64> {
    write_archive(source, output, Some(Compression::new(level)), None, cancel)
}

/// Like [`create_archive`], but only entries modified after the baseline
/// archive's modification time are written. A missing or unreadable
/// baseline produces a full archive.
pub fn create_incremental_archive(
    source: &Path,
    output: &Path,
    baseline: Option<&Path>,
    level: u32,
    cancel: &CancellationToken,
) -> Result<u64> {
    let since = baseline.and_then(|path| match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(mtime) => Some(mtime),
        Err(e) => {
            warn!(
                "Baseline archive {} unreadable ({}), creating full archive",
                path.display(),
                e
            );
            None
        }
    });

    write_archive(source, output, Some(Compression::new(level)), since, cancel)
}

/// Create an uncompressed tar of `source`, used when archiving is disabled
/// but the pipeline still needs a single-file artifact.
pub fn create_tarball(source: &Path, output: &Path, cancel: &CancellationToken) -> Result<u64> {
    write_archive(source, output, None, None, cancel)
}

fn write_archive(
    source: &Path,
    output: &Path,
    compression: Option<Compression>,
    since: Option<SystemTime>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let source = source.canonicalize()?;
    if !source.is_dir() {
        return Err(BackupError::Validation(format!(
            "archive source is not a directory: {}",
            source.display()
        )));
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(output)?;
    let output_path = output.canonicalize()?;

    let result = match compression {
        Some(level) => {
            let encoder = GzEncoder::new(BufWriter::new(file), level);
            let mut builder = Builder::new(encoder);
            append_tree(&mut builder, &source, &output_path, since, cancel).and_then(|count| {
                builder.into_inner()?.finish()?.flush()?;
                Ok(count)
            })
        }
        None => {
            let mut builder = Builder::new(BufWriter::new(file));
            append_tree(&mut builder, &source, &output_path, since, cancel).and_then(|count| {
                builder.into_inner()?.flush()?;
                Ok(count)
            })
        }
    };

    match result {
        Ok(count) => {
            info!(
                "Created archive {} from {} ({} entries)",
                output.display(),
                source.display(),
                count
            );
            Ok(count)
        }
        Err(e) => {
            let _ = fs::remove_file(output);
            Err(e)
        }
    }
}

fn append_tree<W: Write>(
    builder: &mut Builder<W>,
    source: &Path,
    output: &Path,
    since: Option<SystemTime>,
    cancel: &CancellationToken,
) -> Result<u64> {
    builder.follow_symlinks(false);
    let base = source.parent().unwrap_or(source);
    let mut count = 0u64;

    for entry in WalkDir::new(source) {
        check_cancelled(cancel, "archive")?;
        let entry = entry?;
        let path = entry.path();

        if path == output {
            debug!("Skipping archive output inside source tree: {}", path.display());
            continue;
        }

        if let Some(since) = since {
            let modified = entry.metadata()?.modified()?;
            if modified <= since {
                continue;
            }
        }

        let name = entry_name(path, base)?;
        if name.is_empty() {
            continue;
        }

        builder.append_path_with_name(path, &name)?;
        count += 1;
    }

    Ok(count)
}

fn entry_name(path: &Path, base: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).map_err(|_| {
        BackupError::Internal(format!(
            "{} is not under {}",
            path.display(),
            base.display()
        ))
    })?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

fn open_archive(path: &Path) -> Result<(Box<dyn Read>, bool)> {
    let mut reader = BufReader::new(File::open(path)?);
    let compressed = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    if compressed {
        Ok((Box::new(GzDecoder::new(reader)), true))
    } else {
        Ok((Box::new(reader), false))
    }
}

/// Resolve an entry path under `root`, rejecting anything that would land
/// outside it.
fn resolve_entry_path(root: &Path, entry: &Path) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in entry.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => {
                resolved.pop();
                depth -= 1;
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(BackupError::Security(format!(
                    "archive entry escapes destination: {}",
                    entry.display()
                )))
            }
        }
    }

    if depth == 0 {
        return Err(BackupError::Security(format!(
            "archive entry resolves to the destination root: {}",
            entry.display()
        )));
    }

    Ok(resolved)
}

/// Extract `archive` into `dest`. Returns the number of entries written.
pub fn extract_archive(archive: &Path, dest: &Path, cancel: &CancellationToken) -> Result<u64> {
    fs::create_dir_all(dest)?;
    let root = dest.canonicalize()?;
    let (reader, _) = open_archive(archive)?;
    let mut tar = Archive::new(reader);
    let mut count = 0u64;
    // Directory modes are applied after their contents are written
    let mut dir_modes = Vec::new();

    for entry in tar.entries()? {
        check_cancelled(cancel, "extract")?;
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let target = resolve_entry_path(&root, &entry_path)?;
        let mode = entry.header().mode()?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target)?;
                dir_modes.push((target, mode));
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = create_with_mode(&target, mode)?;
                io::copy(&mut entry, &mut file)?;
            }
            other => {
                warn!(
                    "Skipping unsupported entry type {:?}: {}",
                    other,
                    entry_path.display()
                );
                continue;
            }
        }
        count += 1;
    }

    // Deepest first
    for (dir, mode) in dir_modes.iter().rev() {
        set_mode(dir, *mode)?;
    }

    info!("Extracted {} entries from {} to {}", count, archive.display(), dest.display());
    Ok(count)
}

#[cfg(unix)]
fn create_with_mode(path: &Path, mode: u32) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn create_with_mode(path: &Path, _mode: u32) -> io::Result<File> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Decode every entry, streaming file bodies to nowhere.
/// Proves the container is readable end to end; entry contents are not
/// checked against anything.
pub fn validate_archive(archive: &Path, cancel: &CancellationToken) -> Result<()> {
    let (reader, _) = open_archive(archive)?;
    let mut tar = Archive::new(reader);

    for entry in tar.entries()? {
        check_cancelled(cancel, "validate")?;
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            io::copy(&mut entry, &mut io::sink())?;
        }
    }

    debug!("Archive {} is valid", archive.display());
    Ok(())
}

/// Summarize an archive from its entry headers
pub fn get_archive_info(archive: &Path) -> Result<ArchiveInfo> {
    let size = fs::metadata(archive)?.len();
    let (reader, compressed) = open_archive(archive)?;
    let mut tar = Archive::new(reader);

    let mut uncompressed_size = 0u64;
    let mut file_count = 0u64;
    let mut directory_count = 0u64;

    for entry in tar.entries()? {
        let entry = entry?;
        let header = entry.header();
        uncompressed_size += header.size()?;
        if header.entry_type().is_dir() {
            directory_count += 1;
        } else {
            file_count += 1;
        }
    }

    let compression_ratio = if size > 0 {
        uncompressed_size as f64 / size as f64
    } else {
        0.0
    };

    Ok(ArchiveInfo {
        path: archive.to_path_buf(),
        size,
        uncompressed_size,
        file_count,
        directory_count,
        compression_ratio,
        compressed,
    })
}
