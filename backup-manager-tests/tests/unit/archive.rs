//! Unit tests for the tar/gzip archive codec

use backup_manager::utils::archive::{
    create_archive, create_tarball, extract_archive, get_archive_info, validate_archive,
};
use std::fs;
use test_utils::{source_tree_size, verify_source_tree, TestContext, SOURCE_FILES};
use tokio_util::sync::CancellationToken;

#[test]
fn test_archive_round_trip_of_fixture_tree() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let archive = ctx.temp_dir().join("data.tar.gz");
    let token = CancellationToken::new();

    create_archive(&source, &archive, 9, &token).unwrap();
    let restore = ctx.create_subdir("restore");
    extract_archive(&archive, &restore, &token).unwrap();

    // Entries are rooted at the source directory's basename
    assert!(verify_source_tree(&restore.join("data")));
}

#[test]
fn test_archive_info_counts_entries() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let token = CancellationToken::new();

    let gz = ctx.temp_dir().join("data.tar.gz");
    create_archive(&source, &gz, 6, &token).unwrap();
    let info = get_archive_info(&gz).unwrap();
    assert!(info.compressed);
    assert_eq!(info.file_count, SOURCE_FILES.len() as u64);
    assert!(info.directory_count >= 4);
    assert_eq!(info.uncompressed_size, source_tree_size());
    assert_eq!(info.size, fs::metadata(&gz).unwrap().len());

    let tar = ctx.temp_dir().join("data.tar");
    create_tarball(&source, &tar, &token).unwrap();
    let info = get_archive_info(&tar).unwrap();
    assert!(!info.compressed);
    assert_eq!(info.file_count, SOURCE_FILES.len() as u64);
}

#[test]
fn test_plain_tar_extracts_like_gzip() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let tar = ctx.temp_dir().join("data.tar");
    let token = CancellationToken::new();

    create_tarball(&source, &tar, &token).unwrap();
    validate_archive(&tar, &token).unwrap();

    let restore = ctx.create_subdir("restore");
    extract_archive(&tar, &restore, &token).unwrap();
    assert!(verify_source_tree(&restore.join("data")));
}

#[test]
fn test_truncated_archive_is_invalid() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let archive = ctx.temp_dir().join("data.tar.gz");
    let token = CancellationToken::new();

    create_archive(&source, &archive, 6, &token).unwrap();
    let bytes = fs::read(&archive).unwrap();
    fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

    assert!(validate_archive(&archive, &token).is_err());
}

#[test]
fn test_cancelled_archive_leaves_no_output() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let archive = ctx.temp_dir().join("data.tar.gz");
    let token = CancellationToken::new();
    token.cancel();

    let err = create_archive(&source, &archive, 6, &token).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!archive.exists());
}
