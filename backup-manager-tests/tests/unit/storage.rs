//! Unit tests for storage backends and destination handling

use backup_manager::config::{StorageConfig, StorageSettings};
use backup_manager::storage::{
    from_config, from_destination, generate_remote_path, Destination, LocalStorage, MultiStorage,
};
use std::sync::Arc;
use test_utils::{MockStorage, StorageBackend, StorageCall, TestContext};
use tokio_util::sync::CancellationToken;

#[test]
fn test_generate_remote_path() {
    assert_eq!(generate_remote_path("s3://bucket/nightly", "a.tar.gz"), "nightly/a.tar.gz");
    assert_eq!(generate_remote_path("gcs://bucket", "a.tar.gz"), "a.tar.gz");
    assert_eq!(generate_remote_path("/srv/backups", "a.tar.gz"), "/srv/backups/a.tar.gz");
}

#[test]
fn test_location_resolves_back_to_key() {
    let destination = Destination::parse("s3://bucket/nightly/app");
    let location = destination.location("a.tar.gz.enc");
    assert_eq!(location, "s3://bucket/nightly/app/a.tar.gz.enc");
    assert_eq!(Destination::parse(&location).object_key(), "nightly/app/a.tar.gz.enc");
}

#[tokio::test]
async fn test_local_list_by_prefix() {
    let ctx = TestContext::new();
    let artifact = ctx.create_file("artifact.tar.gz", "bytes");
    let storage = LocalStorage::new(ctx.temp_dir().join("store"));
    let token = CancellationToken::new();

    for key in ["app/2024/a.tar.gz", "app/2024/b.tar.gz", "app-db/c.tar.gz", "other/d.tar.gz"] {
        storage.upload(&token, &artifact, key).await.unwrap();
    }

    let mut keys = storage.list(&token, "app/").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["app/2024/a.tar.gz", "app/2024/b.tar.gz"]);

    // A prefix can end in the middle of a name
    let mut keys = storage.list(&token, "app").await.unwrap();
    keys.sort();
    assert_eq!(keys.len(), 3);

    assert!(storage.list(&token, "missing/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_local_rejects_parent_traversal() {
    let ctx = TestContext::new();
    let artifact = ctx.create_file("artifact.tar.gz", "bytes");
    let storage = LocalStorage::new(ctx.temp_dir().join("store"));
    let token = CancellationToken::new();

    let err = storage
        .upload(&token, &artifact, "../escape.tar.gz")
        .await
        .unwrap_err();
    assert!(matches!(err, backup_manager::BackupError::Security(_)));
    assert!(!ctx.file_exists("escape.tar.gz"));
}

#[tokio::test]
async fn test_multi_writes_every_backend() {
    let ctx = TestContext::new();
    let artifact = ctx.create_file("artifact.tar.gz", "bytes");
    let local = LocalStorage::new(ctx.temp_dir().join("store"));
    let mock = MockStorage::new();
    let multi = MultiStorage::new(vec![Arc::new(local), Arc::new(mock.clone())]);
    let token = CancellationToken::new();

    multi.upload(&token, &artifact, "nightly/a.tar.gz").await.unwrap();

    assert!(ctx.file_exists("store/nightly/a.tar.gz"));
    assert!(mock.contains("nightly/a.tar.gz"));
    assert!(multi.exists(&token, "nightly/a.tar.gz").await.unwrap());

    multi.delete(&token, "nightly/a.tar.gz").await.unwrap();
    assert!(!ctx.file_exists("store/nightly/a.tar.gz"));
    assert!(!multi.exists(&token, "nightly/a.tar.gz").await.unwrap());
}

#[tokio::test]
async fn test_multi_download_falls_back() {
    let ctx = TestContext::new();
    let empty = MockStorage::new();
    let holder = MockStorage::new();
    holder.put("nightly/a.tar.gz", b"payload");
    let multi = MultiStorage::new(vec![Arc::new(empty.clone()), Arc::new(holder)]);

    let target = ctx.temp_dir().join("download/a.tar.gz");
    multi
        .download(&CancellationToken::new(), "nightly/a.tar.gz", &target)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"payload");
    assert!(matches!(
        empty.get_calls().as_slice(),
        [StorageCall::Download { .. }]
    ));
}

#[tokio::test]
async fn test_multi_upload_stops_at_first_failure() {
    let ctx = TestContext::new();
    let artifact = ctx.create_file("artifact.tar.gz", "bytes");
    let failing = MockStorage::new().with_failing_upload();
    let second = MockStorage::new();
    let multi = MultiStorage::new(vec![Arc::new(failing), Arc::new(second.clone())]);

    let err = multi
        .upload(&CancellationToken::new(), &artifact, "a.tar.gz")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("storage 0"), "got {}", err);
    assert_eq!(second.upload_count(), 0);
}

#[tokio::test]
async fn test_factories_build_expected_backends() {
    let ctx = TestContext::new();

    let local = from_config(&StorageConfig::Local {
        path: ctx.temp_dir().join("store"),
    })
    .await
    .unwrap();
    assert_eq!(local.name(), "local");

    let settings = StorageSettings {
        mirrors: vec![StorageConfig::Local {
            path: ctx.temp_dir().join("mirror"),
        }],
        ..ctx.config().storage.clone()
    };
    let mirrored = from_destination(&ctx.backup_destination(), &settings).await.unwrap();
    assert_eq!(mirrored.name(), "multi");

    let plain = from_destination(&ctx.backup_destination(), &ctx.config().storage)
        .await
        .unwrap();
    assert_eq!(plain.name(), "local");
}
