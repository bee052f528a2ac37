//! Unit tests for configuration loading and validation

use backup_manager::config::{
    apply_env_overrides, is_valid_bucket_name, load_config, save_config, validate_gcs_config,
    validate_policy, validate_s3_config, GcsConfig, LogFormat, RetentionSettings, S3Config,
    StorageConfig,
};
use backup_manager::utils::encryption::EncryptionFormat;
use rstest::rstest;
use std::collections::HashMap;
use std::fs;
use test_utils::{
    minimal_config_toml, mirrored_config_toml, render_config, sample_policy, ConfigBuilder,
    TestContext,
};

#[test]
fn test_config_loading_valid() {
    let ctx = TestContext::new();
    let content = render_config(minimal_config_toml(), ctx.temp_dir());
    let path = ctx.create_file("config.toml", &content);

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.database.path, ctx.temp_dir().join("backup.db"));
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, LogFormat::Text);
    assert_eq!(config.pipeline.temp_root(), ctx.temp_dir().join("tmp"));
    // Unset sections fall back to defaults
    assert_eq!(config.compression.level, 6);
    assert_eq!(config.pipeline.history_limit, 1000);
}

#[test]
fn test_config_with_mirrors_and_salted_encryption() {
    let ctx = TestContext::new();
    let content = render_config(mirrored_config_toml(), ctx.temp_dir());
    let path = ctx.create_file("config.toml", &content);

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.storage.mirrors.len(), 1);
    assert!(matches!(
        &config.storage.mirrors[0],
        StorageConfig::Local { path } if path == &ctx.temp_dir().join("mirror")
    ));
    assert_eq!(config.storage.s3.endpoint.as_deref(), Some("http://localhost:9000"));
    assert!(!config.storage.s3.use_ssl);
    assert_eq!(config.encryption.format, EncryptionFormat::Salted);
    assert_eq!(config.encryption.key_derivation.iterations, 200_000);
    assert_eq!(config.encryption.key_derivation.salt_size, 32);
    assert!(config.retention.allow_unlimited);
    assert_eq!(config.retention.max_age_days, Some(30));
}

#[test]
fn test_config_loading_missing_explicit_file() {
    let ctx = TestContext::new();
    let result = load_config(Some(&ctx.temp_dir().join("missing.toml")));
    assert!(result.is_err());
}

#[test]
fn test_config_loading_invalid_toml() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", "[database\npath = ");
    assert!(load_config(Some(&path)).is_err());
}

#[rstest]
#[case("[logging]\nlevel = \"loud\"\n")]
#[case("[compression]\nlevel = 12\n")]
#[case("[encryption.key_derivation]\niterations = 0\n")]
#[case("[encryption.key_derivation]\nalgorithm = \"scrypt\"\n")]
fn test_config_validation_rejects(#[case] content: &str) {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", content);
    assert!(load_config(Some(&path)).is_err(), "accepted: {}", content);
}

#[test]
fn test_save_config_round_trip() {
    let builder = ConfigBuilder::new().with_compression_level(3);
    let target = builder.temp_dir().join("nested").join("saved.toml");
    let (config, _temp) = builder.persist();

    save_config(&config, &target).unwrap();
    assert!(fs::read_to_string(&target).unwrap().contains("[compression]"));

    let loaded = load_config(Some(&target)).unwrap();
    assert_eq!(loaded.compression.level, 3);
    assert_eq!(loaded.database.path, config.database.path);
}

#[test]
fn test_env_overrides() {
    let mut config = ConfigBuilder::new().build();
    let vars: HashMap<&str, &str> = [
        ("BACKUP_MANAGER_DATABASE_PATH", "/var/lib/backup/catalog.db"),
        ("BACKUP_MANAGER_LOG_LEVEL", "debug"),
        ("BACKUP_MANAGER_LOG_FORMAT", "JSON"),
        ("BACKUP_MANAGER_S3_REGION", "eu-west-1"),
        ("BACKUP_MANAGER_S3_ACCESS_KEY_ID", ""),
    ]
    .into_iter()
    .collect();

    apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(config.database.path.to_str(), Some("/var/lib/backup/catalog.db"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.storage.s3.region, "eu-west-1");
    // Empty values are ignored
    assert!(config.storage.s3.access_key_id.is_none());
}

#[test]
fn test_policy_validation() {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let settings = RetentionSettings::default();

    let mut policy = sample_policy(&source, "/backups", 3);
    policy.id = "policy-1".to_string();
    assert!(validate_policy(&policy, &settings).is_ok());

    let mut missing_source = policy.clone();
    missing_source.source_path = ctx.temp_dir().join("nope").display().to_string();
    assert!(validate_policy(&missing_source, &settings).is_err());

    let mut bad_cron = policy.clone();
    bad_cron.schedule = "every day".to_string();
    assert!(validate_policy(&bad_cron, &settings).is_err());

    let mut long_name = policy.clone();
    long_name.name = "x".repeat(101);
    assert!(validate_policy(&long_name, &settings).is_err());

    let mut no_password = policy.clone();
    no_password.encryption_enabled = true;
    assert!(validate_policy(&no_password, &settings).is_err());

    let mut no_id = policy;
    no_id.id.clear();
    assert!(validate_policy(&no_id, &settings).is_err());
}

#[rstest]
#[case(0, false, false)]
#[case(0, true, true)]
#[case(1, false, true)]
#[case(100, false, true)]
#[case(101, true, false)]
#[case(-1, true, false)]
fn test_policy_retention_bounds(
    #[case] retention: i64,
    #[case] allow_unlimited: bool,
    #[case] valid: bool,
) {
    let ctx = TestContext::new();
    let source = ctx.source_tree("data");
    let settings = RetentionSettings {
        allow_unlimited,
        ..RetentionSettings::default()
    };

    let mut policy = sample_policy(&source, "/backups", retention);
    policy.id = "policy-1".to_string();
    assert_eq!(validate_policy(&policy, &settings).is_ok(), valid);
}

#[rstest]
#[case("my-bucket", true)]
#[case("backups.2024", true)]
#[case("ab", false)]
#[case("My-Bucket", false)]
#[case("-bucket", false)]
#[case("bucket.", false)]
#[case("bucket_name", false)]
fn test_bucket_names(#[case] bucket: &str, #[case] valid: bool) {
    assert_eq!(is_valid_bucket_name(bucket), valid);
}

#[test]
fn test_s3_config_validation() {
    let config = S3Config {
        bucket: "backups".to_string(),
        region: "us-east-1".to_string(),
        access_key_id: "AKIA".to_string(),
        secret_access_key: "secret".to_string(),
        endpoint: None,
        use_ssl: true,
    };
    assert!(validate_s3_config(&config).is_ok());

    let missing_keys = S3Config {
        secret_access_key: String::new(),
        ..config.clone()
    };
    assert!(validate_s3_config(&missing_keys).is_err());

    let bad_bucket = S3Config {
        bucket: "Bad_Bucket".to_string(),
        ..config
    };
    assert!(validate_s3_config(&bad_bucket).is_err());
}

#[test]
fn test_gcs_config_validation() {
    let ctx = TestContext::new();
    let credentials = ctx.create_file("sa.json", "{}");

    let config = GcsConfig {
        bucket: "archive".to_string(),
        project_id: "my-project".to_string(),
        credentials_path: Some(credentials),
        service_account_json: None,
    };
    assert!(validate_gcs_config(&config).is_ok());

    let missing_file = GcsConfig {
        credentials_path: Some(ctx.temp_dir().join("missing.json")),
        ..config.clone()
    };
    assert!(validate_gcs_config(&missing_file).is_err());

    let no_credentials = GcsConfig {
        credentials_path: None,
        ..config.clone()
    };
    assert!(validate_gcs_config(&no_credentials).is_err());

    let inline = GcsConfig {
        credentials_path: None,
        service_account_json: Some("{\"type\": \"service_account\"}".to_string()),
        ..config
    };
    assert!(validate_gcs_config(&inline).is_ok());
}
