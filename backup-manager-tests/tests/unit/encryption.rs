//! Unit tests for the encryption codec

use backup_manager::utils::encryption::{
    calculate_checksum, decrypt_file, detect_format, encrypt_file, generate_secure_password,
    get_encryption_metadata, secure_delete, validate_password, EncryptionFormat,
    EncryptionOptions, CHUNK_SIZE,
};
use backup_manager::BackupError;
use rstest::rstest;
use std::fs;
use test_utils::TestContext;
use tokio_util::sync::CancellationToken;

const PASSWORD: &str = "Corr3ct!Horse";

fn salted() -> EncryptionOptions {
    EncryptionOptions {
        format: EncryptionFormat::Salted,
        iterations: 1_000,
        salt_size: 16,
    }
}

#[rstest]
#[case::legacy(EncryptionOptions::default())]
#[case::salted(salted())]
fn test_multi_chunk_round_trip(#[case] options: EncryptionOptions) {
    let ctx = TestContext::new();
    let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 123).map(|i| (i % 251) as u8).collect();
    let plain = ctx.temp_dir().join("plain.bin");
    let sealed = ctx.temp_dir().join("plain.bin.enc");
    let opened = ctx.temp_dir().join("opened.bin");
    fs::write(&plain, &data).unwrap();
    let token = CancellationToken::new();

    encrypt_file(&plain, &sealed, PASSWORD, &options, &token).unwrap();
    assert_eq!(detect_format(&sealed).unwrap(), options.format);
    decrypt_file(&sealed, &opened, PASSWORD, &token).unwrap();

    assert_eq!(fs::read(&opened).unwrap(), data);
}

#[rstest]
#[case::legacy(EncryptionOptions::default())]
#[case::salted(salted())]
fn test_wrong_password_fails_without_output(#[case] options: EncryptionOptions) {
    let ctx = TestContext::new();
    let plain = ctx.create_file("plain.txt", "secret payload");
    let sealed = ctx.temp_dir().join("plain.txt.enc");
    let opened = ctx.temp_dir().join("opened.txt");
    let token = CancellationToken::new();

    encrypt_file(&plain, &sealed, PASSWORD, &options, &token).unwrap();
    let err = decrypt_file(&sealed, &opened, "Wr0ng!Horse", &token).unwrap_err();

    assert!(matches!(err, BackupError::Crypto(_)), "got {}", err);
    assert!(!opened.exists());
}

#[test]
fn test_salted_format_uses_fresh_salt() {
    let ctx = TestContext::new();
    let plain = ctx.create_file("plain.txt", "same input");
    let first = ctx.temp_dir().join("first.enc");
    let second = ctx.temp_dir().join("second.enc");
    let token = CancellationToken::new();

    encrypt_file(&plain, &first, PASSWORD, &salted(), &token).unwrap();
    encrypt_file(&plain, &second, PASSWORD, &salted(), &token).unwrap();

    assert_ne!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn test_empty_password_rejected() {
    let ctx = TestContext::new();
    let plain = ctx.create_file("plain.txt", "data");
    let err = encrypt_file(
        &plain,
        &ctx.temp_dir().join("out.enc"),
        "",
        &EncryptionOptions::default(),
        &CancellationToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, BackupError::Validation(_)));
}

#[test]
fn test_checksum_is_sha256_hex() {
    let ctx = TestContext::new();
    let path = ctx.create_file("abc.txt", "abc");
    assert_eq!(
        calculate_checksum(&path).unwrap(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[rstest]
#[case("Str0ng!Pass", true)]
#[case("Sh0rt!", false)]
#[case("alllower1!", false)]
#[case("ALLUPPER1!", false)]
#[case("NoDigits!!", false)]
#[case("NoSymbols11", false)]
fn test_password_strength(#[case] password: &str, #[case] ok: bool) {
    assert_eq!(validate_password(password).is_ok(), ok);
}

#[test]
fn test_generated_passwords() {
    let password = generate_secure_password(24);
    assert_eq!(password.chars().count(), 24);
    assert_ne!(password, generate_secure_password(24));
}

#[test]
fn test_metadata_and_secure_delete() {
    let ctx = TestContext::new();
    let plain = ctx.create_file("backup.tar.gz", "archive bytes");
    let sealed = ctx.temp_dir().join("backup.tar.gz.enc");
    encrypt_file(&plain, &sealed, PASSWORD, &salted(), &CancellationToken::new()).unwrap();

    let meta = get_encryption_metadata(&sealed).unwrap();
    assert!(meta.encrypted);
    assert_eq!(meta.format, Some(EncryptionFormat::Salted));
    assert_eq!(meta.algorithm, "AES-256-GCM");

    let meta = get_encryption_metadata(&plain).unwrap();
    assert!(!meta.encrypted);
    assert!(meta.format.is_none());

    secure_delete(&plain).unwrap();
    assert!(!plain.exists());
}
