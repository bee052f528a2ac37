//! AES-256-GCM file encryption and SHA-256 checksums
//!
//! Two container formats are supported:
//!
//! * `legacy`: `[12-byte nonce][chunk]...` where each 64 KiB plaintext chunk
//!   is sealed under one PBKDF2 key derived with a fixed salt, and the nonce
//!   is incremented big-endian after every chunk. Kept so existing artifacts
//!   stay readable; a fixed salt means every artifact encrypted with the same
//!   passphrase shares one key.
//! * `salted`: `[magic][iterations u32 BE][salt len u8][salt][7-byte nonce
//!   prefix][chunk]...` using a random per-artifact salt and the STREAM
//!   construction (32-bit big-endian counter plus last-block flag), which
//!   also detects truncation at a chunk boundary.
//!
//! Decryption detects the format from the header.

use crate::error::{check_cancelled, BackupError, Result};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Salt used by the legacy format for every artifact
pub const LEGACY_SALT: &[u8] = b"backupist-salt-2024";
pub const LEGACY_ITERATIONS: u32 = 100_000;
pub const KEY_LEN: usize = 32;
pub const CHUNK_SIZE: usize = 64 * 1024;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const STREAM_NONCE_PREFIX_LEN: usize = 7;
const SALTED_MAGIC: &[u8; 8] = b"BKMGENC2";
const MIN_SALT_LEN: usize = 8;
const MAX_SALT_LEN: usize = 64;

const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionFormat {
    #[default]
    Legacy,
    Salted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionOptions {
    pub format: EncryptionFormat,
    /// PBKDF2 rounds for the salted format; legacy always uses 100,000
    pub iterations: u32,
    pub salt_size: usize,
}

impl Default for EncryptionOptions {
    fn default() -> Self {
        Self {
            format: EncryptionFormat::Legacy,
            iterations: LEGACY_ITERATIONS,
            salt_size: 16,
        }
    }
}

/// Derive a 256-bit key with PBKDF2-HMAC-SHA256
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

fn cipher_for(key: &[u8; KEY_LEN]) -> Aes256Gcm {
    Aes256Gcm::new(GenericArray::from_slice(key))
}

/// Increment a nonce as one big-endian integer, wrapping on overflow
fn increment_nonce(nonce: &mut [u8]) {
    for byte in nonce.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn truncated(what: &str) -> BackupError {
    BackupError::Crypto(format!("encrypted data is truncated ({})", what))
}

/// Encrypt `input` into `output`. A partially written output is removed on failure.
pub fn encrypt_file(
    input: &Path,
    output: &Path,
    password: &str,
    options: &EncryptionOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    if password.is_empty() {
        return Err(BackupError::Validation(
            "encryption password must not be empty".to_string(),
        ));
    }

    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);

    let result = match options.format {
        EncryptionFormat::Legacy => encrypt_legacy(&mut reader, &mut writer, password, cancel),
        EncryptionFormat::Salted => {
            encrypt_salted(&mut reader, &mut writer, password, options, cancel)
        }
    }
    .and_then(|chunks| {
        writer.flush()?;
        Ok(chunks)
    });

    match result {
        Ok(chunks) => {
            info!(
                "Encrypted {} to {} ({:?} format, {} chunks)",
                input.display(),
                output.display(),
                options.format,
                chunks
            );
            Ok(())
        }
        Err(e) => {
            drop(writer);
            let _ = fs::remove_file(output);
            Err(e)
        }
    }
}

fn encrypt_legacy<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    password: &str,
    cancel: &CancellationToken,
) -> Result<u64> {
    let cipher = cipher_for(&derive_key(password, LEGACY_SALT, LEGACY_ITERATIONS));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    writer.write_all(&nonce)?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut chunks = 0u64;
    loop {
        check_cancelled(cancel, "encryption")?;
        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), &buf[..n])
            .map_err(|_| BackupError::Crypto(format!("sealing chunk {} failed", chunks)))?;
        writer.write_all(&sealed)?;
        increment_nonce(&mut nonce);
        chunks += 1;

        if n < CHUNK_SIZE {
            break;
        }
    }

    Ok(chunks)
}

fn encrypt_salted<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    password: &str,
    options: &EncryptionOptions,
    cancel: &CancellationToken,
) -> Result<u64> {
    if options.iterations == 0 {
        return Err(BackupError::Validation(
            "key derivation iterations must be at least 1".to_string(),
        ));
    }
    if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&options.salt_size) {
        return Err(BackupError::Validation(format!(
            "salt size must be between {} and {} bytes",
            MIN_SALT_LEN, MAX_SALT_LEN
        )));
    }

    let mut salt = vec![0u8; options.salt_size];
    OsRng.fill_bytes(&mut salt);
    let mut prefix = [0u8; STREAM_NONCE_PREFIX_LEN];
    OsRng.fill_bytes(&mut prefix);

    writer.write_all(SALTED_MAGIC)?;
    writer.write_all(&options.iterations.to_be_bytes())?;
    writer.write_all(&[salt.len() as u8])?;
    writer.write_all(&salt)?;
    writer.write_all(&prefix)?;

    let cipher = cipher_for(&derive_key(password, &salt, options.iterations));
    let mut encryptor = EncryptorBE32::from_aead(cipher, GenericArray::from_slice(&prefix));

    let mut current = vec![0u8; CHUNK_SIZE];
    let mut next = vec![0u8; CHUNK_SIZE];
    let mut n = read_full(reader, &mut current)?;
    let mut chunks = 0u64;

    loop {
        check_cancelled(cancel, "encryption")?;
        // A short read means this is the final chunk
        let following = if n == CHUNK_SIZE {
            read_full(reader, &mut next)?
        } else {
            0
        };

        if following == 0 {
            let sealed = encryptor
                .encrypt_last(&current[..n])
                .map_err(|_| BackupError::Crypto(format!("sealing chunk {} failed", chunks)))?;
            writer.write_all(&sealed)?;
            chunks += 1;
            break;
        }

        let sealed = encryptor
            .encrypt_next(&current[..n])
            .map_err(|_| BackupError::Crypto(format!("sealing chunk {} failed", chunks)))?;
        writer.write_all(&sealed)?;
        chunks += 1;

        std::mem::swap(&mut current, &mut next);
        n = following;
    }

    Ok(chunks)
}

/// Decrypt `input` into `output`, detecting the container format.
/// Any authentication failure fails the whole call and removes the output.
pub fn decrypt_file(
    input: &Path,
    output: &Path,
    password: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let format = detect_format(input)?;
    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);

    let result = match format {
        EncryptionFormat::Legacy => decrypt_legacy(&mut reader, &mut writer, password, cancel),
        EncryptionFormat::Salted => decrypt_salted(&mut reader, &mut writer, password, cancel),
    }
    .and_then(|chunks| {
        writer.flush()?;
        Ok(chunks)
    });

    match result {
        Ok(chunks) => {
            debug!(
                "Decrypted {} to {} ({} chunks)",
                input.display(),
                output.display(),
                chunks
            );
            Ok(())
        }
        Err(e) => {
            drop(writer);
            let _ = fs::remove_file(output);
            Err(e)
        }
    }
}

fn auth_failure(chunk: u64) -> BackupError {
    BackupError::Crypto(format!(
        "authentication failed for chunk {}: wrong password or corrupted data",
        chunk
    ))
}

fn decrypt_legacy<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    password: &str,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut nonce = [0u8; NONCE_LEN];
    if read_full(reader, &mut nonce)? < NONCE_LEN {
        return Err(truncated("nonce header"));
    }

    let cipher = cipher_for(&derive_key(password, LEGACY_SALT, LEGACY_ITERATIONS));
    let mut buf = vec![0u8; CHUNK_SIZE + TAG_LEN];
    let mut chunks = 0u64;

    loop {
        check_cancelled(cancel, "decryption")?;
        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        if n <= TAG_LEN {
            return Err(truncated("chunk shorter than authentication tag"));
        }

        let plain = cipher
            .decrypt(Nonce::from_slice(&nonce), &buf[..n])
            .map_err(|_| auth_failure(chunks))?;
        writer.write_all(&plain)?;
        increment_nonce(&mut nonce);
        chunks += 1;

        if n < buf.len() {
            break;
        }
    }

    Ok(chunks)
}

fn decrypt_salted<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    password: &str,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut fixed = [0u8; 8 + 4 + 1];
    if read_full(reader, &mut fixed)? < fixed.len() {
        return Err(truncated("header"));
    }
    let iterations = u32::from_be_bytes([fixed[8], fixed[9], fixed[10], fixed[11]]);
    let salt_len = fixed[12] as usize;
    if iterations == 0 || !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&salt_len) {
        return Err(BackupError::Crypto("corrupt encryption header".to_string()));
    }

    let mut salt = vec![0u8; salt_len];
    let mut prefix = [0u8; STREAM_NONCE_PREFIX_LEN];
    if read_full(reader, &mut salt)? < salt_len || read_full(reader, &mut prefix)? < prefix.len() {
        return Err(truncated("header"));
    }

    let cipher = cipher_for(&derive_key(password, &salt, iterations));
    let mut decryptor = DecryptorBE32::from_aead(cipher, GenericArray::from_slice(&prefix));

    let block = CHUNK_SIZE + TAG_LEN;
    let mut current = vec![0u8; block];
    let mut next = vec![0u8; block];
    let mut n = read_full(reader, &mut current)?;
    let mut chunks = 0u64;

    loop {
        check_cancelled(cancel, "decryption")?;
        if n < TAG_LEN {
            return Err(truncated("chunk shorter than authentication tag"));
        }
        let following = if n == block {
            read_full(reader, &mut next)?
        } else {
            0
        };

        if following == 0 {
            let plain = decryptor
                .decrypt_last(&current[..n])
                .map_err(|_| auth_failure(chunks))?;
            writer.write_all(&plain)?;
            chunks += 1;
            break;
        }

        let plain = decryptor
            .decrypt_next(&current[..n])
            .map_err(|_| auth_failure(chunks))?;
        writer.write_all(&plain)?;
        chunks += 1;

        std::mem::swap(&mut current, &mut next);
        n = following;
    }

    Ok(chunks)
}

/// Detect the container format of an encrypted file from its header
pub fn detect_format(path: &Path) -> Result<EncryptionFormat> {
    let mut header = [0u8; SALTED_MAGIC.len()];
    let n = read_full(&mut File::open(path)?, &mut header)?;
    if n == header.len() && &header == SALTED_MAGIC {
        Ok(EncryptionFormat::Salted)
    } else {
        Ok(EncryptionFormat::Legacy)
    }
}

/// Hex SHA-256 of a file's contents
pub fn calculate_checksum(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check passphrase strength: at least 8 characters with an uppercase
/// letter, a lowercase letter, a digit and a printable symbol.
pub fn validate_password(password: &str) -> Result<()> {
    let reject = |msg: &str| Err(BackupError::Validation(format!("weak password: {}", msg)));

    if password.chars().count() < 8 {
        return reject("must be at least 8 characters long");
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return reject("must contain an uppercase letter");
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return reject("must contain a lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return reject("must contain a digit");
    }
    if !password
        .chars()
        .any(|c| c.is_ascii_graphic() && !c.is_ascii_alphanumeric())
    {
        return reject("must contain a special character");
    }
    Ok(())
}

/// Random password drawn from letters, digits and `!@#$%^&*`
pub fn generate_secure_password(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| PASSWORD_CHARSET[rng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct EncryptionMetadata {
    pub encrypted: bool,
    pub format: Option<EncryptionFormat>,
    pub algorithm: &'static str,
    pub key_derivation: &'static str,
    pub chunk_size: usize,
}

/// Describe an artifact's encryption, judged by its `.enc` suffix
pub fn get_encryption_metadata(path: &Path) -> Result<EncryptionMetadata> {
    let encrypted = path.extension().is_some_and(|ext| ext == "enc");
    let format = if encrypted {
        Some(detect_format(path)?)
    } else {
        None
    };

    Ok(EncryptionMetadata {
        encrypted,
        format,
        algorithm: "AES-256-GCM",
        key_derivation: "PBKDF2-HMAC-SHA256",
        chunk_size: CHUNK_SIZE,
    })
}

/// Overwrite a file with random bytes before removing it
pub fn secure_delete(path: &Path) -> Result<()> {
    let len = fs::metadata(path)?.len();
    {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(CHUNK_SIZE as u64) as usize;
            OsRng.fill_bytes(&mut buf[..n]);
            file.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }
    fs::remove_file(path)?;
    debug!("Securely deleted {}", path.display());
    Ok(())
}
