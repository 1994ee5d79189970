//! AES-256-GCM file encryption/decryption
//!
//! Files are encrypted with the STREAM construction so that archives of any
//! size can be processed in constant memory. Layout of an encrypted file:
//!
//! ```text
//! magic "AVX1" | 7-byte nonce prefix | segment 0 | segment 1 | ... | last segment
//! ```
//!
//! Every segment except the last carries exactly `SEGMENT_SIZE` bytes of
//! plaintext plus a 16-byte tag. The last segment is always shorter (it may
//! carry zero bytes of plaintext), which is how truncation is detected.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32};
use aes_gcm::aead::{KeyInit, OsRng};
use aes_gcm::Aes256Gcm;

use crate::error::{RestoreError, RestoreResult};

use super::DerivedKey;

const MAGIC: &[u8; 4] = b"AVX1";

/// Size of the STREAM nonce prefix (96-bit GCM nonce minus the 5-byte counter)
const NONCE_PREFIX_SIZE: usize = 7;

/// Plaintext bytes per segment
const SEGMENT_SIZE: usize = 64 * 1024;

const TAG_SIZE: usize = 16;

/// Encrypt `input` into `output`
pub fn encrypt_file(input: &Path, output: &Path, key: &DerivedKey) -> RestoreResult<()> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| RestoreError::Configuration(format!("Failed to create cipher: {}", e)))?;

    let mut nonce = [0u8; NONCE_PREFIX_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);
    writer.write_all(MAGIC)?;
    writer.write_all(&nonce)?;

    let mut encryptor = EncryptorBE32::from_aead(cipher, GenericArray::from_slice(&nonce));
    let mut buffer = vec![0u8; SEGMENT_SIZE];
    loop {
        let filled = fill(&mut reader, &mut buffer)?;
        if filled == SEGMENT_SIZE {
            let segment = encryptor
                .encrypt_next(&buffer[..])
                .map_err(|_| encryption_failed(input))?;
            writer.write_all(&segment)?;
        } else {
            let segment = encryptor
                .encrypt_last(&buffer[..filled])
                .map_err(|_| encryption_failed(input))?;
            writer.write_all(&segment)?;
            break;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Decrypt `input` into `output`.
///
/// On failure the partially written output is removed.
pub fn decrypt_file(input: &Path, output: &Path, key: &DerivedKey) -> RestoreResult<()> {
    let result = decrypt_into(input, output, key);
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result
}

fn decrypt_into(input: &Path, output: &Path, key: &DerivedKey) -> RestoreResult<()> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| RestoreError::Configuration(format!("Failed to create cipher: {}", e)))?;

    let mut reader = BufReader::new(File::open(input)?);

    let mut header = [0u8; 4 + NONCE_PREFIX_SIZE];
    if fill(&mut reader, &mut header)? != header.len() || &header[..4] != MAGIC {
        return Err(RestoreError::Configuration(format!(
            "{} is not an AES encrypted backup file",
            input.display()
        )));
    }

    let mut writer = BufWriter::new(File::create(output)?);
    let mut decryptor = DecryptorBE32::from_aead(cipher, GenericArray::from_slice(&header[4..]));
    let mut buffer = vec![0u8; SEGMENT_SIZE + TAG_SIZE];
    loop {
        let filled = fill(&mut reader, &mut buffer)?;
        if filled == buffer.len() {
            let segment = decryptor
                .decrypt_next(&buffer[..])
                .map_err(|_| decryption_failed(input))?;
            writer.write_all(&segment)?;
        } else {
            let segment = decryptor
                .decrypt_last(&buffer[..filled])
                .map_err(|_| decryption_failed(input))?;
            writer.write_all(&segment)?;
            break;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Read until `buffer` is full or the reader is exhausted
fn fill(reader: &mut impl Read, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn encryption_failed(path: &Path) -> RestoreError {
    RestoreError::Io(format!("Encryption failed for {}", path.display()))
}

fn decryption_failed(path: &Path) -> RestoreError {
    RestoreError::Integrity {
        file: path.to_path_buf(),
        found: "undecryptable data".to_string(),
        required: "authentic ciphertext (wrong key or corrupted data)".to_string(),
    }
}
