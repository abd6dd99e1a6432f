//! Shared test fixtures for blob, store, and engine test modules.
//!
//! Keeping tiny but reusable helpers here prevents each test module from
//! rebuilding ad-hoc temp-dir and blob fixture code. Everything is std-only
//! except the AES-GCM helper, which reuses the crate's own cipher.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::personalize::{personalize, LABEL_APPLICATION_ID};
use crate::wire::GCM_IV_LEN;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a unique temporary directory with a readable prefix.
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!("spunlock-{prefix}-{millis}-{suffix}"));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    /// Root directory path for this fixture.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write bytes to a child path, creating parent directories as needed.
    pub fn write_bytes(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories for fixture");
        }
        fs::write(&path, content).expect("failed to write fixture file");
        path
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Serialize a `.pwd` record in its big-endian wire layout.
pub fn encode_password_data(
    password_type: i32,
    log_n: u8,
    log_r: u8,
    log_p: u8,
    salt: &[u8],
    handle: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&password_type.to_be_bytes());
    out.push(log_n);
    out.push(log_r);
    out.push(log_p);
    out.extend_from_slice(&(salt.len() as i32).to_be_bytes());
    out.extend_from_slice(salt);
    out.extend_from_slice(&(handle.len() as i32).to_be_bytes());
    out.extend_from_slice(handle);
    out
}

/// Serialize a password-based `.spblob` envelope.
pub fn encode_spblob(version: u8, iv: &[u8; GCM_IV_LEN], ciphertext: &[u8]) -> Vec<u8> {
    let mut out = vec![version, 0u8];
    out.extend_from_slice(iv);
    out.extend_from_slice(ciphertext);
    out
}

/// Serialize a `.weaver` record with its host-endian slot.
pub fn encode_weaver_record(version: u8, slot: i32) -> Vec<u8> {
    let mut out = vec![version];
    out.extend_from_slice(&slot.to_ne_bytes());
    out
}

/// AES-256-GCM encrypt with appended tag, as the envelopes are laid out.
pub fn gcm_encrypt(key: &[u8], iv: &[u8; GCM_IV_LEN], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new_from_slice(key).expect("aes-256 key is 32 bytes");
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .expect("fixture encryption cannot fail")
}

/// Build the inner envelope (`inner_iv || ciphertext || tag`) for a known
/// synthetic password under a given application id.
pub fn build_inner_envelope(application_id: &[u8], synthetic_password: &[u8]) -> Vec<u8> {
    let personalized = personalize(LABEL_APPLICATION_ID, application_id);
    let inner_iv = [0x42u8; GCM_IV_LEN];
    let mut envelope = inner_iv.to_vec();
    envelope.extend_from_slice(&gcm_encrypt(
        &personalized.as_bytes()[..32],
        &inner_iv,
        synthetic_password,
    ));
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_fixture_writes_and_resolves_paths() {
        let fixture = TestTempDir::new("fixture");
        let file = fixture.write_bytes("nested/file.bin", b"hello");
        assert_eq!(fs::read(file).unwrap(), b"hello");
    }

    #[test]
    fn inner_envelope_decrypts_back_to_the_password() {
        use aes_gcm::aead::Aead;
        let application_id = [7u8; 96];
        let envelope = build_inner_envelope(&application_id, b"secret-password");
        let personalized = personalize(LABEL_APPLICATION_ID, &application_id);
        let cipher = Aes256Gcm::new_from_slice(&personalized.as_bytes()[..32]).unwrap();
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&envelope[..GCM_IV_LEN]),
                &envelope[GCM_IV_LEN..],
            )
            .unwrap();
        assert_eq!(plaintext, b"secret-password");
    }

    #[test]
    fn pwd_encoding_round_trips_through_parser() {
        let raw = encode_password_data(4, 11, 3, 1, &[1u8; 16], &[2u8; 17]);
        let parsed = crate::wire::PasswordData::parse(&raw).unwrap();
        assert_eq!(parsed.password_type, 4);
        assert_eq!(parsed.password_handle.len(), 17);
    }
}
