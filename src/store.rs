//! Blob store: locating and reading the per-user synthetic-password
//! artifacts.
//!
//! Artifacts live under `<system_de>/<uid>/spblob/` as `<handle><suffix>`.
//! Some devices write the handle stem with one or two leading zeros; the
//! store resolves `<handle>`, `0<handle>`, and `00<handle>` in that order
//! and never interprets the content it returns.

use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::UnlockError;

/// `.pwd`: credential class, scrypt parameters, gatekeeper handle.
pub const SUFFIX_PWD: &str = ".pwd";
/// `.spblob`: the wrapped synthetic password envelope.
pub const SUFFIX_SPBLOB: &str = ".spblob";
/// `.weaver`: escrow slot record; presence selects the weaver path.
pub const SUFFIX_WEAVER: &str = ".weaver";
/// `.secdis`: bulk secdiscardable blob for devices without weaver.
pub const SUFFIX_SECDIS: &str = ".secdis";

/// Name of the optional per-user handle/alias record.
const KEYSTORE_INFO_FILE: &str = "keystore-info";

/// Per-user handle and keystore alias for the active key-blob family.
#[derive(Debug, Clone, Deserialize)]
pub struct KeystoreInfo {
    /// Filename stem shared by the artifact files.
    pub handle: String,
    /// User-scoped keystore alias holding the outer wrapping key.
    pub alias: String,
}

/// Read access to one user's spblob directory.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Store rooted at an explicit spblob directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store for `<system_de_root>/<uid>/spblob`.
    pub fn for_user(system_de_root: &Path, user_id: u32) -> Self {
        Self::new(system_de_root.join(user_id.to_string()).join("spblob"))
    }

    /// Directory this store reads from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when the spblob directory itself exists.
    pub fn present(&self) -> bool {
        self.root.is_dir()
    }

    /// Read `<handle><suffix>`, tolerating zero-padded handle variants.
    ///
    /// The first readable candidate wins. A candidate that exists but fails
    /// to read for non-`NotFound` reasons aborts with that error rather than
    /// falling through to the next variant.
    pub fn read(&self, handle: &str, suffix: &str) -> Result<Vec<u8>, UnlockError> {
        for stem in Self::handle_variants(handle) {
            let path = self.root.join(format!("{stem}{suffix}"));
            match fs::read(&path) {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(UnlockError::Io(err)),
            }
        }
        Err(UnlockError::BlobMissing(format!("{handle}{suffix}")))
    }

    /// True when `<handle><suffix>` exists under any variant.
    pub fn exists(&self, handle: &str, suffix: &str) -> bool {
        Self::handle_variants(handle)
            .into_iter()
            .any(|stem| self.root.join(format!("{stem}{suffix}")).is_file())
    }

    /// Resolve the handle and keystore alias for this user.
    ///
    /// The `keystore-info` record wins when present; otherwise the handle is
    /// recovered from the first `*.spblob` filename stem and the alias
    /// defaults to the platform convention `synthetic_password_<handle>`.
    pub fn resolve_keystore_info(&self) -> Result<KeystoreInfo, UnlockError> {
        let record = self.root.join(KEYSTORE_INFO_FILE);
        match fs::read_to_string(&record) {
            Ok(text) => {
                return toml::from_str(&text).map_err(|err| {
                    UnlockError::BlobCorrupt(format!("keystore-info record: {err}"))
                });
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(UnlockError::Io(err)),
        }
        let handle = self.scan_for_handle()?;
        let alias = format!("synthetic_password_{handle}");
        Ok(KeystoreInfo { handle, alias })
    }

    /// Find the handle stem by scanning for a `*.spblob` file.
    fn scan_for_handle(&self) -> Result<String, UnlockError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(UnlockError::BlobMissing(format!(
                    "{}",
                    self.root.display()
                )))
            }
            Err(err) => return Err(UnlockError::Io(err)),
        };
        let mut stems: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(SUFFIX_SPBLOB) {
                stems.push(stem.to_string());
            }
        }
        // Deterministic pick when several families are present.
        stems.sort();
        stems
            .into_iter()
            .next()
            .ok_or_else(|| UnlockError::BlobMissing(format!("*{SUFFIX_SPBLOB}")))
    }

    fn handle_variants(handle: &str) -> [String; 3] {
        [
            handle.to_string(),
            format!("0{handle}"),
            format!("00{handle}"),
        ]
    }
}
