//! Stored-credential classification for the unlock UI.
//!
//! The probe only inspects on-disk state; it never touches hardware
//! services, so it is safe to run before `init()`.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::UnlockError;
use crate::store::{BlobStore, SUFFIX_PWD};
use crate::wire::PasswordData;

/// Public credential classes surfaced to the prompt UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// No credential artifacts exist for this user.
    None,
    /// Default-password user; unlock with the `"!"` marker credential.
    Default,
    Password,
    Pattern,
    Pin,
    /// Stored class 2 cannot distinguish PIN from password.
    PasswordOrPin,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::None => "none",
            Self::Default => "default",
            Self::Password => "password",
            Self::Pattern => "pattern",
            Self::Pin => "pin",
            Self::PasswordOrPin => "password-or-pin",
        };
        f.write_str(text)
    }
}

/// Probe outcome: the credential class plus the legacy gatekeeper file that
/// produced it, when the legacy fallback was used.
#[derive(Debug)]
pub struct ProbeResult {
    pub kind: CredentialKind,
    pub legacy_file: Option<PathBuf>,
}

/// Classify the stored credential for `user_id`.
///
/// Prefers the synthetic-password `.pwd` record; falls back to the legacy
/// gatekeeper key files when no spblob directory exists.
pub fn password_type(
    system_de_root: &Path,
    system_root: &Path,
    user_id: u32,
) -> Result<ProbeResult, UnlockError> {
    let store = BlobStore::for_user(system_de_root, user_id);
    if store.present() {
        return probe_spblob(&store);
    }
    Ok(probe_legacy(system_root, user_id))
}

fn probe_spblob(store: &BlobStore) -> Result<ProbeResult, UnlockError> {
    let info = match store.resolve_keystore_info() {
        Ok(info) => info,
        // Directory exists but holds no key-blob family: try the default path.
        Err(UnlockError::BlobMissing(_)) => {
            return Ok(ProbeResult {
                kind: CredentialKind::Default,
                legacy_file: None,
            })
        }
        Err(err) => return Err(err),
    };
    let raw = match store.read(&info.handle, SUFFIX_PWD) {
        Ok(raw) => raw,
        Err(UnlockError::BlobMissing(_)) => {
            return Ok(ProbeResult {
                kind: CredentialKind::Default,
                legacy_file: None,
            })
        }
        Err(err) => return Err(err),
    };
    let pwd = PasswordData::parse(&raw)?;
    let kind = match pwd.password_type {
        1 => CredentialKind::Pattern,
        2 => CredentialKind::PasswordOrPin,
        3 => CredentialKind::Pin,
        4 => CredentialKind::Password,
        // -1 and anything unrecognized: try the default password.
        _ => CredentialKind::Default,
    };
    Ok(ProbeResult {
        kind,
        legacy_file: None,
    })
}

fn probe_legacy(system_root: &Path, user_id: u32) -> ProbeResult {
    let dir = if user_id == 0 {
        system_root.to_path_buf()
    } else {
        system_root.join("users").join(user_id.to_string())
    };
    for (name, kind) in [
        ("gatekeeper.password.key", CredentialKind::Password),
        ("gatekeeper.pattern.key", CredentialKind::Pattern),
    ] {
        let path = dir.join(name);
        if path.is_file() {
            return ProbeResult {
                kind,
                legacy_file: Some(path),
            };
        }
    }
    ProbeResult {
        kind: CredentialKind::None,
        legacy_file: None,
    }
}
