//! Unified error types for the unlock engine.

use std::fmt;

// ---------------------------------------------------------------------------
// UnlockError — engine surface
// ---------------------------------------------------------------------------

/// Terminal failures surfaced by `unlock` and the probe.
///
/// No variant is retried internally; the caller decides whether to prompt
/// again and re-invoke.
#[derive(Debug)]
pub enum UnlockError {
    /// A required on-disk artifact was not found under any handle variant.
    BlobMissing(String),
    /// A blob declared lengths beyond its bytes or failed validation.
    BlobCorrupt(String),
    /// The supplied credential was rejected by weaver, gatekeeper, or the
    /// auth-bound keystore operation.
    CredentialWrong,
    /// A hardware service throttled the attempt; retry after this many ms.
    RetryAfter(u32),
    /// A hardware service could not be reached or failed generically.
    HardwareUnavailable(String),
    /// The keystore no longer holds the wrapping key for this handle.
    KeyRotated,
    /// Scrypt rejected its parameters or failed to produce output.
    Kdf(String),
    /// AES-GCM authentication failed on the inner envelope.
    Crypto,
    /// Any other I/O failure.
    Io(std::io::Error),
}

impl fmt::Display for UnlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlobMissing(name) => write!(f, "blob missing: {name}"),
            Self::BlobCorrupt(detail) => write!(f, "blob corrupt: {detail}"),
            Self::CredentialWrong => write!(f, "credential rejected"),
            Self::RetryAfter(ms) => write!(f, "throttled, retry after {ms} ms"),
            Self::HardwareUnavailable(detail) => write!(f, "hardware unavailable: {detail}"),
            Self::KeyRotated => write!(f, "keystore key rotated or removed"),
            Self::Kdf(detail) => write!(f, "kdf: {detail}"),
            Self::Crypto => write!(f, "envelope authentication failed"),
            Self::Io(err) => write!(f, "io: {err}"),
        }
    }
}

impl std::error::Error for UnlockError {}

impl From<std::io::Error> for UnlockError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}
