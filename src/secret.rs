//! Wipe-on-drop containers for derived key material.
//!
//! Every intermediate secret in the unwrap pipeline (password token, weaver
//! key, application id, synthetic password, FBE secret) lives in [`Secret`].
//! The buffer is zeroized when dropped, cannot be cloned, and never prints
//! its contents through `Debug`.

use std::fmt;
use zeroize::Zeroize;

/// A byte buffer that is wiped before its memory is released.
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    /// Take ownership of an existing buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Copy a slice into a fresh secret buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Borrow the raw bytes. Callers must not copy them into longer-lived
    /// unmanaged storage.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Concatenate two buffers into a new secret (`self || tail`).
    pub fn concat(&self, tail: &[u8]) -> Secret {
        let mut joined = Vec::with_capacity(self.bytes.len() + tail.len());
        joined.extend_from_slice(&self.bytes);
        joined.extend_from_slice(tail);
        Secret::new(joined)
    }

    /// Lowercase hex rendering, itself held as a secret.
    pub fn to_hex(&self) -> Secret {
        Secret::new(hex::encode(&self.bytes).into_bytes())
    }
}

impl AsRef<[u8]> for Secret {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Secret {
    /// Render only the length; contents are never formatted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} bytes)", self.bytes.len())
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}
