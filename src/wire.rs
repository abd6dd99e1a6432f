//! On-disk blob layouts and a bounds-checked reader.
//!
//! Every artifact is parsed through [`BlobReader`], which validates each
//! declared length against the bytes actually present and fails with
//! `BlobCorrupt` naming the offending field. `.pwd` integers are big-endian
//! on disk; the `.weaver` slot is host-endian as observed on devices and is
//! deliberately not "corrected".

use crate::error::UnlockError;

/// AES-GCM nonce width used by both envelope layers.
pub const GCM_IV_LEN: usize = 12;
/// AES-GCM tag width (128 bits), appended to ciphertext per AEAD convention.
pub const GCM_TAG_LEN: usize = 16;

/// Cursor over an untrusted byte blob.
pub struct BlobReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Take exactly `len` bytes or fail naming `field`.
    pub fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], UnlockError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            return Err(UnlockError::BlobCorrupt(format!(
                "field `{field}` needs {len} bytes, {} remain",
                self.data.len() - self.pos
            )));
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self, field: &str) -> Result<u8, UnlockError> {
        Ok(self.take(1, field)?[0])
    }

    /// Big-endian i32, the `.pwd` integer encoding.
    pub fn read_i32_be(&mut self, field: &str) -> Result<i32, UnlockError> {
        let bytes = self.take(4, field)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Host-endian i32, the `.weaver` slot encoding.
    pub fn read_i32_ne(&mut self, field: &str) -> Result<i32, UnlockError> {
        let bytes = self.take(4, field)?;
        Ok(i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// A declared-length byte field: the i32 length prefix, then the bytes.
    pub fn read_len_prefixed(&mut self, field: &str) -> Result<&'a [u8], UnlockError> {
        let declared = self.read_i32_be(field)?;
        if declared < 0 {
            return Err(UnlockError::BlobCorrupt(format!(
                "field `{field}` declares negative length {declared}"
            )));
        }
        self.take(declared as usize, field)
    }

    /// All bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

// ---------------------------------------------------------------------------
// .pwd
// ---------------------------------------------------------------------------

/// Parsed `.pwd` record: credential class, scrypt exponents, salt, and the
/// enrolled gatekeeper handle.
#[derive(Debug)]
pub struct PasswordData {
    pub password_type: i32,
    pub scrypt_log_n: u8,
    pub scrypt_log_r: u8,
    pub scrypt_log_p: u8,
    pub salt: Vec<u8>,
    /// Enrolled gatekeeper handle; empty only when weaver is in use.
    pub password_handle: Vec<u8>,
}

impl PasswordData {
    pub fn parse(bytes: &[u8]) -> Result<Self, UnlockError> {
        let mut reader = BlobReader::new(bytes);
        let password_type = reader.read_i32_be("password_type")?;
        let scrypt_log_n = reader.read_u8("scryptN")?;
        let scrypt_log_r = reader.read_u8("scryptR")?;
        let scrypt_log_p = reader.read_u8("scryptP")?;
        let salt = reader.read_len_prefixed("salt")?;
        if salt.is_empty() {
            return Err(UnlockError::BlobCorrupt("salt is empty".into()));
        }
        let password_handle = reader.read_len_prefixed("password_handle")?;
        Ok(Self {
            password_type,
            scrypt_log_n,
            scrypt_log_r,
            scrypt_log_p,
            salt: salt.to_vec(),
            password_handle: password_handle.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// .spblob
// ---------------------------------------------------------------------------

/// Supported spblob envelope versions. Version 1 is legacy and rejected by
/// the unwrap path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpVersion {
    V2,
    V3,
}

/// Blob type byte for password-based synthetic passwords; the only type the
/// engine unwraps.
pub const SP_TYPE_PASSWORD_BASED: u8 = 0;

/// Parsed `.spblob` envelope: version, outer nonce, and the keystore-wrapped
/// ciphertext with its appended tag.
#[derive(Debug)]
pub struct SpBlob {
    pub version: SpVersion,
    pub iv: [u8; GCM_IV_LEN],
    pub ciphertext: Vec<u8>,
}

impl SpBlob {
    pub fn parse(bytes: &[u8]) -> Result<Self, UnlockError> {
        let mut reader = BlobReader::new(bytes);
        let version = match reader.read_u8("version")? {
            2 => SpVersion::V2,
            3 => SpVersion::V3,
            other => {
                return Err(UnlockError::BlobCorrupt(format!(
                    "unsupported spblob version {other}"
                )))
            }
        };
        let blob_type = reader.read_u8("type")?;
        if blob_type != SP_TYPE_PASSWORD_BASED {
            return Err(UnlockError::BlobCorrupt(format!(
                "unsupported spblob type {blob_type}"
            )));
        }
        let iv_bytes = reader.take(GCM_IV_LEN, "iv")?;
        let mut iv = [0u8; GCM_IV_LEN];
        iv.copy_from_slice(iv_bytes);
        let ciphertext = reader.remaining();
        if ciphertext.len() < GCM_TAG_LEN {
            return Err(UnlockError::BlobCorrupt(
                "spblob ciphertext shorter than gcm tag".into(),
            ));
        }
        Ok(Self {
            version,
            iv,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// .weaver
// ---------------------------------------------------------------------------

/// Parsed `.weaver` record naming the escrow slot.
#[derive(Debug)]
pub struct WeaverData {
    pub version: u8,
    pub slot: u32,
}

impl WeaverData {
    pub fn parse(bytes: &[u8]) -> Result<Self, UnlockError> {
        let mut reader = BlobReader::new(bytes);
        let version = reader.read_u8("version")?;
        let slot = reader.read_i32_ne("slot")?;
        if slot < 0 {
            return Err(UnlockError::BlobCorrupt(format!(
                "negative weaver slot {slot}"
            )));
        }
        Ok(Self {
            version,
            slot: slot as u32,
        })
    }
}
