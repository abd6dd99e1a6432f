//! Personalized hashing for synthetic-password key material.
//!
//! Two derivations are used by the unwrap pipeline:
//!
//! - [`personalize`]: `SHA-512(label padded to 128 bytes with NULs || data)`,
//!   yielding 64 bytes. This is the workhorse for every keyed transform in
//!   the v2 path and for intermediate secrets in both paths.
//! - [`sp800_derive`]: NIST SP 800-108 counter-mode KDF with HMAC-SHA-256 as
//!   the PRF, yielding 32 bytes. Used only to produce the FBE secret for
//!   version-3 blobs.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::secret::Secret;

/// Labels are right-padded with NUL bytes to exactly this width.
pub const LABEL_PAD_LEN: usize = 128;
/// Output width of [`personalize`].
pub const PERSONALIZED_LEN: usize = 64;
/// Output width of [`sp800_derive`].
pub const SP800_OUT_LEN: usize = 32;

/// Keys the AES-256 unwrap of the inner envelope.
pub const LABEL_APPLICATION_ID: &str = "application-id";
/// Post-processes the synthetic password into the FBE secret.
pub const LABEL_FBE_KEY: &str = "fbe-key";
/// Transforms the on-disk secdiscardable blob.
pub const LABEL_SECDISCARDABLE: &str = "secdiscardable-transform";
/// Derives the key presented to the weaver slot.
pub const LABEL_WEAVER_KEY: &str = "weaver-key";
/// Transforms the weaver payload into the path secret.
pub const LABEL_WEAVER_PASSWORD: &str = "weaver-pwd";
/// Derives the token presented to gatekeeper.
pub const LABEL_GK_AUTH: &str = "user-gk-authentication";
/// Fixed context string for the v3 FBE-secret derivation.
pub const SP800_CONTEXT_FBE_KEY: &str = "fbe-key-context";

type HmacSha256 = Hmac<Sha256>;

/// `SHA-512(pad_128(label) || data)`, 64 bytes.
///
/// The label must be shorter than the pad width; all labels used by the
/// engine are compile-time constants well under it.
pub fn personalize(label: &str, data: &[u8]) -> Secret {
    debug_assert!(label.len() <= LABEL_PAD_LEN);
    let mut hasher = Sha512::new();
    hasher.update(label.as_bytes());
    hasher.update(&ZERO_PAD[..LABEL_PAD_LEN - label.len()]);
    hasher.update(data);
    Secret::from_slice(&hasher.finalize())
}

/// SP 800-108 counter-mode KDF, HMAC-SHA-256 PRF keyed by `data`, 32 bytes.
///
/// Fixed-input layout matches the platform derivation:
/// `[1]_be32 || label || 0x00 || context || [context_bits]_be32 || [256]_be32`.
/// The context length is encoded in bits, as the platform encodes it.
pub fn sp800_derive(label: &str, context: &str, data: &[u8]) -> Secret {
    let mut mac = HmacSha256::new_from_slice(data).expect("hmac accepts any key length");
    mac.update(&1u32.to_be_bytes());
    mac.update(label.as_bytes());
    mac.update(&[0u8]);
    mac.update(context.as_bytes());
    mac.update(&((context.len() as u32) * 8).to_be_bytes());
    mac.update(&((SP800_OUT_LEN as u32) * 8).to_be_bytes());
    Secret::from_slice(&mac.finalize().into_bytes())
}

static ZERO_PAD: [u8; LABEL_PAD_LEN] = [0u8; LABEL_PAD_LEN];
