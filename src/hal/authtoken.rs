//! Hardware auth token codec.
//!
//! Gatekeeper returns the token as the raw 69-byte C ABI record: a leading
//! version byte, then host-endian `challenge`, `user_id`, and
//! `authenticator_id`, then network-order `authenticator_type` and
//! `timestamp`, then the 32-byte HMAC. The two network-order fields must be
//! byte-swapped before the authorization service sees them; parsing does
//! that swap exactly once.

use super::HalError;

/// Total wire size of the record.
pub const AUTH_TOKEN_LEN: usize = 69;
/// Width of the trailing HMAC.
pub const AUTH_TOKEN_HMAC_LEN: usize = 32;

/// A parsed hardware auth token with all fields in host order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareAuthToken {
    pub version: u8,
    pub challenge: u64,
    pub user_id: u64,
    pub authenticator_id: u64,
    pub authenticator_type: u32,
    pub timestamp_ms: u64,
    pub hmac: [u8; AUTH_TOKEN_HMAC_LEN],
}

impl HardwareAuthToken {
    /// Parse the raw gatekeeper blob.
    pub fn parse(bytes: &[u8]) -> Result<Self, HalError> {
        if bytes.len() != AUTH_TOKEN_LEN {
            return Err(HalError::Protocol(format!(
                "auth token is {} bytes, expected {AUTH_TOKEN_LEN}",
                bytes.len()
            )));
        }
        let mut hmac = [0u8; AUTH_TOKEN_HMAC_LEN];
        hmac.copy_from_slice(&bytes[37..69]);
        Ok(Self {
            version: bytes[0],
            challenge: u64::from_ne_bytes(fixed(&bytes[1..9])),
            user_id: u64::from_ne_bytes(fixed(&bytes[9..17])),
            authenticator_id: u64::from_ne_bytes(fixed(&bytes[17..25])),
            authenticator_type: u32::from_be_bytes(fixed(&bytes[25..29])),
            timestamp_ms: u64::from_be_bytes(fixed(&bytes[29..37])),
            hmac,
        })
    }

    /// Serialize back to the wire layout, restoring the network-order
    /// fields. Forwarding a parsed token this way is byte-identical to the
    /// blob gatekeeper produced.
    pub fn to_wire(&self) -> [u8; AUTH_TOKEN_LEN] {
        let mut out = [0u8; AUTH_TOKEN_LEN];
        out[0] = self.version;
        out[1..9].copy_from_slice(&self.challenge.to_ne_bytes());
        out[9..17].copy_from_slice(&self.user_id.to_ne_bytes());
        out[17..25].copy_from_slice(&self.authenticator_id.to_ne_bytes());
        out[25..29].copy_from_slice(&self.authenticator_type.to_be_bytes());
        out[29..37].copy_from_slice(&self.timestamp_ms.to_be_bytes());
        out[37..69].copy_from_slice(&self.hmac);
        out
    }
}

/// Copy an already-validated slice into a fixed-width array.
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
