//! Hardware service capabilities.
//!
//! Each hardware role the engine depends on (weaver, gatekeeper, keystore,
//! authorization, CE storage) is one capability trait. The orchestrator
//! holds only these traits; transport selection happens once at connect
//! time and is never revisited. In-repo transports live in [`socket`]; test
//! suites inject their own implementations.

/// 69-byte hardware auth token codec.
pub mod authtoken;
/// Process-wide blocking RPC dispatcher.
pub mod rpc;
/// Framed Unix-socket transport adapters for the recovery shims.
pub mod socket;

use std::fmt;

use crate::error::UnlockError;
use self::authtoken::HardwareAuthToken;

/// Gatekeeper addresses users by `100000 + uid`.
pub const GK_FAKE_UID_BASE: u32 = 100_000;
/// Flag selecting credential-encrypted storage in `prepare_user_storage`.
pub const STORAGE_FLAG_CE: u32 = 1 << 1;

// ---------------------------------------------------------------------------
// HalError
// ---------------------------------------------------------------------------

/// Transport-level failures common to all hardware roles.
#[derive(Debug)]
pub enum HalError {
    /// The service endpoint cannot be reached or refused the connection.
    Unavailable(String),
    /// The service answered with bytes the adapter cannot interpret.
    Protocol(String),
    /// Socket-level I/O failure mid-exchange.
    Io(std::io::Error),
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(detail) => write!(f, "unavailable: {detail}"),
            Self::Protocol(detail) => write!(f, "protocol: {detail}"),
            Self::Io(err) => write!(f, "io: {err}"),
        }
    }
}

impl std::error::Error for HalError {}

impl From<std::io::Error> for HalError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<HalError> for UnlockError {
    /// Transport failures surface as hardware unavailability.
    fn from(value: HalError) -> Self {
        UnlockError::HardwareUnavailable(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Outcome of presenting a (slot, key) pair to the weaver.
#[derive(Debug)]
pub enum WeaverVerify {
    /// Key matched; the escrowed payload is returned.
    Verified(Vec<u8>),
    /// Throttled; retry after this many milliseconds.
    Retry(u32),
    /// Key did not match the slot.
    Incorrect,
    /// Service-side failure.
    Failed,
}

/// Secure-element key escrow with brute-force throttling.
pub trait WeaverClient: Send + Sync {
    /// Key width the service expects, in bytes.
    fn key_size(&self) -> Result<u32, HalError>;

    /// Present `key` for `slot`.
    fn verify(&self, slot: u32, key: &[u8]) -> Result<WeaverVerify, HalError>;
}

/// Outcome of a gatekeeper credential check.
#[derive(Debug)]
pub enum GatekeeperVerify {
    /// Credential accepted; raw hardware auth token blob (may be empty on
    /// devices that do not mint tokens in recovery).
    Verified(Vec<u8>),
    /// Throttled; retry after this many milliseconds.
    Retry(u32),
    /// Credential rejected.
    Denied,
}

/// Password-handle verification issuing hardware auth tokens.
pub trait GatekeeperClient: Send + Sync {
    /// Verify `password_token` against the enrolled `handle` for the
    /// gatekeeper fake uid of this user. The challenge is always zero in
    /// the unlock path.
    fn verify(
        &self,
        user_id: u32,
        handle: &[u8],
        password_token: &[u8],
    ) -> Result<GatekeeperVerify, HalError>;
}

/// Opaque reference to a key the keystore agreed to operate with.
#[derive(Debug, Clone)]
pub struct KeyHandle {
    /// User-scoped alias the key was resolved from.
    pub alias: String,
}

/// Outcome of the keystore AES-GCM decrypt operation.
#[derive(Debug)]
pub enum KeystoreDecrypt {
    Plaintext(Vec<u8>),
    /// The operation was refused for auth reasons (`KeyNotYetValid`,
    /// `KeyUserNotAuthenticated`): no valid auth token was installed.
    AuthRequired,
}

/// Hardware-backed key blobs; here only the AES-256-GCM unwrap key.
pub trait KeystoreClient: Send + Sync {
    /// Liveness probe used while waiting for the daemon to come up.
    fn ready(&self) -> bool {
        true
    }

    /// Resolve `alias` to a key handle; `None` when the keystore no longer
    /// holds the key.
    fn get_key(&self, alias: &str) -> Result<Option<KeyHandle>, HalError>;

    /// One-shot AES-256-GCM decrypt: fixed parameters (GCM, no padding,
    /// 128-bit MAC), caller-supplied nonce, tag appended to `ciphertext`.
    fn decrypt(
        &self,
        key: &KeyHandle,
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<KeystoreDecrypt, HalError>;
}

/// Per-boot auth token broker feeding the keystore.
pub trait AuthorizationClient: Send + Sync {
    /// Install a token so a subsequent keystore operation finds it. Must be
    /// called before the keystore decrypt begins.
    fn add_auth_token(&self, token: &HardwareAuthToken) -> Result<(), HalError>;
}

/// The external CE-unlock collaborators invoked once the FBE secret exists.
pub trait CeStorage: Send + Sync {
    /// Install the FBE secret for this user's CE storage.
    fn unlock_ce_storage(&self, user_id: u32, secret: &[u8]) -> Result<(), HalError>;

    /// Prepare the now-unlocked storage (CE flag only in this engine).
    fn prepare_user_storage(&self, user_id: u32, flags: u32) -> Result<(), HalError>;
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// The full capability set the orchestrator runs against.
pub struct Services {
    /// Absent on devices without a weaver; required when `.weaver` exists.
    pub weaver: Option<Box<dyn WeaverClient>>,
    pub gatekeeper: Box<dyn GatekeeperClient>,
    pub keystore: Box<dyn KeystoreClient>,
    pub authorization: Box<dyn AuthorizationClient>,
    pub storage: Box<dyn CeStorage>,
}
