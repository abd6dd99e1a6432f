//! Framed Unix-socket adapters for the recovery service shims.
//!
//! Each hardware role is reached over its own socket endpoint with one
//! request/response exchange per call: `opcode u8 | len u32be | payload`
//! out, `status u8 | len u32be | payload` back. Endpoint names come in two
//! generations; the newer name is probed first and the choice is made once
//! when the adapter is built, never per call.
//!
//! Calls run on the process-wide dispatcher ([`super::rpc`]); building the
//! adapters does not require the dispatcher, calling them does.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::authtoken::HardwareAuthToken;
use super::rpc;
use super::{
    AuthorizationClient, CeStorage, GatekeeperClient, GatekeeperVerify, HalError, KeyHandle,
    KeystoreClient, KeystoreDecrypt, Services, WeaverClient, WeaverVerify,
};
use crate::config::Config;

/// Upper bound on a response body; anything larger is a protocol error.
const MAX_FRAME_LEN: usize = 1 << 20;

// Response status bytes shared by all shims.
const STATUS_OK: u8 = 0;
const STATUS_RETRY: u8 = 1;
const STATUS_DENIED: u8 = 2;
const STATUS_NOT_FOUND: u8 = 3;
const STATUS_FAILED: u8 = 4;

// Per-role opcodes.
const OP_WEAVER_KEY_SIZE: u8 = 0x01;
const OP_WEAVER_VERIFY: u8 = 0x02;
const OP_GK_VERIFY: u8 = 0x01;
const OP_KS_PING: u8 = 0x00;
const OP_KS_GET_KEY: u8 = 0x01;
const OP_KS_DECRYPT: u8 = 0x02;
const OP_AUTH_ADD_TOKEN: u8 = 0x01;
const OP_STORAGE_UNLOCK_CE: u8 = 0x01;
const OP_STORAGE_PREPARE: u8 = 0x02;

/// Build the full capability set from configured endpoints.
///
/// Weaver is optional: a device without a weaver shim simply has no
/// endpoint and the engine takes the secdiscardable path. Every other role
/// must resolve or connection fails.
pub fn connect(config: &Config) -> Result<Services, HalError> {
    let weaver = probe_endpoint(&config.socket_dir, &config.endpoints.weaver)
        .map(|endpoint| Box::new(SocketWeaver { endpoint }) as Box<dyn WeaverClient>);
    let gatekeeper = require_endpoint(config, "gatekeeper", &config.endpoints.gatekeeper)?;
    let keystore = require_endpoint(config, "keystore", &config.endpoints.keystore)?;
    let authorization =
        require_endpoint(config, "authorization", &config.endpoints.authorization)?;
    let storage = require_endpoint(config, "storage", &config.endpoints.storage)?;
    Ok(Services {
        weaver,
        gatekeeper: Box::new(SocketGatekeeper {
            endpoint: gatekeeper,
        }),
        keystore: Box::new(SocketKeystore { endpoint: keystore }),
        authorization: Box::new(SocketAuthorization {
            endpoint: authorization,
        }),
        storage: Box::new(SocketStorage { endpoint: storage }),
    })
}

/// Pick the first endpoint candidate that exists under the socket dir.
pub fn probe_endpoint(socket_dir: &Path, candidates: &[String]) -> Option<PathBuf> {
    for name in candidates {
        let path = socket_dir.join(name);
        if path.exists() {
            debug!(endpoint = %path.display(), "selected service endpoint");
            return Some(path);
        }
    }
    None
}

fn require_endpoint(
    config: &Config,
    role: &str,
    candidates: &[String],
) -> Result<PathBuf, HalError> {
    probe_endpoint(&config.socket_dir, candidates)
        .ok_or_else(|| HalError::Unavailable(format!("no {role} endpoint")))
}

/// One framed exchange over a fresh connection.
fn exchange(endpoint: &Path, opcode: u8, payload: &[u8]) -> Result<(u8, Vec<u8>), HalError> {
    let mut stream = UnixStream::connect(endpoint)
        .map_err(|err| HalError::Unavailable(format!("{}: {err}", endpoint.display())))?;
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(opcode);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame)?;
    stream.flush()?;

    let mut header = [0u8; 5];
    stream.read_exact(&mut header)?;
    let status = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(HalError::Protocol(format!("response body of {len} bytes")));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body)?;
    Ok((status, body))
}

/// Dispatch one exchange on the RPC pool.
fn dispatched_exchange(
    endpoint: &Path,
    opcode: u8,
    payload: Vec<u8>,
) -> Result<(u8, Vec<u8>), HalError> {
    let endpoint = endpoint.to_path_buf();
    rpc::dispatch(move || exchange(&endpoint, opcode, &payload))?
}

fn retry_millis(body: &[u8]) -> Result<u32, HalError> {
    if body.len() != 4 {
        return Err(HalError::Protocol("retry body is not 4 bytes".into()));
    }
    Ok(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
}

// ---------------------------------------------------------------------------
// Weaver
// ---------------------------------------------------------------------------

struct SocketWeaver {
    endpoint: PathBuf,
}

/// Map a weaver-verify response frame to the capability outcome.
fn decode_weaver_verify(status: u8, body: Vec<u8>) -> Result<WeaverVerify, HalError> {
    match status {
        STATUS_OK => Ok(WeaverVerify::Verified(body)),
        STATUS_RETRY => Ok(WeaverVerify::Retry(retry_millis(&body)?)),
        STATUS_DENIED => Ok(WeaverVerify::Incorrect),
        STATUS_FAILED => Ok(WeaverVerify::Failed),
        other => Err(HalError::Protocol(format!("weaver status {other}"))),
    }
}

impl WeaverClient for SocketWeaver {
    fn key_size(&self) -> Result<u32, HalError> {
        let (status, body) = dispatched_exchange(&self.endpoint, OP_WEAVER_KEY_SIZE, Vec::new())?;
        if status != STATUS_OK || body.len() != 4 {
            return Err(HalError::Protocol("bad weaver key-size response".into()));
        }
        Ok(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
    }

    fn verify(&self, slot: u32, key: &[u8]) -> Result<WeaverVerify, HalError> {
        let mut payload = Vec::with_capacity(4 + key.len());
        payload.extend_from_slice(&slot.to_be_bytes());
        payload.extend_from_slice(key);
        let (status, body) = dispatched_exchange(&self.endpoint, OP_WEAVER_VERIFY, payload)?;
        decode_weaver_verify(status, body)
    }
}

// ---------------------------------------------------------------------------
// Gatekeeper
// ---------------------------------------------------------------------------

struct SocketGatekeeper {
    endpoint: PathBuf,
}

/// Map a gatekeeper-verify response frame to the capability outcome.
fn decode_gatekeeper_verify(status: u8, body: Vec<u8>) -> Result<GatekeeperVerify, HalError> {
    match status {
        STATUS_OK => Ok(GatekeeperVerify::Verified(body)),
        STATUS_RETRY => Ok(GatekeeperVerify::Retry(retry_millis(&body)?)),
        STATUS_DENIED | STATUS_FAILED => Ok(GatekeeperVerify::Denied),
        other => Err(HalError::Protocol(format!("gatekeeper status {other}"))),
    }
}

impl GatekeeperClient for SocketGatekeeper {
    fn verify(
        &self,
        user_id: u32,
        handle: &[u8],
        password_token: &[u8],
    ) -> Result<GatekeeperVerify, HalError> {
        let mut payload = Vec::with_capacity(16 + handle.len() + password_token.len());
        payload.extend_from_slice(&user_id.to_be_bytes());
        // Challenge is always zero in the unlock path.
        payload.extend_from_slice(&0u64.to_be_bytes());
        payload.extend_from_slice(&(handle.len() as u32).to_be_bytes());
        payload.extend_from_slice(handle);
        payload.extend_from_slice(&(password_token.len() as u32).to_be_bytes());
        payload.extend_from_slice(password_token);
        let (status, body) = dispatched_exchange(&self.endpoint, OP_GK_VERIFY, payload)?;
        decode_gatekeeper_verify(status, body)
    }
}

// ---------------------------------------------------------------------------
// Keystore
// ---------------------------------------------------------------------------

struct SocketKeystore {
    endpoint: PathBuf,
}

/// Map a keystore-decrypt response frame to the capability outcome.
fn decode_keystore_decrypt(status: u8, body: Vec<u8>) -> Result<KeystoreDecrypt, HalError> {
    match status {
        STATUS_OK => Ok(KeystoreDecrypt::Plaintext(body)),
        STATUS_DENIED => Ok(KeystoreDecrypt::AuthRequired),
        other => Err(HalError::Protocol(format!("keystore status {other}"))),
    }
}

impl KeystoreClient for SocketKeystore {
    fn ready(&self) -> bool {
        // Readiness polling runs before the dispatcher matters; probe inline.
        matches!(exchange(&self.endpoint, OP_KS_PING, &[]), Ok((STATUS_OK, _)))
    }

    fn get_key(&self, alias: &str) -> Result<Option<KeyHandle>, HalError> {
        let (status, _body) =
            dispatched_exchange(&self.endpoint, OP_KS_GET_KEY, alias.as_bytes().to_vec())?;
        match status {
            STATUS_OK => Ok(Some(KeyHandle {
                alias: alias.to_string(),
            })),
            STATUS_NOT_FOUND => Ok(None),
            other => Err(HalError::Protocol(format!("keystore status {other}"))),
        }
    }

    fn decrypt(
        &self,
        key: &KeyHandle,
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<KeystoreDecrypt, HalError> {
        let alias = key.alias.as_bytes();
        let mut payload = Vec::with_capacity(8 + alias.len() + iv.len() + ciphertext.len());
        payload.extend_from_slice(&(alias.len() as u32).to_be_bytes());
        payload.extend_from_slice(alias);
        payload.extend_from_slice(&(iv.len() as u32).to_be_bytes());
        payload.extend_from_slice(iv);
        payload.extend_from_slice(ciphertext);
        let (status, body) = dispatched_exchange(&self.endpoint, OP_KS_DECRYPT, payload)?;
        decode_keystore_decrypt(status, body)
    }
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

struct SocketAuthorization {
    endpoint: PathBuf,
}

impl AuthorizationClient for SocketAuthorization {
    fn add_auth_token(&self, token: &HardwareAuthToken) -> Result<(), HalError> {
        let (status, _body) =
            dispatched_exchange(&self.endpoint, OP_AUTH_ADD_TOKEN, token.to_wire().to_vec())?;
        if status != STATUS_OK {
            return Err(HalError::Protocol(format!("authorization status {status}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CE storage
// ---------------------------------------------------------------------------

struct SocketStorage {
    endpoint: PathBuf,
}

impl CeStorage for SocketStorage {
    fn unlock_ce_storage(&self, user_id: u32, secret: &[u8]) -> Result<(), HalError> {
        let mut payload = Vec::with_capacity(8 + secret.len());
        payload.extend_from_slice(&user_id.to_be_bytes());
        payload.extend_from_slice(&(secret.len() as u32).to_be_bytes());
        payload.extend_from_slice(secret);
        let (status, _body) = dispatched_exchange(&self.endpoint, OP_STORAGE_UNLOCK_CE, payload)?;
        if status != STATUS_OK {
            return Err(HalError::Protocol(format!("storage status {status}")));
        }
        Ok(())
    }

    fn prepare_user_storage(&self, user_id: u32, flags: u32) -> Result<(), HalError> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&user_id.to_be_bytes());
        payload.extend_from_slice(&flags.to_be_bytes());
        let (status, _body) = dispatched_exchange(&self.endpoint, OP_STORAGE_PREPARE, payload)?;
        if status != STATUS_OK {
            return Err(HalError::Protocol(format!("storage status {status}")));
        }
        Ok(())
    }
}
