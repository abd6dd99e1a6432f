//! End-to-end unlock scenarios against stub hardware services.
//!
//! Each scenario lays the on-disk artifacts out in a temp directory, wires
//! the engine to recording stubs, and checks both the outcome and which
//! services were (not) touched.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use spunlock::config::Config;
use spunlock::engine::{Engine, DEFAULT_CREDENTIAL};
use spunlock::error::UnlockError;
use spunlock::hal::authtoken::HardwareAuthToken;
use spunlock::hal::{
    AuthorizationClient, CeStorage, GatekeeperClient, GatekeeperVerify, HalError, KeyHandle,
    KeystoreClient, KeystoreDecrypt, Services, WeaverClient, WeaverVerify, GK_FAKE_UID_BASE,
    STORAGE_FLAG_CE,
};
use spunlock::kdf;
use spunlock::personalize::{
    personalize, sp800_derive, LABEL_APPLICATION_ID, LABEL_FBE_KEY, LABEL_SECDISCARDABLE,
    LABEL_WEAVER_KEY, LABEL_WEAVER_PASSWORD, SP800_CONTEXT_FBE_KEY,
};

const USER: u32 = 0;
const HANDLE: &str = "b00b1e5";
const IV_LEN: usize = 12;

// ---------------------------------------------------------------------------
// fixtures
// ---------------------------------------------------------------------------

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Self-cleaning scenario directory with the engine config pointed at it.
struct Scenario {
    root: PathBuf,
    config: Config,
}

impl Scenario {
    fn new(name: &str) -> Self {
        let suffix = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!("spunlock-e2e-{name}-{suffix}"));
        fs::create_dir_all(&root).unwrap();
        let mut config = Config::default();
        config.system_de_root = root.join("system_de");
        config.system_root = root.join("system");
        config.keystore_db = root.join("keystore/persistent.sqlite");
        config.keystore_db_overlay = root.join("overlay/persistent.sqlite");
        config.keystore_poll_attempts = 2;
        config.keystore_poll_interval_ms = 1;
        Self { root, config }
    }

    fn write_blob(&self, name: &str, bytes: &[u8]) {
        let path = self
            .root
            .join(format!("system_de/{USER}/spblob/{name}"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }
}

impl Drop for Scenario {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn encode_password_data(
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

fn encode_spblob(version: u8, ciphertext: &[u8]) -> Vec<u8> {
    let mut out = vec![version, 0u8];
    out.extend_from_slice(&[0x11u8; IV_LEN]);
    out.extend_from_slice(ciphertext);
    out
}

fn encode_weaver_record(slot: i32) -> Vec<u8> {
    let mut out = vec![1u8];
    out.extend_from_slice(&slot.to_ne_bytes());
    out
}

/// Inner envelope (`iv || ct || tag`) for a synthetic password under an
/// application id, mirroring how enrollment wraps it.
fn build_inner_envelope(application_id: &[u8], synthetic_password: &[u8]) -> Vec<u8> {
    let personalized = personalize(LABEL_APPLICATION_ID, application_id);
    let cipher = Aes256Gcm::new_from_slice(&personalized.as_bytes()[..32]).unwrap();
    let inner_iv = [0x42u8; IV_LEN];
    let mut envelope = inner_iv.to_vec();
    envelope.extend_from_slice(
        &cipher
            .encrypt(Nonce::from_slice(&inner_iv), synthetic_password)
            .unwrap(),
    );
    envelope
}

// ---------------------------------------------------------------------------
// stubs
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
struct Counters {
    weaver: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    gatekeeper: Arc<Mutex<u32>>,
    keystore: Arc<Mutex<u32>>,
    auth_tokens: Arc<Mutex<Vec<HardwareAuthToken>>>,
    unlocked: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    prepared: Arc<Mutex<Vec<(u32, u32)>>>,
}

struct StubWeaver {
    payload: Vec<u8>,
    expected_slot: u32,
    expected_key: Vec<u8>,
    counters: Counters,
}

impl WeaverClient for StubWeaver {
    fn key_size(&self) -> Result<u32, HalError> {
        Ok(64)
    }

    fn verify(&self, slot: u32, key: &[u8]) -> Result<WeaverVerify, HalError> {
        self.counters
            .weaver
            .lock()
            .unwrap()
            .push((slot, key.to_vec()));
        if slot == self.expected_slot && key == self.expected_key {
            Ok(WeaverVerify::Verified(self.payload.clone()))
        } else {
            Ok(WeaverVerify::Incorrect)
        }
    }
}

enum GatekeeperScript {
    Accept(Vec<u8>),
    Deny,
    Throttle(u32),
}

struct StubGatekeeper {
    script: GatekeeperScript,
    counters: Counters,
}

impl GatekeeperClient for StubGatekeeper {
    fn verify(
        &self,
        _user_id: u32,
        _handle: &[u8],
        _token: &[u8],
    ) -> Result<GatekeeperVerify, HalError> {
        *self.counters.gatekeeper.lock().unwrap() += 1;
        Ok(match &self.script {
            GatekeeperScript::Accept(blob) => GatekeeperVerify::Verified(blob.clone()),
            GatekeeperScript::Deny => GatekeeperVerify::Denied,
            GatekeeperScript::Throttle(ms) => GatekeeperVerify::Retry(*ms),
        })
    }
}

/// Keystore stub standing in for the outer AES-GCM wrap: it hands back the
/// registered envelope for the registered ciphertext.
struct StubKeystore {
    alias: String,
    ciphertext: Vec<u8>,
    envelope: Vec<u8>,
    counters: Counters,
}

impl KeystoreClient for StubKeystore {
    fn get_key(&self, alias: &str) -> Result<Option<KeyHandle>, HalError> {
        Ok((alias == self.alias).then(|| KeyHandle {
            alias: alias.to_string(),
        }))
    }

    fn decrypt(
        &self,
        _key: &KeyHandle,
        _iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<KeystoreDecrypt, HalError> {
        *self.counters.keystore.lock().unwrap() += 1;
        if ciphertext == self.ciphertext {
            Ok(KeystoreDecrypt::Plaintext(self.envelope.clone()))
        } else {
            Err(HalError::Protocol("unexpected ciphertext".into()))
        }
    }
}

struct StubAuthorization {
    counters: Counters,
}

impl AuthorizationClient for StubAuthorization {
    fn add_auth_token(&self, token: &HardwareAuthToken) -> Result<(), HalError> {
        self.counters.auth_tokens.lock().unwrap().push(token.clone());
        Ok(())
    }
}

struct StubStorage {
    counters: Counters,
}

impl CeStorage for StubStorage {
    fn unlock_ce_storage(&self, user_id: u32, secret: &[u8]) -> Result<(), HalError> {
        self.counters
            .unlocked
            .lock()
            .unwrap()
            .push((user_id, secret.to_vec()));
        Ok(())
    }

    fn prepare_user_storage(&self, user_id: u32, flags: u32) -> Result<(), HalError> {
        self.counters.prepared.lock().unwrap().push((user_id, flags));
        Ok(())
    }
}

fn services(
    weaver: Option<StubWeaver>,
    gatekeeper: GatekeeperScript,
    keystore: StubKeystore,
    counters: &Counters,
) -> Services {
    Services {
        weaver: weaver.map(|w| Box::new(w) as Box<dyn WeaverClient>),
        gatekeeper: Box::new(StubGatekeeper {
            script: gatekeeper,
            counters: counters.clone(),
        }),
        keystore: Box::new(keystore),
        authorization: Box::new(StubAuthorization {
            counters: counters.clone(),
        }),
        storage: Box::new(StubStorage {
            counters: counters.clone(),
        }),
    }
}

fn alias() -> String {
    format!("synthetic_password_{HANDLE}")
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[test]
fn default_password_v2_takes_secdis_path_without_gatekeeper() {
    let scenario = Scenario::new("default-v2");
    let counters = Counters::default();

    let secdis = vec![0x77u8; 256];
    let token = kdf::default_password_token();
    let application_id = token.concat(personalize(LABEL_SECDISCARDABLE, &secdis).as_bytes());
    let synthetic_password = b"default-user-synthetic-password!".to_vec();
    let envelope = build_inner_envelope(application_id.as_bytes(), &synthetic_password);
    let outer = b"keystore-wrapped-outer-envelope!".to_vec();

    scenario.write_blob(&format!("{HANDLE}.spblob"), &encode_spblob(2, &outer));
    scenario.write_blob(&format!("{HANDLE}.secdis"), &secdis);

    let keystore = StubKeystore {
        alias: alias(),
        ciphertext: outer,
        envelope,
        counters: counters.clone(),
    };
    let engine = Engine::new(
        scenario.config.clone(),
        services(None, GatekeeperScript::Deny, keystore, &counters),
    );
    engine.unlock(USER, DEFAULT_CREDENTIAL).unwrap();

    // The secret handed to CE storage is the hex form of the personalized hash.
    let expected = personalize(LABEL_FBE_KEY, &synthetic_password).to_hex();
    let unlocked = counters.unlocked.lock().unwrap();
    assert_eq!(*unlocked, [(USER, expected.as_bytes().to_vec())]);
    // The default credential never consults gatekeeper.
    assert_eq!(*counters.gatekeeper.lock().unwrap(), 0);
    assert_eq!(
        *counters.prepared.lock().unwrap(),
        [(USER, STORAGE_FLAG_CE)]
    );
}

#[test]
fn weaver_v3_derives_sp800_secret() {
    let scenario = Scenario::new("weaver-v3");
    let counters = Counters::default();

    let salt = [0x31u8; 16];
    scenario.write_blob(
        &format!("{HANDLE}.pwd"),
        &encode_password_data(3, 4, 0, 0, &salt, &[0xEEu8; 58]),
    );
    scenario.write_blob(&format!("{HANDLE}.weaver"), &encode_weaver_record(7));
    // Weaver-path unlocks must ignore secdiscardable content entirely.
    scenario.write_blob(&format!("{HANDLE}.secdis"), b"garbage-that-must-not-matter");

    let token = kdf::derive_password_token(b"1234", &salt, 4, 0, 0).unwrap();
    let weaver_key = personalize(LABEL_WEAVER_KEY, token.as_bytes());
    let payload: Vec<u8> = (0u8..0x40).collect();
    let application_id =
        token.concat(personalize(LABEL_WEAVER_PASSWORD, &payload).as_bytes());

    let synthetic_password = vec![0xAAu8; 32];
    let envelope = build_inner_envelope(application_id.as_bytes(), &synthetic_password);
    let outer = b"keystore-wrapped-weaver-envelope".to_vec();
    scenario.write_blob(&format!("{HANDLE}.spblob"), &encode_spblob(3, &outer));

    let weaver = StubWeaver {
        payload,
        expected_slot: 7,
        expected_key: weaver_key.as_bytes().to_vec(),
        counters: counters.clone(),
    };
    let keystore = StubKeystore {
        alias: alias(),
        ciphertext: outer,
        envelope,
        counters: counters.clone(),
    };
    let engine = Engine::new(
        scenario.config.clone(),
        services(Some(weaver), GatekeeperScript::Deny, keystore, &counters),
    );
    engine.unlock(USER, "1234").unwrap();

    let expected = sp800_derive(LABEL_FBE_KEY, SP800_CONTEXT_FBE_KEY, &synthetic_password);
    let unlocked = counters.unlocked.lock().unwrap();
    assert_eq!(*unlocked, [(USER, expected.as_bytes().to_vec())]);
    // The weaver saw exactly one verify with the personalized key.
    let weaver_calls = counters.weaver.lock().unwrap();
    assert_eq!(weaver_calls.len(), 1);
    assert_eq!(weaver_calls[0].0, 7);
    // Gatekeeper plays no part on the weaver path.
    assert_eq!(*counters.gatekeeper.lock().unwrap(), 0);
}

#[test]
fn wrong_pin_on_secdis_path_stops_before_keystore() {
    let scenario = Scenario::new("wrong-pin");
    let counters = Counters::default();

    let salt = [0x31u8; 16];
    scenario.write_blob(
        &format!("{HANDLE}.pwd"),
        &encode_password_data(3, 4, 0, 0, &salt, &[0xEEu8; 58]),
    );
    scenario.write_blob(&format!("{HANDLE}.secdis"), &[0x44u8; 64]);
    scenario.write_blob(&format!("{HANDLE}.spblob"), &encode_spblob(2, &[0u8; 32]));

    let keystore = StubKeystore {
        alias: alias(),
        ciphertext: Vec::new(),
        envelope: Vec::new(),
        counters: counters.clone(),
    };
    let engine = Engine::new(
        scenario.config.clone(),
        services(None, GatekeeperScript::Deny, keystore, &counters),
    );
    let err = engine.unlock(USER, "9999").unwrap_err();
    assert!(matches!(err, UnlockError::CredentialWrong), "got: {err}");
    // No keystore operation was begun and no token installed.
    assert_eq!(*counters.keystore.lock().unwrap(), 0);
    assert!(counters.auth_tokens.lock().unwrap().is_empty());
}

#[test]
fn gatekeeper_throttle_surfaces_retry_and_stops() {
    let scenario = Scenario::new("gk-retry");
    let counters = Counters::default();

    let salt = [0x31u8; 16];
    scenario.write_blob(
        &format!("{HANDLE}.pwd"),
        &encode_password_data(3, 4, 0, 0, &salt, &[0xEEu8; 58]),
    );
    scenario.write_blob(&format!("{HANDLE}.secdis"), &[0x44u8; 64]);
    scenario.write_blob(&format!("{HANDLE}.spblob"), &encode_spblob(2, &[0u8; 32]));

    let keystore = StubKeystore {
        alias: alias(),
        ciphertext: Vec::new(),
        envelope: Vec::new(),
        counters: counters.clone(),
    };
    let engine = Engine::new(
        scenario.config.clone(),
        services(None, GatekeeperScript::Throttle(30_000), keystore, &counters),
    );
    let err = engine.unlock(USER, "9999").unwrap_err();
    match err {
        UnlockError::RetryAfter(ms) => assert_eq!(ms, 30_000),
        other => panic!("expected RetryAfter, got {other}"),
    }
    assert_eq!(*counters.keystore.lock().unwrap(), 0);
    assert!(counters.auth_tokens.lock().unwrap().is_empty());
}

#[test]
fn corrupt_spblob_version_fails_before_any_rpc() {
    let scenario = Scenario::new("corrupt-spblob");
    let counters = Counters::default();

    scenario.write_blob(&format!("{HANDLE}.secdis"), &[0x44u8; 64]);
    scenario.write_blob(&format!("{HANDLE}.spblob"), &encode_spblob(5, &[0u8; 32]));

    let keystore = StubKeystore {
        alias: alias(),
        ciphertext: Vec::new(),
        envelope: Vec::new(),
        counters: counters.clone(),
    };
    let engine = Engine::new(
        scenario.config.clone(),
        services(None, GatekeeperScript::Deny, keystore, &counters),
    );
    let err = engine.unlock(USER, DEFAULT_CREDENTIAL).unwrap_err();
    assert!(matches!(err, UnlockError::BlobCorrupt(_)), "got: {err}");
    assert_eq!(*counters.gatekeeper.lock().unwrap(), 0);
    assert_eq!(*counters.keystore.lock().unwrap(), 0);
}

#[test]
fn zero_padded_pwd_resolves_and_auth_token_is_forwarded() {
    let scenario = Scenario::new("zero-padded");
    let counters = Counters::default();

    let salt = [0x31u8; 16];
    // `.pwd` exists only under the double-zero-padded stem.
    scenario.write_blob(
        &format!("00{HANDLE}.pwd"),
        &encode_password_data(4, 4, 0, 0, &salt, &[0xEEu8; 58]),
    );
    let secdis = vec![0x44u8; 64];
    scenario.write_blob(&format!("{HANDLE}.secdis"), &secdis);

    let token = kdf::derive_password_token(b"hunter2", &salt, 4, 0, 0).unwrap();
    let application_id = token.concat(personalize(LABEL_SECDISCARDABLE, &secdis).as_bytes());
    let synthetic_password = b"zero-padded-synthetic-password!!".to_vec();
    let envelope = build_inner_envelope(application_id.as_bytes(), &synthetic_password);
    let outer = b"keystore-wrapped-padded-envelope".to_vec();
    scenario.write_blob(&format!("{HANDLE}.spblob"), &encode_spblob(2, &outer));

    let minted = HardwareAuthToken {
        version: 0,
        challenge: 0,
        user_id: (GK_FAKE_UID_BASE + USER) as u64,
        authenticator_id: 0x0102_0304_0506_0708,
        authenticator_type: 1,
        timestamp_ms: 12_345,
        hmac: [0x5Cu8; 32],
    };
    let keystore = StubKeystore {
        alias: alias(),
        ciphertext: outer,
        envelope,
        counters: counters.clone(),
    };
    let engine = Engine::new(
        scenario.config.clone(),
        services(
            None,
            GatekeeperScript::Accept(minted.to_wire().to_vec()),
            keystore,
            &counters,
        ),
    );
    engine.unlock(USER, "hunter2").unwrap();

    assert_eq!(*counters.gatekeeper.lock().unwrap(), 1);
    // The token reached the authorization service unmangled.
    let tokens = counters.auth_tokens.lock().unwrap();
    assert_eq!(*tokens, [minted]);
    assert_eq!(counters.unlocked.lock().unwrap().len(), 1);
}

#[test]
fn derived_material_widths_are_fixed() {
    let token = kdf::default_password_token();
    assert_eq!(token.len(), 32);
    let hash = personalize(LABEL_SECDISCARDABLE, &[0u8; 16]);
    assert_eq!(hash.len(), 64);
    let application_id = token.concat(hash.as_bytes());
    assert_eq!(application_id.len(), 96);
    let v3_secret = sp800_derive(LABEL_FBE_KEY, SP800_CONTEXT_FBE_KEY, &[0u8; 32]);
    assert_eq!(v3_secret.len(), 32);
}

#[test]
fn init_and_shutdown_bracket_the_rpc_dispatcher() {
    let scenario = Scenario::new("init");
    let counters = Counters::default();
    let keystore = StubKeystore {
        alias: alias(),
        ciphertext: Vec::new(),
        envelope: Vec::new(),
        counters: counters.clone(),
    };
    let engine = Engine::new(
        scenario.config.clone(),
        services(None, GatekeeperScript::Deny, keystore, &counters),
    );
    engine.init().unwrap();
    engine.shutdown();
}
