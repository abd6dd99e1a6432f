//! The synthetic-password unwrap orchestrator.
//!
//! [`Engine::unlock`] drives the whole pipeline for one user: resolve the
//! key-blob family, derive the password token, take the weaver or
//! secdiscardable authentication path, unwrap the two AES-GCM envelope
//! layers, post-process to the FBE secret, and hand it to the CE-storage
//! collaborator. The engine runs one request at a time; callers serialize.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use std::fs;
use std::process::{Child, Command};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::UnlockError;
use crate::hal::authtoken::HardwareAuthToken;
use crate::hal::{
    rpc, GatekeeperVerify, KeystoreDecrypt, Services, WeaverVerify, GK_FAKE_UID_BASE,
    STORAGE_FLAG_CE,
};
use crate::kdf;
use crate::personalize::{
    personalize, sp800_derive, LABEL_APPLICATION_ID, LABEL_FBE_KEY, LABEL_GK_AUTH,
    LABEL_SECDISCARDABLE, LABEL_WEAVER_KEY, LABEL_WEAVER_PASSWORD, SP800_CONTEXT_FBE_KEY,
};
use crate::probe::{self, ProbeResult};
use crate::secret::Secret;
use crate::store::{BlobStore, SUFFIX_PWD, SUFFIX_SECDIS, SUFFIX_SPBLOB, SUFFIX_WEAVER};
use crate::wire::{PasswordData, SpBlob, SpVersion, WeaverData, GCM_IV_LEN, GCM_TAG_LEN};

pub use crate::kdf::DEFAULT_CREDENTIAL;

/// AES-256 key width taken from the personalized application id.
const AES_KEY_LEN: usize = 32;

/// Progress through one unlock attempt. Terminal states are `Unlocked` and
/// any error; there are no internal retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStage {
    Locked,
    TokenDerived,
    ApplicationIdBuilt,
    EnvelopeOpened,
    SecretDerived,
    Unlocked,
}

/// The unlock engine: configuration plus the hardware capability set.
pub struct Engine {
    config: Config,
    services: Services,
    daemon: Mutex<Option<Child>>,
}

impl Engine {
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config,
            services,
            daemon: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// One-time process bootstrap: start the RPC dispatcher, optionally
    /// spawn the keystore daemon, and wait for the keystore to answer.
    pub fn init(&self) -> Result<(), UnlockError> {
        if rpc::start(self.config.rpc_threads) {
            debug!(threads = self.config.rpc_threads, "rpc dispatcher started");
        }
        if let Some(command_line) = &self.config.keystore_daemon {
            self.spawn_keystore_daemon(command_line)?;
        }
        let attempts = self.config.keystore_poll_attempts.max(1);
        for attempt in 0..attempts {
            if self.services.keystore.ready() {
                debug!(attempt, "keystore ready");
                return Ok(());
            }
            if attempt + 1 < attempts {
                thread::sleep(Duration::from_millis(self.config.keystore_poll_interval_ms));
            }
        }
        Err(UnlockError::HardwareUnavailable(
            "keystore did not become ready".into(),
        ))
    }

    /// Release process-wide resources: reap a spawned keystore daemon and
    /// stop the RPC dispatcher. Idempotent.
    pub fn shutdown(&self) {
        if let Some(mut child) = self.daemon.lock().expect("daemon mutex poisoned").take() {
            let _ = child.kill();
            let _ = child.wait();
            debug!("keystore daemon reaped");
        }
        rpc::shutdown();
    }

    /// Classify the stored credential so the UI can prompt accordingly.
    pub fn password_type(&self, user_id: u32) -> Result<ProbeResult, UnlockError> {
        probe::password_type(
            &self.config.system_de_root,
            &self.config.system_root,
            user_id,
        )
    }

    /// Reconstruct the FBE secret for `user_id` from `credential` and unlock
    /// CE storage. `"!"` selects the default-password path.
    pub fn unlock(&self, user_id: u32, credential: &str) -> Result<(), UnlockError> {
        let mut stage = UnlockStage::Locked;
        let result = self.run_unlock(user_id, credential, &mut stage);
        match &result {
            Ok(()) => info!(user_id, "ce storage unlocked"),
            Err(err) => warn!(user_id, stage = ?stage, error = %err, "unlock failed"),
        }
        result
    }

    fn run_unlock(
        &self,
        user_id: u32,
        credential: &str,
        stage: &mut UnlockStage,
    ) -> Result<(), UnlockError> {
        let store = BlobStore::for_user(&self.config.system_de_root, user_id);
        let info = store.resolve_keystore_info()?;
        debug!(user_id, handle = %info.handle, "resolved key-blob family");

        let mut pwd = None;
        let password_token = if credential == DEFAULT_CREDENTIAL {
            self.snapshot_keystore_db()?;
            kdf::default_password_token()
        } else {
            let raw = store.read(&info.handle, SUFFIX_PWD)?;
            let parsed = PasswordData::parse(&raw)?;
            let token = kdf::derive_password_token(
                credential.as_bytes(),
                &parsed.salt,
                parsed.scrypt_log_n,
                parsed.scrypt_log_r,
                parsed.scrypt_log_p,
            )?;
            pwd = Some(parsed);
            token
        };
        advance(stage, UnlockStage::TokenDerived, user_id);

        // Exactly one path is taken, decided by the presence of `.weaver`.
        let application_id = if store.exists(&info.handle, SUFFIX_WEAVER) {
            self.weaver_application_id(&store, &info.handle, &password_token)?
        } else {
            self.secdis_application_id(&store, &info.handle, user_id, &password_token, pwd.as_ref())?
        };
        advance(stage, UnlockStage::ApplicationIdBuilt, user_id);

        let blob = SpBlob::parse(&store.read(&info.handle, SUFFIX_SPBLOB)?)?;
        let key = self
            .services
            .keystore
            .get_key(&info.alias)?
            .ok_or(UnlockError::KeyRotated)?;
        let envelope = match self
            .services
            .keystore
            .decrypt(&key, &blob.iv, &blob.ciphertext)?
        {
            KeystoreDecrypt::Plaintext(bytes) => Secret::new(bytes),
            KeystoreDecrypt::AuthRequired => return Err(UnlockError::CredentialWrong),
        };
        if envelope.len() < GCM_IV_LEN + GCM_TAG_LEN {
            return Err(UnlockError::BlobCorrupt("unwrapped envelope too short".into()));
        }
        advance(stage, UnlockStage::EnvelopeOpened, user_id);

        let (inner_iv, inner_ciphertext) = envelope.as_bytes().split_at(GCM_IV_LEN);
        let personalized = personalize(LABEL_APPLICATION_ID, application_id.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&personalized.as_bytes()[..AES_KEY_LEN])
            .map_err(|_| UnlockError::Crypto)?;
        let synthetic_password = cipher
            .decrypt(Nonce::from_slice(inner_iv), inner_ciphertext)
            .map(Secret::new)
            .map_err(|_| UnlockError::Crypto)?;
        advance(stage, UnlockStage::SecretDerived, user_id);

        let fbe_secret = match blob.version {
            // v2 hands the downstream unlock a hex string of the 64-byte hash.
            SpVersion::V2 => personalize(LABEL_FBE_KEY, synthetic_password.as_bytes()).to_hex(),
            SpVersion::V3 => sp800_derive(
                LABEL_FBE_KEY,
                SP800_CONTEXT_FBE_KEY,
                synthetic_password.as_bytes(),
            ),
        };

        self.services
            .storage
            .unlock_ce_storage(user_id, fbe_secret.as_bytes())?;
        self.services
            .storage
            .prepare_user_storage(user_id, STORAGE_FLAG_CE)?;
        advance(stage, UnlockStage::Unlocked, user_id);
        Ok(())
    }

    /// Weaver path: verify the personalized key against the escrow slot and
    /// fold the escrowed payload into the application id.
    fn weaver_application_id(
        &self,
        store: &BlobStore,
        handle: &str,
        password_token: &Secret,
    ) -> Result<Secret, UnlockError> {
        let weaver = self.services.weaver.as_deref().ok_or_else(|| {
            UnlockError::HardwareUnavailable("weaver record present but no weaver service".into())
        })?;
        let record = WeaverData::parse(&store.read(handle, SUFFIX_WEAVER)?)?;
        let weaver_key = personalize(LABEL_WEAVER_KEY, password_token.as_bytes());
        let expected = weaver.key_size()? as usize;
        if expected != weaver_key.len() {
            return Err(UnlockError::HardwareUnavailable(format!(
                "weaver expects {expected}-byte keys, have {}",
                weaver_key.len()
            )));
        }
        debug!(slot = record.slot, "presenting key to weaver");
        match weaver.verify(record.slot, weaver_key.as_bytes())? {
            WeaverVerify::Verified(payload) => {
                let payload = Secret::new(payload);
                let weaver_secret = personalize(LABEL_WEAVER_PASSWORD, payload.as_bytes());
                Ok(password_token.concat(weaver_secret.as_bytes()))
            }
            WeaverVerify::Retry(ms) => Err(UnlockError::RetryAfter(ms)),
            WeaverVerify::Incorrect => Err(UnlockError::CredentialWrong),
            WeaverVerify::Failed => Err(UnlockError::HardwareUnavailable(
                "weaver verify failed".into(),
            )),
        }
    }

    /// Secdiscardable path: hash the bulk blob into the application id and,
    /// for real credentials, install a gatekeeper auth token so the
    /// keystore accepts the auth-bound operation.
    fn secdis_application_id(
        &self,
        store: &BlobStore,
        handle: &str,
        user_id: u32,
        password_token: &Secret,
        pwd: Option<&PasswordData>,
    ) -> Result<Secret, UnlockError> {
        let secdis = store.read(handle, SUFFIX_SECDIS)?;
        let secdis_hash = personalize(LABEL_SECDISCARDABLE, &secdis);
        let application_id = password_token.concat(secdis_hash.as_bytes());
        if let Some(pwd) = pwd {
            self.install_auth_token(user_id, pwd, password_token)?;
        }
        Ok(application_id)
    }

    /// Verify against gatekeeper and forward the minted token to the
    /// authorization service. The token must be installed before the
    /// keystore operation begins.
    fn install_auth_token(
        &self,
        user_id: u32,
        pwd: &PasswordData,
        password_token: &Secret,
    ) -> Result<(), UnlockError> {
        if pwd.password_handle.is_empty() {
            warn!(user_id, "no enrolled gatekeeper handle; continuing without auth token");
            return Ok(());
        }
        let gk_token = personalize(LABEL_GK_AUTH, password_token.as_bytes());
        let fake_uid = GK_FAKE_UID_BASE + user_id;
        match self
            .services
            .gatekeeper
            .verify(fake_uid, &pwd.password_handle, gk_token.as_bytes())?
        {
            GatekeeperVerify::Verified(blob) if blob.is_empty() => {
                warn!(user_id, "gatekeeper minted no auth token; keystore may reject");
                Ok(())
            }
            GatekeeperVerify::Verified(blob) => {
                let token = HardwareAuthToken::parse(&blob)?;
                self.services.authorization.add_auth_token(&token)?;
                debug!(user_id, "auth token installed");
                Ok(())
            }
            GatekeeperVerify::Retry(ms) => Err(UnlockError::RetryAfter(ms)),
            GatekeeperVerify::Denied => Err(UnlockError::CredentialWrong),
        }
    }

    /// Copy the keystore's persistent DB to the writable overlay so the
    /// daemon opens it copy-on-write. Runs on the default-password path
    /// before any keystore call; a missing source DB is tolerated.
    fn snapshot_keystore_db(&self) -> Result<(), UnlockError> {
        let source = &self.config.keystore_db;
        if !source.is_file() {
            debug!(db = %source.display(), "no persistent db to snapshot");
            return Ok(());
        }
        if let Some(parent) = self.config.keystore_db_overlay.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &self.config.keystore_db_overlay)?;
        debug!(overlay = %self.config.keystore_db_overlay.display(), "persistent db snapshotted");
        Ok(())
    }

    fn spawn_keystore_daemon(&self, command_line: &str) -> Result<(), UnlockError> {
        let mut parts = command_line.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(UnlockError::HardwareUnavailable(
                "empty keystore daemon command".into(),
            ));
        };
        let child = Command::new(program).args(parts).spawn()?;
        info!(program, pid = child.id(), "keystore daemon spawned");
        *self.daemon.lock().expect("daemon mutex poisoned") = Some(child);
        Ok(())
    }
}

fn advance(stage: &mut UnlockStage, next: UnlockStage, user_id: u32) {
    *stage = next;
    debug!(user_id, stage = ?next, "unlock stage");
}
