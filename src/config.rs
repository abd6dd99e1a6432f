//! Configuration loading from TOML files.
//!
//! Config is resolved in this order of precedence (highest wins):
//! 1. TOML file specified via the --config CLI flag
//! 2. /etc/spunlock.toml when present
//! 3. Built-in defaults matching the stock on-device layout
//!
//! Every field is optional in the file; unset fields keep their defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Default config path baked into the recovery image.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/spunlock.toml";

/// Candidate socket names per hardware role, newer generation first.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub weaver: Vec<String>,
    pub gatekeeper: Vec<String>,
    pub keystore: Vec<String>,
    pub authorization: Vec<String>,
    pub storage: Vec<String>,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            weaver: vec!["weaverd.aidl".into(), "weaverd.hidl".into()],
            gatekeeper: vec!["gatekeeperd.aidl".into(), "gatekeeperd.hidl".into()],
            keystore: vec!["keystore2".into()],
            authorization: vec!["keystore2-authorization".into()],
            storage: vec!["vold".into()],
        }
    }
}

/// Resolved engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of per-user DE storage (`/data/system_de`).
    pub system_de_root: PathBuf,
    /// Legacy system dir holding pre-synthetic gatekeeper files.
    pub system_root: PathBuf,
    /// Directory the service shim sockets live in.
    pub socket_dir: PathBuf,
    pub endpoints: Endpoints,
    /// Optional keystore daemon command line spawned by `init()`.
    pub keystore_daemon: Option<String>,
    /// Readiness poll budget for the keystore daemon.
    pub keystore_poll_attempts: u32,
    /// Delay between readiness polls, in milliseconds.
    pub keystore_poll_interval_ms: u64,
    /// The keystore's per-boot persistent database.
    pub keystore_db: PathBuf,
    /// Writable overlay path the database is snapshotted to.
    pub keystore_db_overlay: PathBuf,
    /// Worker threads in the hardware-call dispatcher.
    pub rpc_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_de_root: PathBuf::from("/data/system_de"),
            system_root: PathBuf::from("/data/system"),
            socket_dir: PathBuf::from("/dev/socket"),
            endpoints: Endpoints::default(),
            keystore_daemon: None,
            keystore_poll_attempts: 50,
            keystore_poll_interval_ms: 1000,
            keystore_db: PathBuf::from("/data/misc/keystore/persistent.sqlite"),
            keystore_db_overlay: PathBuf::from("/tmp/keystore/persistent.sqlite"),
            rpc_threads: 2,
        }
    }
}

/// On-disk TOML shape; every field optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    system_de_root: Option<PathBuf>,
    system_root: Option<PathBuf>,
    socket_dir: Option<PathBuf>,
    #[serde(default)]
    endpoints: FileEndpoints,
    keystore_daemon: Option<String>,
    keystore_poll_attempts: Option<u32>,
    keystore_poll_interval_ms: Option<u64>,
    keystore_db: Option<PathBuf>,
    keystore_db_overlay: Option<PathBuf>,
    rpc_threads: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FileEndpoints {
    weaver: Option<Vec<String>>,
    gatekeeper: Option<Vec<String>>,
    keystore: Option<Vec<String>>,
    authorization: Option<Vec<String>>,
    storage: Option<Vec<String>>,
}

/// Load configuration, honoring an explicit `--config` path.
pub fn load_config(path_override: Option<&Path>) -> Result<Config, ConfigError> {
    let text = match path_override {
        Some(path) => Some(fs::read_to_string(path)?),
        None => match fs::read_to_string(DEFAULT_CONFIG_PATH) {
            Ok(text) => Some(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(ConfigError::Io(err)),
        },
    };
    let Some(text) = text else {
        return Ok(Config::default());
    };
    let parsed: FileConfig = toml::from_str(&text)?;
    Ok(merge(Config::default(), parsed))
}

fn merge(mut config: Config, file: FileConfig) -> Config {
    if let Some(value) = file.system_de_root {
        config.system_de_root = value;
    }
    if let Some(value) = file.system_root {
        config.system_root = value;
    }
    if let Some(value) = file.socket_dir {
        config.socket_dir = value;
    }
    if let Some(value) = file.endpoints.weaver {
        config.endpoints.weaver = value;
    }
    if let Some(value) = file.endpoints.gatekeeper {
        config.endpoints.gatekeeper = value;
    }
    if let Some(value) = file.endpoints.keystore {
        config.endpoints.keystore = value;
    }
    if let Some(value) = file.endpoints.authorization {
        config.endpoints.authorization = value;
    }
    if let Some(value) = file.endpoints.storage {
        config.endpoints.storage = value;
    }
    if file.keystore_daemon.is_some() {
        config.keystore_daemon = file.keystore_daemon;
    }
    if let Some(value) = file.keystore_poll_attempts {
        config.keystore_poll_attempts = value;
    }
    if let Some(value) = file.keystore_poll_interval_ms {
        config.keystore_poll_interval_ms = value;
    }
    if let Some(value) = file.keystore_db {
        config.keystore_db = value;
    }
    if let Some(value) = file.keystore_db_overlay {
        config.keystore_db_overlay = value;
    }
    if let Some(value) = file.rpc_threads {
        config.rpc_threads = value;
    }
    config
}
