//! Binary-local application orchestration.
//!
//! `main.rs` keeps wiring logic small; this module hosts logging setup,
//! credential prompting, and the exit-code mapping for engine errors.

use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;

use spunlock::build_info;
use spunlock::config::load_config;
use spunlock::engine::{Engine, DEFAULT_CREDENTIAL};
use spunlock::error::UnlockError;
use spunlock::hal;
use spunlock::probe;

use crate::cli;

/// Map every terminal error kind to a distinct diagnostic exit code.
fn exit_code(err: &UnlockError) -> i32 {
    match err {
        UnlockError::CredentialWrong => 2,
        UnlockError::RetryAfter(_) => 3,
        UnlockError::BlobMissing(_) => 4,
        UnlockError::BlobCorrupt(_) => 5,
        UnlockError::KeyRotated => 6,
        UnlockError::HardwareUnavailable(_) => 7,
        UnlockError::Kdf(_) => 8,
        UnlockError::Crypto => 9,
        UnlockError::Io(_) => 10,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Binary entrypoint used by `main`.
pub(crate) fn run(args: cli::Args) -> i32 {
    init_logging();
    info!("spunlock {}", build_info::startup_metadata_line());

    let config = match load_config(args.config.as_deref().map(Path::new)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("spunlock: {err}");
            return 1;
        }
    };

    if args.probe {
        return match probe::password_type(&config.system_de_root, &config.system_root, args.user)
        {
            Ok(result) => {
                match &result.legacy_file {
                    Some(file) => println!("{} (legacy file {})", result.kind, file.display()),
                    None => println!("{}", result.kind),
                }
                0
            }
            Err(err) => {
                eprintln!("spunlock: {err}");
                exit_code(&err)
            }
        };
    }

    let credential = match args.credential {
        Some(credential) => credential,
        None => {
            let prompt = format!(
                "Credential for user {} (\"{DEFAULT_CREDENTIAL}\" for default): ",
                args.user
            );
            match rpassword::prompt_password(prompt) {
                Ok(entered) => entered,
                Err(err) => {
                    eprintln!("spunlock: failed to read credential: {err}");
                    return 1;
                }
            }
        }
    };

    let services = match hal::socket::connect(&config) {
        Ok(services) => services,
        Err(err) => {
            eprintln!("spunlock: {err}");
            return exit_code(&err.into());
        }
    };

    let engine = Engine::new(config, services);
    if let Err(err) = engine.init() {
        eprintln!("spunlock: {err}");
        engine.shutdown();
        return exit_code(&err);
    }

    let result = engine.unlock(args.user, &credential);
    engine.shutdown();
    match result {
        Ok(()) => {
            println!("ce storage unlocked for user {}", args.user);
            0
        }
        Err(err) => {
            eprintln!("spunlock: {err}");
            exit_code(&err)
        }
    }
}
