//! spunlock — synthetic-password unwrap engine for recovery environments.
//!
//! This crate reconstructs an Android user's file-based-encryption secret
//! from a supplied credential and the synthetic-password artifacts on disk,
//! then unlocks that user's credential-encrypted storage. It cooperates with
//! the device's weaver, gatekeeper, keystore, and authorization services
//! through capability traits, so any transport can back them.
//!
//! # Quick start
//!
//! ```no_run
//! use spunlock::config::Config;
//! use spunlock::engine::Engine;
//! use spunlock::hal;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let services = hal::socket::connect(&config)?;
//! let engine = Engine::new(config, services);
//! engine.init()?;
//! engine.unlock(0, "1234")?;
//! engine.shutdown();
//! # Ok(())
//! # }
//! ```

/// Compile-time build/version metadata.
pub mod build_info;
/// Config loading and on-device defaults.
pub mod config;
/// The unwrap orchestrator and engine surface.
pub mod engine;
/// Error types used across crate modules.
pub mod error;
/// Hardware service capabilities and transports.
pub mod hal;
/// Scrypt password-token derivation.
pub mod kdf;
/// Personalized hashing and the SP800-108 variant.
pub mod personalize;
/// Stored-credential classification.
pub mod probe;
/// Wipe-on-drop secret buffers.
pub mod secret;
/// Blob store over the per-user spblob directory.
pub mod store;
#[cfg(test)]
/// Shared testing utilities compiled only for tests.
pub mod testsupport;
/// On-disk blob layouts and bounds-checked parsing.
pub mod wire;
