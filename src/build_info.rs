//! Compile-time build metadata exposed to CLI surfaces.

/// Semver package version from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// VCS commit hash captured at build time.
pub const GIT_COMMIT: &str = env!("SPUNLOCK_BUILD_GIT_HASH");

/// Build timestamp captured at compile time.
pub const BUILD_TIMESTAMP: &str = env!("SPUNLOCK_BUILD_TIMESTAMP");

/// Extended clap version text shown via `--version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("SPUNLOCK_BUILD_GIT_HASH"),
    ", built ",
    env!("SPUNLOCK_BUILD_TIMESTAMP"),
    ")"
);

/// Concise startup metadata logged once at engine start.
pub fn startup_metadata_line() -> String {
    format!("v{VERSION} ({GIT_COMMIT}, built {BUILD_TIMESTAMP})")
}
