//! CLI argument parsing via clap.

use clap::Parser;

use spunlock::build_info;

/// Unlock a user's CE storage from the recovery environment.
#[derive(Debug, Parser)]
#[command(
    name = "spunlock",
    version = build_info::VERSION,
    long_version = build_info::LONG_VERSION
)]
pub struct Args {
    /// Android user id to operate on.
    #[arg(short = 'u', long = "user", default_value_t = 0)]
    pub user: u32,

    /// Credential to try ("!" for the default password). Prompted without
    /// echo when omitted.
    #[arg(long = "credential")]
    pub credential: Option<String>,

    /// Only classify the stored credential and exit.
    #[arg(long = "probe")]
    pub probe: bool,

    /// Path to config file (default: /etc/spunlock.toml when present).
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,
}
