//! CLI binary entry point.

/// Binary-local application orchestration.
mod app;
/// CLI argument parsing definitions.
mod cli;

use clap::Parser;

/// Parse CLI arguments, run the app entrypoint, and exit with its status code.
fn main() {
    let args = cli::Args::parse();
    let code = app::run(args);
    std::process::exit(code);
}
