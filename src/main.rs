//! Kodegen Bundler Mobile - build-and-release pipeline for mobile packages.
//!
//! Drives signing setup, archive, tests, export, packaging and crash-report
//! upload from a single configuration file, restoring the keychain on every
//! exit path.

use kodegen_bundler_mobile::cli;
use std::process;

#[tokio::main]
async fn main() {
    // Warnings are operator-facing; RUST_LOG overrides.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let exit_code = match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };

    process::exit(exit_code);
}
