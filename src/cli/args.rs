//! Command line argument parsing.

use crate::error::ConfigError;
use clap::Parser;
use std::path::{Path, PathBuf};

/// Build-and-release pipeline for signed mobile application packages
#[derive(Parser, Debug)]
#[command(
    name = "kodegen_bundler_mobile",
    version,
    about = "Build-and-release pipeline for signed mobile application packages",
    long_about = "Runs the release pipeline described by a KEY=VALUE configuration file:
keychain setup, profile import, dependency sync, archive, tests, export,
packaging and crash-report upload, each stage gated by a flag in the file.

Usage:
  kodegen_bundler_mobile release.env
  kodegen_bundler_mobile release.env --dry-run
  kodegen_bundler_mobile --list-stages

The process exits with the failing tool's own exit code. Configuration
errors exit 2, an interrupt exits 130. The keychain is restored on every
exit path."
)]
pub struct Args {
    /// Pipeline configuration file
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Validate the configuration and print which stages would run
    #[arg(long)]
    pub dry_run: bool,

    /// Print the stage order and exit
    #[arg(long, conflicts_with = "dry_run")]
    pub list_stages: bool,

    /// Show every command line as it runs
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Configuration file path. Absent is a configuration error, not a
    /// usage error, so it exits like any other configuration problem.
    pub fn config_path(&self) -> Result<&Path, ConfigError> {
        self.config.as_deref().ok_or(ConfigError::NoConfigFile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_positional_and_optional() {
        let args = Args::try_parse_from(["kodegen_bundler_mobile", "release.env"]).unwrap();
        assert_eq!(args.config_path().unwrap(), Path::new("release.env"));

        let args = Args::try_parse_from(["kodegen_bundler_mobile"]).unwrap();
        assert!(matches!(args.config_path(), Err(ConfigError::NoConfigFile)));
    }

    #[test]
    fn list_stages_conflicts_with_dry_run() {
        assert!(
            Args::try_parse_from(["kodegen_bundler_mobile", "--list-stages", "--dry-run"]).is_err()
        );
    }
}
