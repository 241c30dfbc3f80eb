//! Build-and-release pipeline library for mobile application packages
//!
//! Sequences code signing setup, compilation, testing, packaging and
//! distribution as one pipeline driven by a configuration file:
//! - [`config`] - key/value context loaded from a `KEY=VALUE` file
//! - [`keychain`] - scoped keychain activation with guaranteed restore
//! - [`runner`] - external command execution, real and scripted
//! - [`profile`] - provisioning profile import and fetch
//! - [`artifacts`] - version lookup, artifact naming and packaging
//! - [`pipeline`] - the stage table and its runner
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod error;
pub mod keychain;
pub mod pipeline;
pub mod profile;
pub mod runner;

// Re-export commonly used types
pub use error::{ConfigError, PipelineError, ResourceError, Result, VersionError};
