//! Error types for pipeline operations.
//!
//! Every fatal failure maps onto one of four categories (configuration,
//! resource, external command, interrupt) and carries the process exit code
//! the binary reports for it. Non-fatal problems are not errors: they are
//! logged as warnings and execution continues.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Exit code used for die-style internal failures.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code used for configuration failures (missing file, missing key).
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Exit code reported when a tool could not be executed at all.
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// Exit code reported when a tool exceeded `COMMAND_TIMEOUT_SECS`.
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code reported when the operator interrupted the pipeline.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Main error type for all pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing file, missing key, malformed value
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Credential store or provisioning resource problems
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// An invoked tool exited non-zero
    #[error("{program} exited with code {code}")]
    ExternalCommand {
        /// Program that was invoked
        program: String,
        /// Exit code reported by the tool
        code: i32,
        /// Last lines of the captured output
        output_tail: String,
    },

    /// Version or build-number lookup problems
    #[error("Versioning error: {0}")]
    Version(#[from] VersionError),

    /// The operator sent SIGINT/SIGTERM
    #[error("Interrupted by operator")]
    Interrupted,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Archive creation errors
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No configuration file was given on the command line
    #[error("no configuration file given (usage: kodegen_bundler_mobile <CONFIG>)")]
    NoConfigFile,

    /// Configuration file does not exist
    #[error("configuration file not found: {}", path.display())]
    NotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// Configuration file could not be parsed
    #[error("failed to parse {}: {reason}", path.display())]
    Parse {
        /// Path being parsed
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// A key the current run depends on is absent
    #[error("missing required key: {key}")]
    MissingRequiredKey {
        /// Key name
        key: String,
    },

    /// A flag has a value that is neither truthy nor falsy
    #[error("invalid value for flag {key}: {value:?} (expected 1/0, true/false, yes/no, on/off)")]
    InvalidFlag {
        /// Key name
        key: String,
        /// Offending value
        value: String,
    },

    /// A key holds a value of the wrong shape
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Key name
        key: String,
        /// What is wrong with it
        reason: String,
    },

    /// Write attempted on a non-computed key after configure
    #[error("configuration is frozen; {key} cannot be changed after configure")]
    Frozen {
        /// Key name
        key: String,
    },
}

/// Credential store and profile resource errors
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Keychain file is absent
    #[error("keychain not found: {}", path.display())]
    KeychainNotFound {
        /// Keychain path
        path: PathBuf,
    },

    /// `security unlock-keychain` failed
    #[error("failed to unlock keychain {} (exit code {code})", path.display())]
    UnlockFailed {
        /// Keychain path
        path: PathBuf,
        /// Exit code reported by the security tool
        code: i32,
    },

    /// Querying or changing the keychain search list failed
    #[error("keychain operation '{operation}' failed (exit code {code}): {reason}")]
    KeychainCommand {
        /// Operation name
        operation: String,
        /// Exit code reported by the security tool
        code: i32,
        /// Tool output
        reason: String,
    },

    /// No provisioning profile could be located
    #[error("provisioning profile not found: {reason}")]
    ProfileNotFound {
        /// Why it is considered missing
        reason: String,
    },

    /// Profile has no UUID and strict mode is on
    #[error("provisioning profile {} has no UUID", path.display())]
    ProfileUuidMissing {
        /// Profile path
        path: PathBuf,
    },

    /// A build output the stage relies on is absent
    #[error("expected artifact missing: {}", path.display())]
    ArtifactMissing {
        /// Artifact path
        path: PathBuf,
    },
}

/// Version lookup and build-number errors
#[derive(Error, Debug)]
pub enum VersionError {
    /// The plist editor could not read a version key
    #[error("failed to read {key} from {} (exit code {code})", plist.display())]
    VersionLookupFailed {
        /// Info.plist path
        plist: PathBuf,
        /// Key being read
        key: String,
        /// Exit code of the plist editor
        code: i32,
    },

    /// The stored build number is not an integer
    #[error("build number {value:?} is not numeric")]
    BuildNumberNotNumeric {
        /// Stored value
        value: String,
    },

    /// Writing the new build number failed
    #[error("failed to write build number to {} (exit code {code})", plist.display())]
    BuildNumberWriteFailed {
        /// Info.plist path
        plist: PathBuf,
        /// Exit code of the plist editor
        code: i32,
    },
}

impl PipelineError {
    /// Process exit code for this error.
    ///
    /// External tools propagate their own code; configuration problems use
    /// [`EXIT_CONFIG_ERROR`]; an interrupt uses [`EXIT_INTERRUPTED`];
    /// everything else is a die-style [`EXIT_FAILURE`].
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ExternalCommand { code, .. } => {
                if *code == 0 {
                    EXIT_FAILURE
                } else {
                    *code
                }
            }
            Self::Configuration(_) => EXIT_CONFIG_ERROR,
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Human-readable category used in the failure banner.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration error",
            Self::Resource(_) => "resource error",
            Self::ExternalCommand { .. } => "external command error",
            Self::Version(_) => "versioning error",
            Self::Interrupted => "interrupted",
            Self::Io(_) | Self::Json(_) | Self::Zip(_) => "internal error",
        }
    }
}
