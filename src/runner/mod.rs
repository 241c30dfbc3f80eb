//! External command execution.
//!
//! Every tool the pipeline drives (build tool, plist editor, `security`,
//! dependency manager, profile download client, crash upload client) goes
//! through a [`CommandRunner`]. A non-zero exit is never an error at this
//! layer: the runner reports the exit code and captured output, and the
//! calling stage decides what it means.

mod process;
mod scripted;

pub use process::ProcessRunner;
pub use scripted::{ScriptedRunner, matches};

use crate::error::{ConfigError, PipelineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of trailing output lines kept in error reports.
const ERROR_TAIL_LINES: usize = 20;

/// How streamed tool output is shown to the operator.
///
/// Presentation only: captured output is always complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFilter {
    /// Every line
    Raw,
    /// Errors, warnings and build-tool milestones
    #[default]
    Condensed,
    /// Nothing
    Quiet,
}

impl OutputFilter {
    /// Parses an `OUTPUT_FILTER` value.
    pub fn parse(value: &str) -> std::result::Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "condensed" => Ok(Self::Condensed),
            "quiet" => Ok(Self::Quiet),
            other => Err(ConfigError::InvalidValue {
                key: crate::config::keys::OUTPUT_FILTER.to_string(),
                reason: format!("unknown filter {other:?} (expected raw, condensed or quiet)"),
            }),
        }
    }

    /// Whether `line` should be echoed.
    pub fn keep(self, line: &str) -> bool {
        match self {
            Self::Raw => true,
            Self::Quiet => false,
            Self::Condensed => {
                let lower = line.to_ascii_lowercase();
                line.starts_with("** ")
                    || lower.contains("error:")
                    || lower.contains("warning:")
                    || lower.contains("failed")
                    || line.starts_with("Test Case")
                    || line.starts_with("Test Suite")
                    || line.contains("Executed ")
            }
        }
    }
}

/// Description of one external command invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment on top of the inherited process environment
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// How streamed output is shown
    pub filter: OutputFilter,
    /// Optional kill deadline
    pub timeout: Option<Duration>,
    secret_args: Vec<usize>,
}

impl CommandSpec {
    /// Starts a command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an argument that is masked whenever the command is displayed.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn envs(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn filter(mut self, filter: OutputFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program file name without its directory.
    pub fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    /// Command line with secrets masked, safe for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for (idx, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&idx) {
                parts.push("****".to_string());
            } else if arg.contains(' ') {
                parts.push(format!("{arg:?}"));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last few lines of stdout and stderr, for error reports.
    pub fn tail(&self) -> String {
        let lines: Vec<&str> = self.stdout.lines().chain(self.stderr.lines()).collect();
        let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
        lines[start..].join("\n")
    }

    /// Turns a non-zero exit into [`PipelineError::ExternalCommand`].
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(PipelineError::ExternalCommand {
                program: spec.program_name().to_string(),
                code: self.exit_code,
                output_tail: self.tail(),
            })
        }
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion, streaming output through the
    /// command's [`OutputFilter`]. Only failures to observe the process
    /// (not non-zero exits) are errors.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Runs the command synchronously without streaming. Used from `Drop`
    /// where no async context is available.
    fn run_blocking(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_masks_secret_arguments() {
        let spec = CommandSpec::new("security")
            .arg("unlock-keychain")
            .arg("-p")
            .secret_arg("hunter2")
            .arg("/tmp/ci.keychain");
        let shown = spec.display();
        assert!(!shown.contains("hunter2"));
        assert_eq!(shown, "security unlock-keychain -p **** /tmp/ci.keychain");
    }

    #[test]
    fn condensed_filter_keeps_milestones_and_diagnostics() {
        let filter = OutputFilter::Condensed;
        assert!(filter.keep("** ARCHIVE SUCCEEDED **"));
        assert!(filter.keep("/src/App.swift:3:1: error: cannot find 'x' in scope"));
        assert!(filter.keep("Test Case '-[AppTests testLaunch]' passed (0.1 seconds)."));
        assert!(!filter.keep("CompileSwift normal arm64 /src/App.swift"));
    }

    #[test]
    fn filter_parse_rejects_unknown() {
        assert_eq!(OutputFilter::parse("RAW").unwrap(), OutputFilter::Raw);
        assert!(OutputFilter::parse("pretty").is_err());
    }

    #[test]
    fn check_maps_non_zero_exit() {
        let spec = CommandSpec::new("/usr/bin/xcodebuild");
        let err = CommandOutput::failed(65, "boom").check(&spec).unwrap_err();
        match err {
            PipelineError::ExternalCommand { program, code, output_tail } => {
                assert_eq!(program, "xcodebuild");
                assert_eq!(code, 65);
                assert_eq!(output_tail, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn tail_keeps_last_lines() {
        let stdout: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let tail = CommandOutput::ok(stdout).tail();
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 49"));
    }
}
