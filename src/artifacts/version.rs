//! Version and build-number handling through the plist editor.

use crate::error::{Result, VersionError};
use crate::runner::{CommandRunner, CommandSpec};
use std::path::{Path, PathBuf};

/// Marketing version key.
pub const SHORT_VERSION_KEY: &str = "CFBundleShortVersionString";

/// Build number key.
pub const BUILD_VERSION_KEY: &str = "CFBundleVersion";

/// Reads and writes keys of one Info.plist through the plist editor tool.
#[derive(Debug, Clone)]
pub struct PlistEditor {
    tool: String,
    plist: PathBuf,
    env: Vec<(String, String)>,
}

impl PlistEditor {
    pub fn new(tool: impl Into<String>, plist: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            plist: plist.into(),
            env: Vec::new(),
        }
    }

    /// Environment passed to every editor invocation.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn plist(&self) -> &Path {
        &self.plist
    }

    fn command(&self, edit: String) -> CommandSpec {
        CommandSpec::new(&self.tool)
            .arg("-c")
            .arg(edit)
            .path_arg(&self.plist)
            .envs(self.env.clone())
    }

    /// Value of `key`, trimmed. A failing or empty read is a lookup failure.
    pub async fn get(&self, runner: &dyn CommandRunner, key: &str) -> Result<String> {
        let spec = self.command(format!("Print :{key}"));
        let output = runner.run(&spec).await?;
        let value = output.stdout.trim();

        if !output.success() || value.is_empty() {
            return Err(VersionError::VersionLookupFailed {
                plist: self.plist.clone(),
                key: key.to_string(),
                code: output.exit_code,
            }
            .into());
        }
        Ok(value.to_string())
    }

    /// Overwrites `key` with `value`.
    pub async fn set(&self, runner: &dyn CommandRunner, key: &str, value: &str) -> Result<()> {
        let spec = self.command(format!("Set :{key} {value}"));
        let output = runner.run(&spec).await?;
        if !output.success() {
            return Err(VersionError::BuildNumberWriteFailed {
                plist: self.plist.clone(),
                code: output.exit_code,
            }
            .into());
        }
        Ok(())
    }
}

/// Reads the marketing version and build number.
pub async fn resolve_version(
    runner: &dyn CommandRunner,
    editor: &PlistEditor,
) -> Result<(String, String)> {
    let version = editor.get(runner, SHORT_VERSION_KEY).await?;
    let build = editor.get(runner, BUILD_VERSION_KEY).await?;
    Ok((version, build))
}

/// Successor of a purely numeric build number.
pub fn next_build_number(current: &str) -> std::result::Result<u64, VersionError> {
    let not_numeric = || VersionError::BuildNumberNotNumeric {
        value: current.to_string(),
    };
    let trimmed = current.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(not_numeric());
    }
    trimmed
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_add(1))
        .ok_or_else(not_numeric)
}

/// Writes the next build number and returns it.
///
/// An explicit `override_value` is written verbatim without reading the
/// current value. Otherwise the current value must be numeric and is
/// incremented; a non-numeric value fails before anything is written.
pub async fn bump_build_number(
    runner: &dyn CommandRunner,
    editor: &PlistEditor,
    override_value: Option<&str>,
) -> Result<String> {
    let next = match override_value {
        Some(value) => value.to_string(),
        None => {
            let current = editor.get(runner, BUILD_VERSION_KEY).await?;
            next_build_number(&current)?.to_string()
        }
    };

    editor.set(runner, BUILD_VERSION_KEY, &next).await?;
    log::info!("{} {BUILD_VERSION_KEY} = {next}", editor.plist().display());
    Ok(next)
}
