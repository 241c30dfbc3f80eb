//! Keychain lifecycle management for code signing.
//!
//! Signing needs the build keychain to be in the user search list, to be the
//! default keychain and to be unlocked. Those are machine-wide settings, so
//! whatever activation changes must be put back on every exit path.
//!
//! # State machine
//!
//! `Inactive → Activating → Active → Deactivating → Inactive`
//!
//! [`KeychainHandle`] records what activation actually did (whether the
//! keychain was already the default, whether it got unlocked) so teardown
//! only reverses changes this run made. [`KeychainSession`] owns the handle
//! for a pipeline run and guarantees teardown happens at most once, falling
//! back to a synchronous teardown in `Drop`.
//!
//! Concurrent pipeline runs on the same machine are not coordinated: two
//! runs swapping the default keychain will race.

mod search_list;

pub use search_list::{contains_keychain, parse_default_keychain, parse_keychain_list, same_keychain};

use crate::config::{Context, keys};
use crate::error::{ResourceError, Result};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, OutputFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Activation state of a [`KeychainHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeychainState {
    Inactive,
    Activating,
    Active,
    Deactivating,
}

/// A build keychain and the record of what activating it changed.
#[derive(Clone)]
pub struct KeychainHandle {
    path: PathBuf,
    password: String,
    security_tool: String,
    state: KeychainState,
    previous_default: Option<PathBuf>,
    was_already_default: bool,
    was_unlocked: bool,
}

impl std::fmt::Debug for KeychainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainHandle")
            .field("path", &self.path)
            .field("password", &"<redacted>")
            .field("state", &self.state)
            .field("previous_default", &self.previous_default)
            .field("was_already_default", &self.was_already_default)
            .field("was_unlocked", &self.was_unlocked)
            .finish()
    }
}

/// One teardown command and what to say if it fails.
struct TeardownStep {
    spec: CommandSpec,
    description: String,
}

impl KeychainHandle {
    /// Creates an inactive handle.
    pub fn new(
        path: impl Into<PathBuf>,
        password: impl Into<String>,
        security_tool: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            password: password.into(),
            security_tool: security_tool.into(),
            state: KeychainState::Inactive,
            previous_default: None,
            was_already_default: false,
            was_unlocked: false,
        }
    }

    /// Creates a handle from `KEYCHAIN_PATH`, `KEYCHAIN_PASSWORD` and `SECURITY_TOOL`.
    pub fn from_context(ctx: &Context) -> Result<Self> {
        Ok(Self::new(
            ctx.require_path(keys::KEYCHAIN_PATH)?,
            ctx.require(keys::KEYCHAIN_PASSWORD)?,
            ctx.get_or(keys::SECURITY_TOOL, "security"),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> KeychainState {
        self.state
    }

    pub fn was_already_default(&self) -> bool {
        self.was_already_default
    }

    pub fn was_unlocked(&self) -> bool {
        self.was_unlocked
    }

    pub fn previous_default(&self) -> Option<&Path> {
        self.previous_default.as_deref()
    }

    fn security(&self) -> CommandSpec {
        CommandSpec::new(self.security_tool.clone()).filter(OutputFilter::Quiet)
    }

    async fn run_checked(
        &self,
        runner: &dyn CommandRunner,
        spec: CommandSpec,
        operation: &str,
    ) -> Result<CommandOutput> {
        let output = runner.run(&spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ResourceError::KeychainCommand {
                operation: operation.to_string(),
                code: output.exit_code,
                reason: output.tail(),
            }
            .into())
        }
    }

    /// Makes the keychain the unlocked default.
    ///
    /// Fails with [`ResourceError::KeychainNotFound`] before touching any
    /// system state if the keychain file is absent, and with
    /// [`ResourceError::UnlockFailed`] if the unlock call errors. On failure
    /// the handle keeps whatever it recorded so far, so a later
    /// [`deactivate`](Self::deactivate) reverses partial activation.
    pub async fn activate(&mut self, runner: &dyn CommandRunner) -> Result<()> {
        if !self.path.exists() {
            return Err(ResourceError::KeychainNotFound {
                path: self.path.clone(),
            }
            .into());
        }

        self.state = KeychainState::Activating;
        log::info!("Activating keychain {}", self.path.display());

        let output = self
            .run_checked(runner, self.security().arg("default-keychain"), "default-keychain")
            .await?;
        let previous = parse_default_keychain(&output.stdout);
        self.was_already_default = previous
            .as_deref()
            .is_some_and(|p| same_keychain(p, &self.path));
        self.previous_default = previous;

        if self.was_already_default {
            log::info!("Keychain is already the default keychain");
        } else {
            let output = self
                .run_checked(
                    runner,
                    self.security().args(["list-keychains", "-d", "user"]),
                    "list-keychains",
                )
                .await?;
            let search_list = parse_keychain_list(&output.stdout);

            if contains_keychain(&search_list, &self.path) {
                log::debug!("Keychain already in user search list");
            } else {
                let mut spec = self.security().args(["list-keychains", "-d", "user", "-s"]);
                for entry in &search_list {
                    spec = spec.path_arg(entry);
                }
                spec = spec.path_arg(&self.path);
                self.run_checked(runner, spec, "list-keychains -s").await?;
            }

            self.run_checked(
                runner,
                self.security()
                    .args(["default-keychain", "-s"])
                    .path_arg(&self.path),
                "default-keychain -s",
            )
            .await?;
        }

        let unlock = self
            .security()
            .args(["unlock-keychain", "-p"])
            .secret_arg(self.password.clone())
            .path_arg(&self.path);
        let output = runner.run(&unlock).await?;
        if !output.success() {
            return Err(ResourceError::UnlockFailed {
                path: self.path.clone(),
                code: output.exit_code,
            }
            .into());
        }
        self.was_unlocked = true;

        if !self.was_already_default {
            // -l: lock on sleep; no -u, so no inactivity timeout mid-build.
            let settings = self
                .security()
                .args(["set-keychain-settings", "-l"])
                .path_arg(&self.path);
            let output = runner.run(&settings).await?;
            if !output.success() {
                log::warn!(
                    "Could not set lock-on-sleep policy for {} (exit code {})",
                    self.path.display(),
                    output.exit_code
                );
            }
        }

        self.state = KeychainState::Active;
        log::info!("Keychain {} unlocked", self.path.display());
        Ok(())
    }

    /// Commands that undo activation, in order.
    fn teardown_plan(&self) -> Vec<TeardownStep> {
        let mut steps = Vec::new();

        if self.state == KeychainState::Inactive {
            log::debug!("Keychain was never activated; nothing to restore");
            return steps;
        }
        if self.was_already_default {
            log::info!(
                "Keychain {} was already the default; leaving it untouched",
                self.path.display()
            );
            return steps;
        }

        if self.was_unlocked {
            steps.push(TeardownStep {
                spec: self.security().arg("lock-keychain").path_arg(&self.path),
                description: format!("lock keychain {}", self.path.display()),
            });
        }
        if let Some(previous) = &self.previous_default {
            steps.push(TeardownStep {
                spec: self
                    .security()
                    .args(["default-keychain", "-s"])
                    .path_arg(previous),
                description: format!("restore default keychain {}", previous.display()),
            });
        }
        steps
    }

    fn finish_step(step: &TeardownStep, result: Result<CommandOutput>) {
        match result {
            Ok(output) if output.success() => log::debug!("Teardown: {} ok", step.description),
            Ok(output) => log::warn!(
                "Failed to {} (exit code {}); continuing",
                step.description,
                output.exit_code
            ),
            Err(e) => log::warn!("Failed to {}: {e}; continuing", step.description),
        }
    }

    /// Reverses activation. Failures are logged, never returned.
    pub async fn deactivate(&mut self, runner: &dyn CommandRunner) {
        let steps = self.teardown_plan();
        self.state = KeychainState::Deactivating;
        for step in &steps {
            Self::finish_step(step, runner.run(&step.spec).await);
        }
        self.state = KeychainState::Inactive;
    }

    /// Synchronous [`deactivate`](Self::deactivate) for use in `Drop`.
    pub fn deactivate_blocking(&mut self, runner: &dyn CommandRunner) {
        let steps = self.teardown_plan();
        self.state = KeychainState::Deactivating;
        for step in &steps {
            Self::finish_step(step, runner.run_blocking(&step.spec));
        }
        self.state = KeychainState::Inactive;
    }
}

/// Owns the keychain for one pipeline run and tears it down at most once.
pub struct KeychainSession {
    runner: Arc<dyn CommandRunner>,
    handle: Option<KeychainHandle>,
    teardowns: usize,
}

impl std::fmt::Debug for KeychainSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainSession")
            .field("handle", &self.handle)
            .field("teardowns", &self.teardowns)
            .finish_non_exhaustive()
    }
}

impl KeychainSession {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            handle: None,
            teardowns: 0,
        }
    }

    /// Takes ownership of `handle` and activates it.
    ///
    /// The handle is stored before activation starts so that a partially
    /// activated keychain is still restored by [`deactivate`](Self::deactivate).
    pub async fn activate(&mut self, handle: KeychainHandle) -> Result<()> {
        if let Some(mut previous) = self.handle.take() {
            log::warn!("Replacing an active keychain session; restoring the previous one first");
            previous.deactivate(self.runner.as_ref()).await;
            self.teardowns += 1;
        }
        let handle = self.handle.insert(handle);
        handle.activate(self.runner.as_ref()).await
    }

    /// Whether a handle is held and still needs teardown.
    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&KeychainHandle> {
        self.handle.as_ref()
    }

    /// Number of handles torn down by this session.
    pub fn teardown_count(&self) -> usize {
        self.teardowns
    }

    /// Tears down the held handle, if any. Later calls are no-ops.
    pub async fn deactivate(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.deactivate(self.runner.as_ref()).await;
            self.teardowns += 1;
        }
    }
}

impl Drop for KeychainSession {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            log::warn!(
                "Keychain session for {} dropped without teardown; restoring now",
                handle.path().display()
            );
            handle.deactivate_blocking(self.runner.as_ref());
            self.teardowns += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{ScriptedRunner, matches};

    fn keychain_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.keychain-db");
        std::fs::write(&path, b"").unwrap();
        (dir, path)
    }

    fn quoted(path: &Path) -> String {
        format!("    \"{}\"\n", path.display())
    }

    #[tokio::test]
    async fn missing_keychain_fails_without_commands() {
        let runner = ScriptedRunner::new();
        let mut handle = KeychainHandle::new("/nonexistent/ci.keychain", "pw", "security");
        let err = handle.activate(&runner).await.unwrap_err();
        assert!(matches!(
            err,
            crate::PipelineError::Resource(ResourceError::KeychainNotFound { .. })
        ));
        assert!(runner.calls().is_empty());
        assert_eq!(handle.state(), KeychainState::Inactive);
    }

    #[tokio::test]
    async fn activation_takes_over_default_and_teardown_restores_it() {
        let (_dir, path) = keychain_file();
        let runner = ScriptedRunner::new();
        runner
            .on(
                matches("security", &["default-keychain"]),
                CommandOutput::ok("    \"/Users/ci/Library/Keychains/login.keychain-db\"\n"),
            )
            .on(
                matches("security", &["list-keychains"]),
                CommandOutput::ok("    \"/Users/ci/Library/Keychains/login.keychain-db\"\n"),
            );

        let mut handle = KeychainHandle::new(&path, "pw", "security");
        handle.activate(&runner).await.unwrap();
        assert_eq!(handle.state(), KeychainState::Active);
        assert!(!handle.was_already_default());
        assert!(handle.was_unlocked());

        assert_eq!(runner.count(matches("security", &["list-keychains", "-s"])), 1);
        assert_eq!(runner.count(matches("security", &["default-keychain", "-s"])), 1);
        assert_eq!(runner.count(matches("security", &["set-keychain-settings", "-l"])), 1);

        handle.deactivate(&runner).await;
        assert_eq!(handle.state(), KeychainState::Inactive);
        assert_eq!(runner.count(matches("security", &["lock-keychain"])), 1);
        let restore = matches(
            "security",
            &["default-keychain", "-s", "/Users/ci/Library/Keychains/login.keychain-db"],
        );
        assert_eq!(runner.count(restore), 1);
    }

    #[tokio::test]
    async fn search_list_append_is_idempotent() {
        let (_dir, path) = keychain_file();
        let runner = ScriptedRunner::new();
        runner
            .on(
                matches("security", &["default-keychain"]),
                CommandOutput::ok("\"/Users/ci/Library/Keychains/login.keychain-db\"\n"),
            )
            .on(matches("security", &["list-keychains"]), CommandOutput::ok(quoted(&path)));

        let mut handle = KeychainHandle::new(&path, "pw", "security");
        handle.activate(&runner).await.unwrap();
        assert_eq!(runner.count(matches("security", &["list-keychains", "-s"])), 0);
    }

    #[tokio::test]
    async fn already_default_keychain_is_left_alone() {
        let (_dir, path) = keychain_file();
        let runner = ScriptedRunner::new();
        runner.on(matches("security", &["default-keychain"]), CommandOutput::ok(quoted(&path)));

        let mut handle = KeychainHandle::new(&path, "pw", "security");
        handle.activate(&runner).await.unwrap();
        assert!(handle.was_already_default());
        assert_eq!(runner.count(matches("security", &["default-keychain", "-s"])), 0);
        assert_eq!(runner.count(matches("security", &["set-keychain-settings"])), 0);

        let before = runner.calls().len();
        handle.deactivate(&runner).await;
        assert_eq!(runner.calls().len(), before);
    }

    #[tokio::test]
    async fn unlock_failure_is_fatal_but_restores_default() {
        let (_dir, path) = keychain_file();
        let runner = ScriptedRunner::new();
        runner
            .on(
                matches("security", &["default-keychain"]),
                CommandOutput::ok("\"/k/login.keychain-db\"\n"),
            )
            .on(matches("security", &["unlock-keychain"]), CommandOutput::failed(51, "bad password"));

        let runner = Arc::new(runner);
        let mut session = KeychainSession::new(runner.clone());
        let err = session
            .activate(KeychainHandle::new(&path, "wrong", "security"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::PipelineError::Resource(ResourceError::UnlockFailed { code: 51, .. })
        ));

        session.deactivate().await;
        session.deactivate().await;
        assert_eq!(session.teardown_count(), 1);
        assert_eq!(runner.count(matches("security", &["lock-keychain"])), 0);
        assert_eq!(
            runner.count(matches("security", &["default-keychain", "-s", "/k/login.keychain-db"])),
            1
        );
    }

    #[tokio::test]
    async fn teardown_failures_are_not_fatal() {
        let (_dir, path) = keychain_file();
        let runner = ScriptedRunner::new();
        runner
            .on(
                matches("security", &["default-keychain"]),
                CommandOutput::ok("\"/k/login.keychain-db\"\n"),
            )
            .on(matches("security", &["lock-keychain"]), CommandOutput::failed(1, "locked"));

        let mut handle = KeychainHandle::new(&path, "pw", "security");
        handle.activate(&runner).await.unwrap();
        handle.deactivate(&runner).await;
        // restore still attempted after the lock failure
        assert_eq!(
            runner.count(matches("security", &["default-keychain", "-s", "/k/login.keychain-db"])),
            1
        );
    }

    #[tokio::test]
    async fn dropped_session_tears_down_synchronously() {
        let (_dir, path) = keychain_file();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            matches("security", &["default-keychain"]),
            CommandOutput::ok("\"/k/login.keychain-db\"\n"),
        );

        {
            let mut session = KeychainSession::new(runner.clone());
            session
                .activate(KeychainHandle::new(&path, "pw", "security"))
                .await
                .unwrap();
        }
        assert_eq!(runner.count(matches("security", &["lock-keychain"])), 1);
    }
}
