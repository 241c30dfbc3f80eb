//! The standard release stages.
//!
//! Order matters: `configure` freezes the context before anything touches the
//! keychain, and `keychain-teardown` closes the pair opened by
//! `keychain-setup`. The runner tears the keychain down again on every exit
//! path; a second teardown is a no-op.

use super::build_tool;
use super::{Predicate, Stage, StageAction, PipelineState, always, when_flag, when_set};
use crate::artifacts::{
    ArtifactDescriptor, BuildManifest, PlistEditor, bump_build_number, resolve_version,
    zip_directory, zip_files,
};
use crate::config::keys;
use crate::error::{ConfigError, ResourceError, Result};
use crate::keychain::KeychainHandle;
use crate::profile::{default_profiles_dir, fetch_profile, import_profile};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Stage names, in execution order.
pub const BOOTSTRAP: &str = "bootstrap";
pub const CONFIGURE: &str = "configure";
pub const KEYCHAIN_SETUP: &str = "keychain-setup";
pub const PROFILE_IMPORT: &str = "profile-import";
pub const PROFILE_FETCH: &str = "profile-fetch";
pub const DEPENDENCY_SYNC: &str = "dependency-sync";
pub const CLEAN_ARTIFACTS: &str = "clean-artifacts";
pub const BUMP_BUILD_NUMBER: &str = "bump-build-number";
pub const RESOLVE_VERSION: &str = "resolve-version";
pub const BUILD_ARCHIVE: &str = "build-archive";
pub const RUN_TESTS: &str = "run-tests";
pub const EXPORT_PACKAGE: &str = "export-package";
pub const ZIP_ARTIFACTS: &str = "zip-artifacts";
pub const UPLOAD_CRASH_REPORTS: &str = "upload-to-crash-service";
pub const KEYCHAIN_TEARDOWN: &str = "keychain-teardown";

/// Bump when asked to, or when an explicit build number is supplied.
fn bump_requested() -> Predicate {
    Box::new(|ctx| ctx.flag(keys::BUMP_BUILD_NUMBER) || ctx.get(keys::BUILD_NUMBER).is_some())
}

/// The full stage table.
pub fn standard_stages() -> Vec<Stage> {
    vec![
        Stage::new(BOOTSTRAP, when_set(keys::BOOTSTRAP_SCRIPT), Bootstrap),
        Stage::new(CONFIGURE, always(), Configure),
        Stage::new(KEYCHAIN_SETUP, when_flag(keys::SIGNING_ENABLED), KeychainSetup),
        Stage::new(PROFILE_IMPORT, when_flag(keys::IMPORT_PROFILE), ProfileImport),
        Stage::new(PROFILE_FETCH, when_flag(keys::FETCH_PROFILE), ProfileFetch),
        Stage::new(DEPENDENCY_SYNC, when_flag(keys::SYNC_DEPENDENCIES), DependencySync),
        Stage::new(CLEAN_ARTIFACTS, always(), CleanArtifacts),
        Stage::new(BUMP_BUILD_NUMBER, bump_requested(), BumpBuildNumber),
        Stage::new(RESOLVE_VERSION, always(), ResolveVersion),
        Stage::new(BUILD_ARCHIVE, always(), BuildArchive),
        Stage::new(RUN_TESTS, when_flag(keys::RUN_TESTS), RunTests),
        Stage::new(EXPORT_PACKAGE, when_flag(keys::EXPORT_PACKAGE), ExportPackage),
        Stage::new(ZIP_ARTIFACTS, when_flag(keys::ZIP_ARTIFACTS), ZipArtifacts),
        Stage::new(UPLOAD_CRASH_REPORTS, when_flag(keys::UPLOAD_CRASH_REPORTS), UploadCrashReports),
        Stage::new(KEYCHAIN_TEARDOWN, when_flag(keys::SIGNING_ENABLED), KeychainTeardown),
    ]
}

/// Directory holding the workspace or project, used as the working
/// directory for project-level tools.
fn project_dir(state: &PipelineState) -> Option<PathBuf> {
    state
        .ctx
        .path(keys::APP_WORKSPACE)
        .or_else(|| state.ctx.path(keys::APP_PROJECT))
        .and_then(|p| p.parent().map(Path::to_path_buf))
}

fn plist_editor(state: &PipelineState) -> Result<PlistEditor> {
    Ok(PlistEditor::new(
        state.ctx.get_or(keys::PLIST_BUDDY, "/usr/libexec/PlistBuddy"),
        state.ctx.require_path(keys::APP_INFO_PLIST)?,
    )
    .with_env(state.ctx.env_vars()))
}

/// Runs the user's bootstrap script with `sh`, from the script's directory.
struct Bootstrap;

#[async_trait]
impl StageAction for Bootstrap {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let script = state.ctx.require_path(keys::BOOTSTRAP_SCRIPT)?;
        if !script.is_file() {
            return Err(ConfigError::NotFound { path: script }.into());
        }

        let mut spec = state.program("sh").path_arg(&script);
        if let Some(dir) = script.parent() {
            spec = spec.current_dir(dir);
        }
        state.run_checked(&spec).await?;
        Ok(())
    }
}

/// Validates the context, then freezes it.
struct Configure;

#[async_trait]
impl StageAction for Configure {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        state.ctx.validate()?;
        state.apply_runtime_settings()?;
        state.ctx.freeze();

        let ctx = &state.ctx;
        if let Some(source) = ctx.source() {
            state.output.verbose(&format!("Configuration: {}", source.display()));
        }
        state.output.progress(&format!(
            "{} ({})",
            ctx.get_or(keys::APP_SCHEME, ""),
            ctx.get_or(keys::APP_CONFIGURATION, "Release")
        ));
        Ok(())
    }
}

struct KeychainSetup;

#[async_trait]
impl StageAction for KeychainSetup {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let handle = KeychainHandle::from_context(&state.ctx)?;
        let path = handle.path().display().to_string();
        state.keychain.activate(handle).await?;
        state.output.success(&format!("Keychain {path} unlocked"));
        Ok(())
    }
}

/// Installs `source` and records its UUID for the signing settings.
async fn install_profile(state: &mut PipelineState, source: &Path) -> Result<()> {
    let profiles_dir = state
        .ctx
        .path(keys::PROFILES_DIR)
        .or_else(default_profiles_dir)
        .ok_or_else(|| ConfigError::MissingRequiredKey {
            key: keys::PROFILES_DIR.to_string(),
        })?;

    let imported = import_profile(source, &profiles_dir).await?;
    match imported.uuid {
        Some(uuid) => {
            state.output.success(&format!("Provisioning profile {uuid}"));
            state.ctx.set(keys::PROFILE_UUID, uuid)?;
        }
        None if state.ctx.flag(keys::STRICT_PROFILE_UUID) => {
            return Err(ResourceError::ProfileUuidMissing {
                path: source.to_path_buf(),
            }
            .into());
        }
        None => state.output.warn(&format!(
            "No UUID found in {}; signing will likely fail",
            source.display()
        )),
    }
    Ok(())
}

struct ProfileImport;

#[async_trait]
impl StageAction for ProfileImport {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let source = state.ctx.require_path(keys::PROVISIONING_PROFILE)?;
        install_profile(state, &source).await
    }
}

/// Downloads the named profile, then installs it like `profile-import`.
struct ProfileFetch;

#[async_trait]
impl StageAction for ProfileFetch {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let download_dir = state.ctx.require_path(keys::BUILD_DIR)?.join("profiles");
        tokio::fs::create_dir_all(&download_dir).await?;

        let spec = state.command(keys::PROFILE_FETCH_TOOL, "ios").args([
            "profiles:download",
            state.ctx.require(keys::PROFILE_NAME)?,
            "--type",
            state.ctx.get_or(keys::PROFILE_TYPE, "distribution"),
        ]);
        let profile = fetch_profile(state.runner.as_ref(), spec, &download_dir).await?;
        install_profile(state, &profile).await
    }
}

struct DependencySync;

#[async_trait]
impl StageAction for DependencySync {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let mut spec = state
            .command(keys::DEPENDENCY_TOOL, "pod")
            .args(state.ctx.get_or(keys::DEPENDENCY_ARGS, "install").split_whitespace());
        if let Some(dir) = project_dir(state) {
            spec = spec.current_dir(dir);
        }
        state.run_checked(&spec).await?;
        Ok(())
    }
}

/// Empties the build directory.
struct CleanArtifacts;

#[async_trait]
impl StageAction for CleanArtifacts {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let build_dir = state.ctx.require_path(keys::BUILD_DIR)?;
        if build_dir.parent().is_none() {
            return Err(ConfigError::InvalidValue {
                key: keys::BUILD_DIR.to_string(),
                reason: format!("refusing to clean {}", build_dir.display()),
            }
            .into());
        }

        match tokio::fs::remove_dir_all(&build_dir).await {
            Ok(()) => log::debug!("Removed {}", build_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&build_dir).await?;
        Ok(())
    }
}

struct BumpBuildNumber;

#[async_trait]
impl StageAction for BumpBuildNumber {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let editor = plist_editor(state)?;
        let override_value = state.ctx.get(keys::BUILD_NUMBER);
        let next = bump_build_number(state.runner.as_ref(), &editor, override_value).await?;
        state.output.success(&format!("Build number {next}"));
        Ok(())
    }
}

/// Reads version and build number and derives every artifact name.
struct ResolveVersion;

#[async_trait]
impl StageAction for ResolveVersion {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let editor = plist_editor(state)?;
        let (version, build) = resolve_version(state.runner.as_ref(), &editor).await?;

        let descriptor = ArtifactDescriptor::new(
            state.ctx.require(keys::APP_SCHEME)?,
            &version,
            &build,
            &state.ctx.require_path(keys::BUILD_DIR)?,
        );
        descriptor.apply_to(&mut state.ctx)?;
        state.output.success(&descriptor.identifier);
        state.artifacts = Some(descriptor);
        Ok(())
    }
}

struct BuildArchive;

#[async_trait]
impl StageAction for BuildArchive {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let archive_path = state.artifacts()?.archive_path.clone();
        let spec = state
            .command(keys::XCODEBUILD, "xcodebuild")
            .args(build_tool::archive_args(&state.ctx, &archive_path)?);
        state.run_checked(&spec).await?;

        if !archive_path.exists() {
            log::warn!("Build succeeded but {} is missing", archive_path.display());
        }
        Ok(())
    }
}

struct RunTests;

#[async_trait]
impl StageAction for RunTests {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let spec = state
            .command(keys::XCODEBUILD, "xcodebuild")
            .args(build_tool::test_args(&state.ctx)?);
        state.run_checked(&spec).await?;
        Ok(())
    }
}

/// First `.ipa` directly inside `dir`.
fn find_package(dir: &Path) -> Option<PathBuf> {
    let pattern = format!("{}/*.ipa", glob::Pattern::escape(&dir.to_string_lossy()));
    glob::glob(&pattern).ok()?.filter_map(|entry| entry.ok()).next()
}

/// Exports the archive and moves the package to its derived name.
struct ExportPackage;

#[async_trait]
impl StageAction for ExportPackage {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let artifacts = state.artifacts()?.clone();
        let spec = state.command(keys::XCODEBUILD, "xcodebuild").args(build_tool::export_args(
            &state.ctx,
            &artifacts.archive_path,
            &artifacts.export_dir,
        )?);
        state.run_checked(&spec).await?;

        let exported = find_package(&artifacts.export_dir).ok_or_else(|| ResourceError::ArtifactMissing {
            path: artifacts.export_dir.join("*.ipa"),
        })?;
        tokio::fs::rename(&exported, &artifacts.package_path).await?;
        state
            .output
            .success(&format!("Package {}", artifacts.package_path.display()));
        Ok(())
    }
}

/// Zips debug symbols, bundles them with the package, writes the manifest.
struct ZipArtifacts;

#[async_trait]
impl StageAction for ZipArtifacts {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let artifacts = state.artifacts()?.clone();

        if artifacts.dsym_path.is_dir() {
            zip_directory(&artifacts.dsym_path, &artifacts.dsym_zip_path).await?;
        } else {
            state.output.warn(&format!(
                "No debug symbols at {}; bundling the package only",
                artifacts.dsym_path.display()
            ));
        }

        let bundle: Vec<PathBuf> = [&artifacts.package_path, &artifacts.dsym_zip_path]
            .into_iter()
            .filter(|p| p.is_file())
            .cloned()
            .collect();
        if bundle.is_empty() {
            return Err(ResourceError::ArtifactMissing {
                path: artifacts.package_path.clone(),
            }
            .into());
        }
        zip_files(&bundle, &artifacts.bundle_zip_path).await?;

        let manifest = BuildManifest::collect(
            &artifacts,
            &[
                &artifacts.package_path,
                &artifacts.dsym_zip_path,
                &artifacts.bundle_zip_path,
            ],
        )
        .await?;
        manifest.write(&artifacts.manifest_path).await?;

        state
            .output
            .success(&format!("Bundle {}", artifacts.bundle_zip_path.display()));
        Ok(())
    }
}

struct UploadCrashReports;

#[async_trait]
impl StageAction for UploadCrashReports {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let artifacts = state.artifacts()?.clone();
        if !artifacts.package_path.is_file() {
            return Err(ResourceError::ArtifactMissing {
                path: artifacts.package_path,
            }
            .into());
        }

        let mut spec = state
            .command(keys::CRASH_UPLOAD_TOOL, "crash-upload")
            .arg("--api-token")
            .secret_arg(state.ctx.require(keys::CRASH_API_TOKEN)?)
            .arg("--app-id")
            .arg(state.ctx.require(keys::CRASH_APP_ID)?)
            .arg("--ipa")
            .path_arg(&artifacts.package_path);
        if artifacts.dsym_zip_path.is_file() {
            spec = spec.arg("--dsym").path_arg(&artifacts.dsym_zip_path);
        }
        state.run_checked(&spec).await?;
        state.output.success("Uploaded to crash reporting service");
        Ok(())
    }
}

struct KeychainTeardown;

#[async_trait]
impl StageAction for KeychainTeardown {
    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        state.keychain.deactivate().await;
        Ok(())
    }
}
