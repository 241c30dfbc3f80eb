//! Argument construction for the build tool (`xcodebuild`).

use crate::config::{Context, keys};
use crate::error::ConfigError;
use std::path::Path;

/// `-workspace`/`-project`, `-scheme` and `-configuration`.
///
/// A workspace wins over a project when both are set.
pub fn project_args(ctx: &Context) -> Result<Vec<String>, ConfigError> {
    let mut args = Vec::new();
    if let Some(workspace) = ctx.get(keys::APP_WORKSPACE) {
        args.extend(["-workspace".to_string(), workspace.to_string()]);
    } else {
        let project = ctx.get(keys::APP_PROJECT).ok_or_else(|| ConfigError::MissingRequiredKey {
            key: format!("{} or {}", keys::APP_WORKSPACE, keys::APP_PROJECT),
        })?;
        args.extend(["-project".to_string(), project.to_string()]);
    }
    args.extend([
        "-scheme".to_string(),
        ctx.require(keys::APP_SCHEME)?.to_string(),
        "-configuration".to_string(),
        ctx.get_or(keys::APP_CONFIGURATION, "Release").to_string(),
    ]);
    Ok(args)
}

/// Manual signing settings, when signing is enabled.
///
/// The profile is pinned by UUID when one was imported.
pub fn signing_args(ctx: &Context) -> Vec<String> {
    if !ctx.flag(keys::SIGNING_ENABLED) {
        return Vec::new();
    }
    let mut args = vec!["CODE_SIGN_STYLE=Manual".to_string()];
    if let Some(identity) = ctx.get(keys::CODE_SIGN_IDENTITY) {
        args.push(format!("CODE_SIGN_IDENTITY={identity}"));
    }
    if let Some(keychain) = ctx.get(keys::KEYCHAIN_PATH) {
        args.push(format!("OTHER_CODE_SIGN_FLAGS=--keychain {keychain}"));
    }
    if let Some(uuid) = ctx.get(keys::PROFILE_UUID) {
        args.push(format!("PROVISIONING_PROFILE={uuid}"));
    }
    args
}

fn extra_args(ctx: &Context) -> Vec<String> {
    ctx.get(keys::XCODEBUILD_EXTRA_ARGS)
        .map(|extra| extra.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// `archive` invocation writing to `archive_path`.
pub fn archive_args(ctx: &Context, archive_path: &Path) -> Result<Vec<String>, ConfigError> {
    let mut args = project_args(ctx)?;
    args.extend([
        "-sdk".to_string(),
        ctx.get_or(keys::APP_SDK, "iphoneos").to_string(),
        "-archivePath".to_string(),
        archive_path.to_string_lossy().into_owned(),
    ]);
    args.extend(signing_args(ctx));
    args.extend(extra_args(ctx));
    args.push("archive".to_string());
    Ok(args)
}

/// `test` invocation against `TEST_DESTINATION`.
pub fn test_args(ctx: &Context) -> Result<Vec<String>, ConfigError> {
    let mut args = project_args(ctx)?;
    args.extend([
        "-destination".to_string(),
        ctx.require(keys::TEST_DESTINATION)?.to_string(),
    ]);
    args.extend(extra_args(ctx));
    args.push("test".to_string());
    Ok(args)
}

/// `-exportArchive` invocation.
pub fn export_args(ctx: &Context, archive_path: &Path, export_dir: &Path) -> Result<Vec<String>, ConfigError> {
    Ok(vec![
        "-exportArchive".to_string(),
        "-archivePath".to_string(),
        archive_path.to_string_lossy().into_owned(),
        "-exportPath".to_string(),
        export_dir.to_string_lossy().into_owned(),
        "-exportOptionsPlist".to_string(),
        ctx.require(keys::EXPORT_OPTIONS_PLIST)?.to_string(),
    ])
}
