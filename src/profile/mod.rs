//! Provisioning profile handling.
//!
//! Profiles are imported by copying them into the directory Xcode scans,
//! named after the profile UUID. The UUID is scraped from the profile text
//! with [`extract_profile_uuid`]; a profile without one is still installed
//! under its own file name, which usually means signing fails later.

use crate::error::{ResourceError, Result};
use crate::runner::{CommandRunner, CommandSpec};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Token preceding the profile identifier.
pub const UUID_MARKER: &str = "UUID";

/// Extension of provisioning profile files.
pub const PROFILE_EXTENSION: &str = "mobileprovision";

/// Marker, up to 64 characters of markup, then a hyphenated 8-4-4-4-12 id.
static UUID_AFTER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"UUID[\s\S]{0,64}?\b([0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12})\b",
    )
    .unwrap_or_else(|e| panic!("invalid profile UUID pattern: {e}"))
});

static PROFILE_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\s"'`]+\.mobileprovision\b"#)
        .unwrap_or_else(|e| panic!("invalid profile filename pattern: {e}"))
});

/// Extracts the identifier that follows the `UUID` marker.
///
/// Returns `None` when there is no marker or no well-formed identifier
/// right after it. Never fails.
pub fn extract_profile_uuid(text: &str) -> Option<String> {
    UUID_AFTER_MARKER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Finds the profile file name a download client printed.
///
/// The last mention wins, since clients usually report the saved file at
/// the end of their output.
pub fn find_profile_filename(output: &str) -> Option<String> {
    PROFILE_FILENAME
        .find_iter(output)
        .last()
        .map(|m| m.as_str().to_string())
}

/// Directory Xcode reads installed profiles from.
pub fn default_profiles_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("Library/MobileDevice/Provisioning Profiles"))
}

/// Result of importing a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedProfile {
    /// Identifier scraped from the profile, if any
    pub uuid: Option<String>,
    /// Where the profile was installed
    pub installed_path: PathBuf,
}

/// Copies `source` into `profiles_dir`, named `{uuid}.mobileprovision` when
/// the identifier is known.
pub async fn import_profile(source: &Path, profiles_dir: &Path) -> Result<ImportedProfile> {
    if !source.is_file() {
        return Err(ResourceError::ProfileNotFound {
            reason: format!("{} does not exist", source.display()),
        }
        .into());
    }

    let bytes = tokio::fs::read(source).await?;
    let uuid = extract_profile_uuid(&String::from_utf8_lossy(&bytes));

    let file_name = match &uuid {
        Some(uuid) => format!("{uuid}.{PROFILE_EXTENSION}"),
        None => {
            log::warn!(
                "No {UUID_MARKER} found in {}; installing without an identifier",
                source.display()
            );
            source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("profile.{PROFILE_EXTENSION}"))
        }
    };

    tokio::fs::create_dir_all(profiles_dir).await?;
    let installed_path = profiles_dir.join(file_name);
    tokio::fs::copy(source, &installed_path).await?;
    log::info!("Installed provisioning profile {}", installed_path.display());

    Ok(ImportedProfile {
        uuid,
        installed_path,
    })
}

/// Newest `*.mobileprovision` directly inside `dir`.
pub fn newest_profile_in(dir: &Path) -> Option<PathBuf> {
    let pattern = format!(
        "{}/*.{PROFILE_EXTENSION}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    glob::glob(&pattern)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|path| {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Runs the profile download client and locates the file it produced.
///
/// The client runs in `download_dir`. Its output is searched for a
/// `.mobileprovision` file name; failing that, the newest profile in
/// `download_dir` is used.
pub async fn fetch_profile(
    runner: &dyn CommandRunner,
    spec: CommandSpec,
    download_dir: &Path,
) -> Result<PathBuf> {
    let spec = spec.current_dir(download_dir);
    let output = runner.run(&spec).await?.check(&spec)?;

    if let Some(name) = find_profile_filename(&output.stdout) {
        let candidate = download_dir.join(&name);
        if candidate.is_file() {
            return Ok(candidate);
        }
        log::debug!("Reported profile {} not found on disk", candidate.display());
    }

    newest_profile_in(download_dir).ok_or_else(|| {
        ResourceError::ProfileNotFound {
            reason: format!(
                "{} reported success but no .{PROFILE_EXTENSION} appeared in {}",
                spec.program_name(),
                download_dir.display()
            ),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner, matches};

    const PROFILE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>Name</key>
	<string>MyApp AppStore</string>
	<key>TeamIdentifier</key>
	<array><string>ABCDE12345</string></array>
	<key>UUID</key>
	<string>0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0</string>
</dict>
</plist>"#;

    #[test]
    fn extracts_identifier_after_marker() {
        let text = "junk UUID ABCDEFAB-1234-5678-9ABC-DEF012345678 trailing";
        assert_eq!(
            extract_profile_uuid(text).as_deref(),
            Some("ABCDEFAB-1234-5678-9ABC-DEF012345678")
        );
    }

    #[test]
    fn extracts_identifier_from_plist_markup() {
        assert_eq!(
            extract_profile_uuid(PROFILE_XML).as_deref(),
            Some("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0")
        );
    }

    #[test]
    fn no_marker_yields_none() {
        assert_eq!(
            extract_profile_uuid("ABCDEFAB-1234-5678-9ABC-DEF012345678 without marker"),
            None
        );
        assert_eq!(extract_profile_uuid(""), None);
    }

    #[test]
    fn malformed_identifier_yields_none() {
        assert_eq!(extract_profile_uuid("UUID ABCDEFAB-1234-5678-9ABC"), None);
    }

    #[test]
    fn finds_last_reported_filename() {
        let output = "Fetching profiles...\nSaved \"MyApp_AppStore.mobileprovision\"\n";
        assert_eq!(
            find_profile_filename(output).as_deref(),
            Some("MyApp_AppStore.mobileprovision")
        );
        assert_eq!(find_profile_filename("nothing here"), None);
    }

    #[tokio::test]
    async fn import_names_profile_after_uuid() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let profile = src.path().join("store.mobileprovision");
        std::fs::write(&profile, PROFILE_XML).unwrap();

        let imported = import_profile(&profile, dest.path()).await.unwrap();
        assert_eq!(
            imported.uuid.as_deref(),
            Some("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0")
        );
        assert_eq!(
            imported.installed_path,
            dest.path()
                .join("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0.mobileprovision")
        );
        assert!(imported.installed_path.is_file());
    }

    #[tokio::test]
    async fn import_without_uuid_keeps_file_name() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let profile = src.path().join("odd.mobileprovision");
        std::fs::write(&profile, "no identifier in here").unwrap();

        let imported = import_profile(&profile, dest.path()).await.unwrap();
        assert_eq!(imported.uuid, None);
        assert_eq!(imported.installed_path, dest.path().join("odd.mobileprovision"));
    }

    #[tokio::test]
    async fn fetch_uses_reported_filename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MyApp.mobileprovision"), PROFILE_XML).unwrap();
        let runner = ScriptedRunner::new();
        runner.on(
            matches("ios", &["profiles:download"]),
            CommandOutput::ok("Successfully downloaded: MyApp.mobileprovision\n"),
        );

        let spec = CommandSpec::new("ios").args(["profiles:download", "MyApp"]);
        let path = fetch_profile(&runner, spec, dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("MyApp.mobileprovision"));
    }

    #[tokio::test]
    async fn fetch_without_any_profile_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let spec = CommandSpec::new("ios").arg("profiles:download");
        let err = fetch_profile(&runner, spec, dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            crate::PipelineError::Resource(ResourceError::ProfileNotFound { .. })
        ));
    }
}
