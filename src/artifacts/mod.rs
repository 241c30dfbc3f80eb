//! Artifact naming, versioning and packaging.
//!
//! Every output of a run is named from a single identifier,
//! `{target}-{version}-{build}`, so the full set of paths can be rebuilt
//! from those three values and the build directory alone.
//!
//! - [`version`] - version lookup and build-number bumping via the plist editor
//! - [`package`] - zip bundles, checksums and the build manifest

pub mod package;
pub mod version;

pub use package::{BuildManifest, ManifestEntry, sha256_file, zip_directory, zip_files};
pub use version::{PlistEditor, bump_build_number, next_build_number, resolve_version};

use crate::config::{Context, keys};
use crate::error::ConfigError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Deterministic artifact identifier.
pub fn artifact_identifier(target: &str, version: &str, build_number: &str) -> String {
    format!("{target}-{version}-{build_number}")
}

/// Names and locations of every artifact a run produces.
///
/// Computed once after the version is resolved, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDescriptor {
    pub target: String,
    pub version: String,
    pub build_number: String,
    pub identifier: String,
    pub build_dir: PathBuf,
    /// `{id}.xcarchive`
    pub archive_path: PathBuf,
    /// `{id}.xcarchive/dSYMs/{target}.app.dSYM`
    pub dsym_path: PathBuf,
    /// `{id}-export/`, scratch directory for package export
    pub export_dir: PathBuf,
    /// `{id}.ipa`
    pub package_path: PathBuf,
    /// `{id}.dSYM.zip`
    pub dsym_zip_path: PathBuf,
    /// `{id}.zip`, package plus debug symbols
    pub bundle_zip_path: PathBuf,
    /// `{id}.json`
    pub manifest_path: PathBuf,
}

impl ArtifactDescriptor {
    pub fn new(target: &str, version: &str, build_number: &str, build_dir: &Path) -> Self {
        let identifier = artifact_identifier(target, version, build_number);
        let at = |suffix: &str| build_dir.join(format!("{identifier}{suffix}"));

        let archive_path = at(".xcarchive");
        let dsym_path = archive_path
            .join("dSYMs")
            .join(format!("{target}.app.dSYM"));

        Self {
            target: target.to_string(),
            version: version.to_string(),
            build_number: build_number.to_string(),
            build_dir: build_dir.to_path_buf(),
            export_dir: at("-export"),
            package_path: at(".ipa"),
            dsym_zip_path: at(".dSYM.zip"),
            bundle_zip_path: at(".zip"),
            manifest_path: at(".json"),
            archive_path,
            dsym_path,
            identifier,
        }
    }

    /// Publishes the computed names into the context so external tools see them.
    pub fn apply_to(&self, ctx: &mut Context) -> Result<(), ConfigError> {
        let path = |p: &Path| p.to_string_lossy().into_owned();
        ctx.set(keys::APP_VERSION, self.version.as_str())?;
        ctx.set(keys::APP_BUILD_NUMBER, self.build_number.as_str())?;
        ctx.set(keys::ARTIFACT_ID, self.identifier.as_str())?;
        ctx.set(keys::ARCHIVE_PATH, path(&self.archive_path))?;
        ctx.set(keys::DSYM_PATH, path(&self.dsym_path))?;
        ctx.set(keys::IPA_PATH, path(&self.package_path))?;
        ctx.set(keys::DSYM_ZIP_PATH, path(&self.dsym_zip_path))?;
        ctx.set(keys::BUNDLE_ZIP_PATH, path(&self.bundle_zip_path))?;
        Ok(())
    }

    /// All derived paths, for reporting.
    pub fn paths(&self) -> [&Path; 7] {
        [
            &self.archive_path,
            &self.dsym_path,
            &self.export_dir,
            &self.package_path,
            &self.dsym_zip_path,
            &self.bundle_zip_path,
            &self.manifest_path,
        ]
    }
}
