//! Artifact packaging: zip bundles, checksums and the build manifest.

use super::ArtifactDescriptor;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Hex-encoded SHA-256 of a file, read in 8KB chunks.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn zip_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

/// Entry name inside an archive; always `/`-separated.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn join_error(e: tokio::task::JoinError) -> PipelineError {
    PipelineError::Io(std::io::Error::other(format!("archive task failed: {e}")))
}

/// Zips the directory `src` into `dest`, keeping `src`'s own name as the
/// top-level entry (`MyApp.app.dSYM/Contents/...`).
pub async fn zip_directory(src: &Path, dest: &Path) -> Result<()> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || zip_directory_blocking(&src, &dest))
        .await
        .map_err(join_error)?
}

fn zip_directory_blocking(src: &Path, dest: &Path) -> Result<()> {
    let base = src.parent().unwrap_or(src);
    let mut writer = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let options = zip_options();

    let mut entries: Vec<_> = walkdir::WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| PipelineError::Io(std::io::Error::other(e)))?;
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let relative = entry.path().strip_prefix(base).unwrap_or(entry.path());
        let name = entry_name(relative);
        if name.is_empty() {
            continue;
        }

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            std::io::copy(&mut File::open(entry.path())?, &mut writer)?;
        } else {
            log::warn!("Skipping non-regular file {}", entry.path().display());
        }
    }

    writer.finish()?;
    Ok(())
}

/// Zips `files` flat into `dest`, each under its own file name.
pub async fn zip_files(files: &[PathBuf], dest: &Path) -> Result<()> {
    let files = files.to_vec();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || zip_files_blocking(&files, &dest))
        .await
        .map_err(join_error)?
}

fn zip_files_blocking(files: &[PathBuf], dest: &Path) -> Result<()> {
    let mut writer = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let options = zip_options();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PipelineError::Io(std::io::Error::other(format!(
                    "{} has no file name",
                    path.display()
                )))
            })?;
        writer.start_file(name, options)?;
        std::io::copy(&mut File::open(path)?, &mut writer)?;
    }

    writer.finish()?;
    Ok(())
}

/// One packaged file in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

impl ManifestEntry {
    pub async fn describe(path: &Path) -> Result<Self> {
        let size = tokio::fs::metadata(path).await?.len();
        let sha256 = sha256_file(path).await?;
        Ok(Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            size,
            sha256,
        })
    }
}

/// Machine-readable record of a run's outputs, written next to them.
#[derive(Debug, Clone, Serialize)]
pub struct BuildManifest {
    pub identifier: String,
    pub target: String,
    pub version: String,
    pub build_number: String,
    pub created_at: DateTime<Utc>,
    pub artifacts: Vec<ManifestEntry>,
}

impl BuildManifest {
    /// Describes every existing file in `files`; missing ones are left out.
    pub async fn collect(descriptor: &ArtifactDescriptor, files: &[&Path]) -> Result<Self> {
        let mut artifacts = Vec::with_capacity(files.len());
        for path in files {
            if path.is_file() {
                artifacts.push(ManifestEntry::describe(path).await?);
            }
        }
        Ok(Self {
            identifier: descriptor.identifier.clone(),
            target: descriptor.target.clone(),
            version: descriptor.version.clone(),
            build_number: descriptor.build_number.clone(),
            created_at: Utc::now(),
            artifacts,
        })
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn archive_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello").unwrap();
        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn directory_zip_keeps_top_level_name() {
        let dir = tempfile::tempdir().unwrap();
        let dsym = dir.path().join("MyApp.app.dSYM");
        std::fs::create_dir_all(dsym.join("Contents/Resources/DWARF")).unwrap();
        std::fs::write(dsym.join("Contents/Resources/DWARF/MyApp"), b"dwarf").unwrap();
        std::fs::write(dsym.join("Contents/Info.plist"), b"<plist/>").unwrap();

        let dest = dir.path().join("MyApp.dSYM.zip");
        zip_directory(&dsym, &dest).await.unwrap();

        let names = archive_names(&dest);
        assert!(names.contains(&"MyApp.app.dSYM/".to_string()));
        assert!(names.contains(&"MyApp.app.dSYM/Contents/Info.plist".to_string()));
        assert!(names.contains(&"MyApp.app.dSYM/Contents/Resources/DWARF/MyApp".to_string()));
    }

    #[tokio::test]
    async fn flat_zip_contains_files_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let ipa = dir.path().join("MyApp-1.0-3.ipa");
        let sym = dir.path().join("MyApp-1.0-3.dSYM.zip");
        std::fs::write(&ipa, b"ipa").unwrap();
        std::fs::write(&sym, b"sym").unwrap();

        let dest = dir.path().join("MyApp-1.0-3.zip");
        zip_files(&[ipa, sym], &dest).await.unwrap();

        assert_eq!(
            archive_names(&dest),
            vec!["MyApp-1.0-3.ipa".to_string(), "MyApp-1.0-3.dSYM.zip".to_string()]
        );
        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut content = String::new();
        archive
            .by_name("MyApp-1.0-3.ipa")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "ipa");
    }

    #[tokio::test]
    async fn manifest_lists_existing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let desc = ArtifactDescriptor::new("MyApp", "2.1.0", "57", dir.path());
        std::fs::write(&desc.package_path, b"ipa").unwrap();

        let manifest = BuildManifest::collect(&desc, &[&desc.package_path, &desc.dsym_zip_path])
            .await
            .unwrap();
        manifest.write(&desc.manifest_path).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&desc.manifest_path).unwrap()).unwrap();
        assert_eq!(json["identifier"], "MyApp-2.1.0-57");
        let artifacts = json["artifacts"].as_array().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0]["name"], "MyApp-2.1.0-57.ipa");
        assert_eq!(artifacts[0]["size"], 3);
    }
}
