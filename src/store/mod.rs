//! File store over a fixed content root
//!
//! Every operation takes and returns paths relative to the content root; the
//! store resolves them and refuses anything that would escape the root. Policy
//! decisions that the pipeline depends on live here:
//! - move/copy silently overwrite the destination (no merge)
//! - unzip keeps the source archive and overwrites on re-extraction
//! - zip excludes existing `.zip` members and writes members in sorted order
//!   with fixed timestamps, so an unchanged tree rebuilds byte-identically
//! - delete is a no-op for absent paths

use crate::error::{Error, Result, StoreError};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;


/// File store rooted at a content directory
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store over the given content root. The root itself is created
    /// lazily by the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The content root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a root-relative path to an absolute one, rejecting traversal.
    ///
    /// Absolute inputs and any `..` component fail with
    /// [`StoreError::PathTraversal`] before any I/O happens.
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf> {
        if relative.is_absolute() {
            return Err(Error::Store(StoreError::PathTraversal {
                path: relative.to_path_buf(),
            }));
        }
        for component in relative.components() {
            match component {
                Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                    return Err(Error::Store(StoreError::PathTraversal {
                        path: relative.to_path_buf(),
                    }));
                }
                Component::Normal(_) | Component::CurDir => {}
            }
        }
        Ok(self.root.join(relative))
    }

    /// Whether a root-relative path exists
    pub fn exists(&self, relative: &Path) -> bool {
        self.resolve(relative).map(|p| p.exists()).unwrap_or(false)
    }

    /// Write bytes to a root-relative path, creating parent directories.
    /// Overwrites any existing file. Returns the resolved absolute path.
    pub async fn write(&self, relative: &Path, bytes: &[u8]) -> Result<PathBuf> {
        let dest = self.resolve(relative)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, bytes).await?;
        debug!(?relative, size = bytes.len(), "wrote file");
        Ok(dest)
    }

    /// Move a file within the root, creating parent directories.
    ///
    /// Renames when possible and falls back to copy+remove across filesystems.
    /// Silently overwrites the destination. Returns the resolved destination.
    pub async fn move_file(&self, src: &Path, dst: &Path) -> Result<PathBuf> {
        let src_abs = self.resolve(src)?;
        let dst_abs = self.resolve(dst)?;

        if let Some(parent) = dst_abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::rename(&src_abs, &dst_abs).await {
            Ok(()) => {}
            Err(_) => {
                // Cross-device rename; copy then remove the source
                tokio::fs::copy(&src_abs, &dst_abs).await.map_err(|e| {
                    Error::Store(StoreError::MoveFailed {
                        source_path: src_abs.clone(),
                        dest_path: dst_abs.clone(),
                        reason: e.to_string(),
                    })
                })?;
                tokio::fs::remove_file(&src_abs).await.map_err(|e| {
                    Error::Store(StoreError::MoveFailed {
                        source_path: src_abs.clone(),
                        dest_path: dst_abs.clone(),
                        reason: format!("copied but failed to remove source: {}", e),
                    })
                })?;
            }
        }

        debug!(?src, ?dst, "moved file");
        Ok(dst_abs)
    }

    /// Copy a file within the root, creating parent directories.
    /// Non-destructive to the source; silently overwrites the destination.
    pub async fn copy_file(&self, src: &Path, dst: &Path) -> Result<PathBuf> {
        let src_abs = self.resolve(src)?;
        let dst_abs = self.resolve(dst)?;

        if let Some(parent) = dst_abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src_abs, &dst_abs).await.map_err(|e| {
            Error::Store(StoreError::MoveFailed {
                source_path: src_abs,
                dest_path: dst_abs.clone(),
                reason: e.to_string(),
            })
        })?;

        debug!(?src, ?dst, "copied file");
        Ok(dst_abs)
    }

    /// Delete a file. No-op when the path does not exist.
    pub async fn delete(&self, relative: &Path) -> Result<()> {
        let abs = self.resolve(relative)?;
        match tokio::fs::remove_file(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Extract all members of a zip archive into a destination directory,
    /// preserving relative structure. The source archive is kept for
    /// provenance and reprocessing; re-extraction overwrites existing files
    /// and never errors on them. Members with unsafe names are skipped with a
    /// warning. Returns the extracted files as root-relative paths.
    pub fn unzip(&self, archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        let archive_abs = self.resolve(archive)?;
        let dest_abs = self.resolve(dest_dir)?;
        std::fs::create_dir_all(&dest_abs)?;

        let file = std::fs::File::open(&archive_abs).map_err(|e| {
            Error::Store(StoreError::ExtractionFailed {
                archive: archive_abs.clone(),
                reason: format!("failed to open archive: {}", e),
            })
        })?;
        let mut zip_archive = zip::ZipArchive::new(file).map_err(|e| {
            Error::Store(StoreError::ExtractionFailed {
                archive: archive_abs.clone(),
                reason: format!("failed to read archive: {}", e),
            })
        })?;

        let mut extracted = Vec::new();
        for i in 0..zip_archive.len() {
            let mut entry = zip_archive.by_index(i).map_err(|e| {
                Error::Store(StoreError::ExtractionFailed {
                    archive: archive_abs.clone(),
                    reason: format!("failed to read entry {}: {}", i, e),
                })
            })?;

            let Some(member_path) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
                warn!(?archive, index = i, "skipping entry with unsafe path");
                continue;
            };
            let out_path = dest_abs.join(&member_path);

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out_file = std::fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out_file)?;
            extracted.push(dest_dir.join(member_path));
        }

        info!(
            ?archive,
            ?dest_dir,
            extracted_count = extracted.len(),
            "extracted archive"
        );
        Ok(extracted)
    }

    /// Build a zip archive from every file under `source_dir`, excluding files
    /// that are themselves `.zip` archives. Member paths are relative to
    /// `source_dir` and written in sorted order with fixed timestamps.
    /// Returns the archive's root-relative path.
    pub fn zip(&self, archive_name: &str, source_dir: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let source_abs = self.resolve(source_dir)?;
        let dest_abs = self.resolve(dest_dir)?;

        // The archive name flows from upstream data; guard it like any path
        let archive_rel = dest_dir.join(archive_name);
        let archive_abs = self.resolve(&archive_rel)?;
        std::fs::create_dir_all(&dest_abs)?;

        // Enumerate, filter out prior archives, sort for reproducible output
        let mut members: Vec<PathBuf> = Vec::new();
        if source_abs.is_dir() {
            for entry in WalkDir::new(&source_abs).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
                {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&source_abs)
                    .map_err(|e| {
                        Error::Store(StoreError::InvalidPath {
                            path: entry.path().to_path_buf(),
                            reason: e.to_string(),
                        })
                    })?
                    .to_path_buf();
                members.push(rel);
            }
        }
        members.sort();

        let file = std::fs::File::create(&archive_abs).map_err(|e| {
            Error::Store(StoreError::ArchiveFailed {
                archive: archive_abs.clone(),
                reason: format!("failed to create archive file: {}", e),
            })
        })?;
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        for member in &members {
            let member_name = zip_member_name(member);
            writer.start_file(member_name, options).map_err(|e| {
                Error::Store(StoreError::ArchiveFailed {
                    archive: archive_abs.clone(),
                    reason: format!("failed to start member {}: {}", member.display(), e),
                })
            })?;
            let contents = std::fs::read(source_abs.join(member))?;
            writer.write_all(&contents).map_err(|e| {
                Error::Store(StoreError::ArchiveFailed {
                    archive: archive_abs.clone(),
                    reason: format!("failed to write member {}: {}", member.display(), e),
                })
            })?;
        }

        writer.finish().map_err(|e| {
            Error::Store(StoreError::ArchiveFailed {
                archive: archive_abs.clone(),
                reason: format!("failed to finish archive: {}", e),
            })
        })?;

        info!(
            archive = archive_name,
            ?source_dir,
            member_count = members.len(),
            "built archive"
        );
        Ok(archive_rel)
    }

    /// Unpack a gzip-compressed tarball into a destination directory.
    /// Used for runtime build snapshots (Linux builds ship as tar.gz).
    pub fn unpack_tarball(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        let archive_abs = self.resolve(archive)?;
        let dest_abs = self.resolve(dest_dir)?;
        std::fs::create_dir_all(&dest_abs)?;

        let file = std::fs::File::open(&archive_abs).map_err(|e| {
            Error::Store(StoreError::ExtractionFailed {
                archive: archive_abs.clone(),
                reason: format!("failed to open tarball: {}", e),
            })
        })?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut tarball = tar::Archive::new(decoder);
        tarball.unpack(&dest_abs).map_err(|e| {
            Error::Store(StoreError::ExtractionFailed {
                archive: archive_abs.clone(),
                reason: format!("failed to unpack tarball: {}", e),
            })
        })?;

        info!(?archive, ?dest_dir, "unpacked tarball");
        Ok(())
    }

    /// List every file under a root-relative directory as root-relative paths,
    /// sorted. Returns an empty list if the directory does not exist.
    pub fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let dir_abs = self.resolve(dir)?;
        if !dir_abs.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir_abs).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&dir_abs)
                .map_err(|e| {
                    Error::Store(StoreError::InvalidPath {
                        path: entry.path().to_path_buf(),
                        reason: e.to_string(),
                    })
                })?
                .to_path_buf();
            files.push(dir.join(rel));
        }
        files.sort();
        Ok(files)
    }
}

/// Zip member name with forward slashes regardless of platform
fn zip_member_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(seg) => seg.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
