//! Release archive construction
//!
//! Builds the final distributable zip for a release from its deployable file
//! tree and attaches it to the release row. The attach is at-most-once: the
//! database claim only succeeds while the release has no archive, so
//! concurrent or repeated builds converge on a single committed archive.
//! Because the store writes archives deterministically, a build that loses
//! the claim has produced the same bytes the winner committed.

use crate::db::{Database, Release};
use crate::error::{Error, Result};
use crate::store::FileStore;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, info};

/// Outcome of an archive build for one release
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// This build created and attached the archive
    Built {
        /// Archive path relative to the content root
        archive_path: PathBuf,
        /// Hex SHA-256 of the archive bytes
        sha256: String,
    },
    /// An archive is already attached to the release
    AlreadyExists {
        /// Committed archive path relative to the content root
        archive_path: PathBuf,
    },
}

impl ArchiveOutcome {
    /// The committed archive path, whichever build attached it
    pub fn archive_path(&self) -> &PathBuf {
        match self {
            ArchiveOutcome::Built { archive_path, .. } => archive_path,
            ArchiveOutcome::AlreadyExists { archive_path } => archive_path,
        }
    }
}

/// Builds and attaches release archives
#[derive(Clone, Debug)]
pub struct ArchiveBuilder {
    db: Database,
    store: FileStore,
}

impl ArchiveBuilder {
    /// Create an archive builder over the given database and store
    pub fn new(db: Database, store: FileStore) -> Self {
        Self { db, store }
    }

    /// Build the release archive and attach it, at most once per release.
    ///
    /// The zip contains every file under the release's deployable tree with
    /// member paths relative to that tree. Releases that already carry an
    /// archive return [`ArchiveOutcome::AlreadyExists`] without rebuilding.
    pub async fn build(&self, release: &Release) -> Result<ArchiveOutcome> {
        if let Some(committed) = &release.archive_path {
            debug!(
                release_id = release.id,
                archive = %committed,
                "archive already attached, skipping build"
            );
            return Ok(ArchiveOutcome::AlreadyExists {
                archive_path: PathBuf::from(committed),
            });
        }

        let store = self.store.clone();
        let archive_name = release.archive_name();
        let files_dir = release.files_dir();
        let release_root = release.root();

        // zip construction is blocking file I/O
        let archive_rel = tokio::task::spawn_blocking(move || {
            store.zip(&archive_name, &files_dir, &release_root)
        })
        .await
        .map_err(|e| Error::Other(format!("archive build task failed: {}", e)))??;

        let archive_abs = self.store.resolve(&archive_rel)?;
        let bytes = tokio::fs::read(&archive_abs).await?;
        let sha256 = hex_sha256(&bytes);

        let archive_str = archive_rel.to_string_lossy().to_string();
        let claimed = self
            .db
            .claim_archive(release.release_id(), &archive_str, &sha256)
            .await?;

        if !claimed {
            // Lost the attach race; report the committed archive
            let current = self
                .db
                .get_release(release.release_id())
                .await?
                .ok_or_else(|| Error::NotFound(format!("release {}", release.id)))?;
            let committed = current
                .archive_path
                .ok_or_else(|| Error::Other("archive claim lost but no archive committed".to_string()))?;
            return Ok(ArchiveOutcome::AlreadyExists {
                archive_path: PathBuf::from(committed),
            });
        }

        info!(
            release_id = release.id,
            archive = %archive_str,
            sha256 = %sha256,
            size = bytes.len(),
            "archive built and attached"
        );

        Ok(ArchiveOutcome::Built {
            archive_path: archive_rel,
            sha256,
        })
    }
}

/// Hex-encoded SHA-256 digest
fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
