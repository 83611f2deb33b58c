//! Database layer for sourcemod-dl
//!
//! Handles SQLite persistence for releases, artifacts, and runtime builds.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`releases`] — Release CRUD, state transitions, archive claim
//! - [`artifacts`] — Artifact registration and materialization
//! - [`runtimes`] — Runtime build snapshots

use crate::types::{ArtifactId, ArtifactKind, ReleaseId, ReleaseState};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod artifacts;
mod migrations;
mod releases;
mod runtimes;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

/// Database handle over a SQLite connection pool
#[derive(Clone, Debug)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

/// New release to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewRelease {
    /// Stable plugin identifier
    pub plugin_id: String,
    /// Release version string
    pub version: String,
    /// Plugin display name
    pub name: String,
    /// Author name
    pub author: String,
    /// Category label
    pub category: String,
    /// Game the plugin targets
    pub game: String,
    /// Upstream page URL
    pub source_url: String,
    /// Whether this release is the plugin's latest
    pub is_latest: bool,
}

/// Release record from database
#[derive(Debug, Clone, FromRow)]
pub struct Release {
    /// Unique database ID
    pub id: i64,
    /// Stable plugin identifier
    pub plugin_id: String,
    /// Release version string
    pub version: String,
    /// Plugin display name
    pub name: String,
    /// Author name
    pub author: String,
    /// Category label
    pub category: String,
    /// Game the plugin targets
    pub game: String,
    /// Upstream page URL
    pub source_url: String,
    /// Whether this release is the plugin's latest
    pub is_latest: bool,
    /// Pipeline state code (see [`ReleaseState`])
    pub state: i32,
    /// Error message if the release failed
    pub error_message: Option<String>,
    /// Final archive path relative to the content root, once attached
    pub archive_path: Option<String>,
    /// SHA-256 of the attached archive
    pub archive_sha256: Option<String>,
    /// Unix timestamp when the release was registered
    pub created_at: i64,
    /// Unix timestamp when the release reached Done
    pub completed_at: Option<i64>,
}

impl Release {
    /// Typed release ID
    pub fn release_id(&self) -> ReleaseId {
        ReleaseId(self.id)
    }

    /// Typed pipeline state
    pub fn release_state(&self) -> ReleaseState {
        ReleaseState::from_i32(self.state)
    }

    /// Root of this release's directory tree, relative to the content root
    pub fn root(&self) -> PathBuf {
        PathBuf::from("plugins")
            .join(&self.plugin_id)
            .join(&self.version)
    }

    /// The deployable file tree under the release root
    pub fn files_dir(&self) -> PathBuf {
        self.root().join("files")
    }

    /// Where zip attachment payloads land before extraction
    pub fn archives_dir(&self) -> PathBuf {
        self.root().join("archives")
    }

    /// Scratch space for nested-archive extraction
    pub fn temp_dir(&self) -> PathBuf {
        self.root().join("temp")
    }

    /// File name of the final release archive
    pub fn archive_name(&self) -> String {
        format!("{} {}.zip", self.name, self.version)
    }
}

/// New artifact to be registered for a release
#[derive(Debug, Clone)]
pub struct NewArtifact {
    /// Release this artifact belongs to
    pub release_id: ReleaseId,
    /// Logical file name
    pub name: String,
    /// Kind of file
    pub kind: ArtifactKind,
    /// Remote origin locator; absent for artifacts discovered by extraction
    pub remote_url: Option<String>,
}

/// Artifact record from database
#[derive(Debug, Clone, FromRow)]
pub struct Artifact {
    /// Unique database ID
    pub id: i64,
    /// Release this artifact belongs to
    pub release_id: i64,
    /// Logical file name
    pub name: String,
    /// Kind code (see [`ArtifactKind`])
    pub kind: i32,
    /// Remote origin locator, if any
    pub remote_url: Option<String>,
    /// Storage location relative to the content root, once downloaded
    pub storage_path: Option<String>,
    /// Unix timestamp when the artifact was registered
    pub created_at: i64,
}

impl Artifact {
    /// Typed artifact ID
    pub fn artifact_id(&self) -> ArtifactId {
        ArtifactId(self.id)
    }

    /// Typed artifact kind
    pub fn artifact_kind(&self) -> ArtifactKind {
        ArtifactKind::from_i32(self.kind)
    }

    /// Whether the artifact's content has been downloaded
    pub fn is_materialized(&self) -> bool {
        self.storage_path.is_some()
    }
}

/// Outcome of registering an artifact
///
/// Registration is deduplicated by (release, kind, name); hitting an existing
/// row is an idempotent skip, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A new artifact row was created
    Created(ArtifactId),
    /// An artifact with this (release, kind, name) already exists
    Duplicate(ArtifactId),
}

/// Runtime build record from database
#[derive(Debug, Clone, FromRow)]
pub struct RuntimeBuild {
    /// Unique database ID
    pub id: i64,
    /// Runtime name (e.g. "sourcemod")
    pub runtime: String,
    /// Build version string
    pub version: String,
    /// Windows build path relative to the content root
    pub windows_path: String,
    /// Linux build path relative to the content root
    pub linux_path: String,
    /// Unix timestamp when the build was recorded
    pub created_at: i64,
}
