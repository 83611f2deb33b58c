//! Core types for sourcemod-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a release
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(pub i64);

impl ReleaseId {
    /// Create a new ReleaseId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ReleaseId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<ReleaseId> for i64 {
    fn from(id: ReleaseId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ReleaseId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for ReleaseId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ReleaseId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ReleaseId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Unique identifier for an artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub i64);

impl ArtifactId {
    /// Create a new ArtifactId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ArtifactId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl sqlx::Type<sqlx::Sqlite> for ArtifactId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ArtifactId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ArtifactId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Release pipeline state
///
/// `Failed` is reachable from Downloading and Extracting. Archiving failures
/// are treated as transient: the release stays in `Archiving` for retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseState {
    /// Registered and waiting to run
    Pending,
    /// Fan-out downloads in flight
    Downloading,
    /// Unpacking zip attachments and re-routing their members
    Extracting,
    /// Building the final release archive
    Archiving,
    /// Archive attached, release complete
    Done,
    /// Failed with error (re-submittable to Pending)
    Failed,
}

impl ReleaseState {
    /// Convert integer state code to ReleaseState enum
    pub fn from_i32(state: i32) -> Self {
        match state {
            0 => ReleaseState::Pending,
            1 => ReleaseState::Downloading,
            2 => ReleaseState::Extracting,
            3 => ReleaseState::Archiving,
            4 => ReleaseState::Done,
            5 => ReleaseState::Failed,
            _ => ReleaseState::Failed, // Default to Failed for unknown state
        }
    }

    /// Convert ReleaseState enum to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            ReleaseState::Pending => 0,
            ReleaseState::Downloading => 1,
            ReleaseState::Extracting => 2,
            ReleaseState::Archiving => 3,
            ReleaseState::Done => 4,
            ReleaseState::Failed => 5,
        }
    }

    /// Whether the state is terminal (Done or Failed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReleaseState::Done | ReleaseState::Failed)
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReleaseState::Pending => "pending",
            ReleaseState::Downloading => "downloading",
            ReleaseState::Extracting => "extracting",
            ReleaseState::Archiving => "archiving",
            ReleaseState::Done => "done",
            ReleaseState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Kind of file an artifact holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Compiled plugin binary (.smx)
    CompiledBinary,
    /// Plugin source script (.sp)
    SourceScript,
    /// Configuration file (.cfg, loose .txt)
    Config,
    /// Zip attachment payload, extracted in the Extracting stage
    Archive,
}

impl ArtifactKind {
    /// Convert integer kind code to ArtifactKind enum
    pub fn from_i32(kind: i32) -> Self {
        match kind {
            0 => ArtifactKind::CompiledBinary,
            1 => ArtifactKind::SourceScript,
            2 => ArtifactKind::Config,
            3 => ArtifactKind::Archive,
            _ => ArtifactKind::Config, // Default to Config for unknown kind
        }
    }

    /// Convert ArtifactKind enum to integer kind code
    pub fn to_i32(&self) -> i32 {
        match self {
            ArtifactKind::CompiledBinary => 0,
            ArtifactKind::SourceScript => 1,
            ArtifactKind::Config => 2,
            ArtifactKind::Archive => 3,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactKind::CompiledBinary => "compiled-binary",
            ArtifactKind::SourceScript => "source-script",
            ArtifactKind::Config => "config",
            ArtifactKind::Archive => "archive",
        };
        write!(f, "{}", s)
    }
}

/// Role tag on an upstream download link
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkRole {
    /// Plugin source script
    Source,
    /// Compiled plugin binary
    CompiledBinary,
    /// Zip attachment
    Archive,
}

impl LinkRole {
    /// Map an upstream link role to the artifact kind it materializes as
    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            LinkRole::Source => ArtifactKind::SourceScript,
            LinkRole::CompiledBinary => ArtifactKind::CompiledBinary,
            LinkRole::Archive => ArtifactKind::Archive,
        }
    }
}

/// One download link from an upstream plugin page
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadLink {
    /// Role tag assigned by the upstream scraping layer
    pub role: LinkRole,
    /// File name the link resolves to
    pub file_name: String,
    /// Absolute download URL
    pub url: String,
}

/// Structured plugin page supplied by the upstream data source.
///
/// The scraping layer is an external collaborator; this crate only consumes
/// its structured output and never parses HTML.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginPage {
    /// Stable plugin identifier (slug or upstream ID)
    pub plugin_id: String,
    /// Display name
    pub name: String,
    /// Description (may be empty)
    #[serde(default)]
    pub description: String,
    /// Author name
    pub author: String,
    /// Version string of this release
    pub version: String,
    /// Category label
    #[serde(default)]
    pub category: String,
    /// Game the plugin targets
    #[serde(default)]
    pub game: String,
    /// Upstream page URL
    pub url: String,
    /// Download links tagged with roles
    pub links: Vec<DownloadLink>,
}

/// Event emitted during the release pipeline lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Release registered and queued
    Queued {
        /// Release ID
        id: ReleaseId,
        /// Plugin display name
        name: String,
        /// Release version
        version: String,
    },

    /// Download fan-out started
    Downloading {
        /// Release ID
        id: ReleaseId,
        /// Number of artifacts dispatched
        artifact_count: usize,
    },

    /// One artifact was fetched and persisted
    ArtifactComplete {
        /// Release ID
        id: ReleaseId,
        /// Logical artifact name
        artifact: String,
        /// Storage path relative to the content root
        storage_path: PathBuf,
    },

    /// One artifact was skipped because it is already materialized
    ArtifactSkipped {
        /// Release ID
        id: ReleaseId,
        /// Logical artifact name
        artifact: String,
    },

    /// One artifact's fetch or persist failed
    ArtifactFailed {
        /// Release ID
        id: ReleaseId,
        /// Logical artifact name
        artifact: String,
        /// Error message
        error: String,
    },

    /// All fan-out tasks reported; counts are the aggregate barrier result
    DownloadComplete {
        /// Release ID
        id: ReleaseId,
        /// Number of artifacts fetched or skipped
        succeeded: usize,
        /// Number of artifacts that failed
        failed: usize,
    },

    /// Extraction of a zip attachment started
    Extracting {
        /// Release ID
        id: ReleaseId,
        /// Archive filename
        archive: String,
    },

    /// An extracted member had no routing rule and was left in place
    UnroutedFile {
        /// Release ID
        id: ReleaseId,
        /// Path of the unrouted file, relative to the content root
        path: PathBuf,
    },

    /// Extraction and re-routing finished
    ExtractComplete {
        /// Release ID
        id: ReleaseId,
        /// Number of members routed into the release tree
        routed: usize,
        /// Number of members left unrouted
        unrouted: usize,
    },

    /// Final archive build started
    Archiving {
        /// Release ID
        id: ReleaseId,
    },

    /// Final archive build failed; the release stays in Archiving and a
    /// re-run retries only that stage (unlike [`Event::Failed`], which marks
    /// the release Failed)
    ArchiveFailed {
        /// Release ID
        id: ReleaseId,
        /// Error message
        error: String,
    },

    /// Release fully complete with archive attached
    Complete {
        /// Release ID
        id: ReleaseId,
        /// Archive path relative to the content root
        archive: PathBuf,
    },

    /// Release failed at some stage
    Failed {
        /// Release ID
        id: ReleaseId,
        /// State in which the failure occurred
        state: ReleaseState,
        /// Error message
        error: String,
    },

    /// A server build was composed and archived from completed releases
    BuildComposed {
        /// Stable build identifier
        build_id: String,
        /// Build version
        version: String,
        /// Archive path relative to the content root
        archive: PathBuf,
    },

    /// A runtime build snapshot was downloaded and unpacked
    RuntimeBuildComplete {
        /// Runtime name (e.g. "sourcemod")
        runtime: String,
        /// Runtime version
        version: String,
    },
}
