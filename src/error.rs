//! Error types for sourcemod-dl
//!
//! This module provides error handling for the library:
//! - Domain-specific error types (Fetch, Store, Pipeline, Database)
//! - Contextual information (release ID, file path, stage) on every variant
//!
//! Outcomes that are expected parts of an idempotent re-run — a duplicate artifact,
//! an archive that already exists, a file with no routing rule — are NOT errors.
//! They are modeled as outcome enums in the modules that produce them.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sourcemod-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sourcemod-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "content_root")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Remote fetch error (HTTP status, timeout, connection failure)
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// File store error (traversal, zip/unzip, move/copy)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Pipeline-level error (stage failures, invalid state transitions)
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Release or artifact not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new releases
    #[error("shutdown in progress: not accepting new releases")]
    ShuttingDown,

    /// Release run was cancelled
    #[error("release {0} cancelled")]
    Cancelled(i64),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Remote fetch errors
///
/// The fetcher never retries; transient failures surface here and the
/// orchestration layer above decides whether to re-run the release.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-2xx status
    #[error("unexpected status {status} fetching {url}")]
    Status {
        /// The URL that was requested
        url: String,
        /// The HTTP status code returned
        status: u16,
    },

    /// Request failed before a response arrived (DNS, connect, TLS)
    #[error("request to {url} failed: {reason}")]
    Request {
        /// The URL that was requested
        url: String,
        /// Underlying failure description
        reason: String,
    },

    /// Request exceeded the configured timeout
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// The URL that was requested
        url: String,
        /// The configured timeout in seconds
        timeout_secs: u64,
    },

    /// The artifact has no remote origin locator to fetch from
    #[error("artifact {name} has no download URL")]
    MissingUrl {
        /// Logical name of the artifact
        name: String,
    },
}

/// File store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path escapes the content root — always fatal, never suppressed.
    /// Indicates a bug or malicious input in file naming.
    #[error("path traversal rejected: {path}")]
    PathTraversal {
        /// The offending path
        path: PathBuf,
    },

    /// File move/rename failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path of the file being moved
        source_path: PathBuf,
        /// The destination path where the file should be moved
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// Archive extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// Archive creation failed
    #[error("failed to build archive {archive}: {reason}")]
    ArchiveFailed {
        /// The archive file that failed to build
        archive: PathBuf,
        /// The reason archiving failed
        reason: String,
    },

    /// Invalid path encountered (not traversal, e.g. no file name component)
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The invalid path that was encountered
        path: PathBuf,
        /// The reason the path is invalid
        reason: String,
    },
}

/// Pipeline-level errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Release not found in database
    #[error("release {id} not found")]
    ReleaseNotFound {
        /// The release ID that was not found
        id: i64,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} release {id} in state {current_state}")]
    InvalidState {
        /// The release ID that is in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "retry", "cancel")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },

    /// One or more download tasks failed; all outcomes are preserved
    #[error(
        "download stage failed for release {id}: {failed} of {total} artifacts failed (first error: {first_error})"
    )]
    DownloadStageFailed {
        /// The release whose download stage failed
        id: i64,
        /// Number of artifacts that failed
        failed: usize,
        /// Total number of artifacts dispatched
        total: usize,
        /// First captured task error, for operator visibility
        first_error: String,
    },

    /// Extraction stage failed
    #[error("extract stage failed for release {id}: {reason}")]
    ExtractStageFailed {
        /// The release whose extract stage failed
        id: i64,
        /// The reason extraction failed
        reason: String,
    },

    /// A fan-out task panicked or was aborted before reporting
    #[error("task for artifact {artifact} did not report: {reason}")]
    TaskLost {
        /// Logical name of the artifact whose task was lost
        artifact: String,
        /// Join error description
        reason: String,
    },
}
