//! # sourcemod-dl
//!
//! Backend library for mirroring SourceMod plugin releases.
//!
//! Given structured plugin pages from an upstream forum or index, sourcemod-dl
//! downloads each release's files, unpacks zip attachments, routes every file
//! into the canonical `addons/sourcemod/...` deployment layout, and builds a
//! single distributable archive per release. Runtime builds (SourceMod,
//! MetaMod) can be mirrored alongside.
//!
//! ## Design Philosophy
//!
//! sourcemod-dl is designed to be:
//! - **Idempotent end to end** - Every stage converges on re-run; crash
//!   recovery is just running the release again
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Deterministic** - An unchanged release tree rebuilds to a
//!   byte-identical archive
//!
//! ## Quick Start
//!
//! ```no_run
//! use sourcemod_dl::{Config, PluginDownloader, PluginPage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = PluginDownloader::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Pages come from an upstream scraping layer
//!     let page: PluginPage = serde_json::from_str(r#"{
//!         "plugin_id": "plugin_fun",
//!         "name": "Fun Commands",
//!         "author": "someone",
//!         "version": "2.1",
//!         "url": "https://forums.example.net/showthread.php?p=1",
//!         "links": []
//!     }"#)?;
//!
//!     let id = downloader.submit(&page).await?;
//!     downloader.run_release(id).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Release archive construction
pub mod archive;
/// Server build composition
pub mod build;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Remote artifact fetching
pub mod fetcher;
/// Release pipeline orchestration
pub mod pipeline;
/// Path resolution into the deployment layout
pub mod routing;
/// Runtime build mirroring
pub mod runtime;
/// Upstream plugin source seam
pub mod source;
/// File store over the content root
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archive::{ArchiveBuilder, ArchiveOutcome};
pub use build::{BuildComposer, BuildSpec, ComposedBuild};
pub use config::{Config, FetchConfig, RuntimeSource, StorageConfig};
pub use db::{Artifact, Database, NewArtifact, NewRelease, RegisterOutcome, Release, RuntimeBuild};
pub use error::{DatabaseError, Error, FetchError, PipelineError, Result, StoreError};
pub use fetcher::{FetchOutcome, Fetcher};
pub use pipeline::{ExtractReport, PluginDownloader, StageReport};
pub use routing::{Route, kind_destination, resolve};
pub use runtime::{RuntimeDownloader, RuntimeOutcome};
pub use source::{PluginSource, StaticSource};
pub use store::FileStore;
pub use types::{
    ArtifactId, ArtifactKind, DownloadLink, Event, LinkRole, PluginPage, ReleaseId, ReleaseState,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's `shutdown()`
/// method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use sourcemod_dl::{Config, PluginDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = PluginDownloader::new(Config::default()).await?;
///     run_with_shutdown(downloader).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: PluginDownloader) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                None
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGINT handler");
                None
            }
        };

        match (&mut sigterm, &mut sigint) {
            (Some(term), Some(int)) => {
                tokio::select! {
                    _ = term.recv() => tracing::info!("received SIGTERM"),
                    _ = int.recv() => tracing::info!("received SIGINT"),
                }
            }
            (Some(term), None) => {
                term.recv().await;
                tracing::info!("received SIGTERM");
            }
            (None, Some(int)) => {
                int.recv().await;
                tracing::info!("received SIGINT");
            }
            (None, None) => {
                tokio::signal::ctrl_c().await?;
                tracing::info!("received Ctrl+C");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received Ctrl+C");
    }

    downloader.shutdown().await;
    Ok(())
}
