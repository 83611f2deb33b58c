//! Runtime build mirroring
//!
//! Mirrors server runtime snapshots (SourceMod, MetaMod) alongside plugin
//! releases. Each configured runtime version is fetched once per platform,
//! persisted under `runtimes/`, unpacked under `builds/`, and recorded so a
//! later sync with the same version is a skip.

use crate::config::RuntimeSource;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::store::FileStore;
use crate::types::Event;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Outcome of mirroring one runtime build
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeOutcome {
    /// Both platform builds were fetched, unpacked, and recorded
    Mirrored,
    /// This runtime version is already recorded; nothing was fetched
    SkippedExisting,
}

/// Downloads and unpacks runtime build snapshots
#[derive(Clone, Debug)]
pub struct RuntimeDownloader {
    db: Database,
    store: FileStore,
    fetcher: Fetcher,
    event_tx: broadcast::Sender<Event>,
}

impl RuntimeDownloader {
    /// Create a runtime downloader
    pub fn new(
        db: Database,
        store: FileStore,
        fetcher: Fetcher,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            db,
            store,
            fetcher,
            event_tx,
        }
    }

    /// Mirror every configured runtime, returning how many were new
    pub async fn sync(&self, sources: &[RuntimeSource]) -> Result<usize> {
        let mut mirrored = 0;
        for source in sources {
            if self.mirror(source).await? == RuntimeOutcome::Mirrored {
                mirrored += 1;
            }
        }
        Ok(mirrored)
    }

    /// Mirror one runtime build: windows zip plus linux tarball.
    ///
    /// The version is the idempotency key; an already-recorded (runtime,
    /// version) pair is skipped without touching the network.
    pub async fn mirror(&self, source: &RuntimeSource) -> Result<RuntimeOutcome> {
        if self
            .db
            .runtime_build_exists(&source.name, &source.version)
            .await?
        {
            debug!(
                runtime = %source.name,
                version = %source.version,
                "runtime build already mirrored, skipping"
            );
            return Ok(RuntimeOutcome::SkippedExisting);
        }

        let windows_path = self
            .mirror_platform(source, "windows", &source.windows_url)
            .await?;
        let linux_path = self
            .mirror_platform(source, "linux", &source.linux_url)
            .await?;

        self.db
            .insert_runtime_build(
                &source.name,
                &source.version,
                &windows_path.to_string_lossy(),
                &linux_path.to_string_lossy(),
            )
            .await?;

        info!(
            runtime = %source.name,
            version = %source.version,
            "runtime build mirrored"
        );
        let _ = self.event_tx.send(Event::RuntimeBuildComplete {
            runtime: source.name.clone(),
            version: source.version.clone(),
        });

        Ok(RuntimeOutcome::Mirrored)
    }

    /// Fetch one platform's build, persist the archive, and unpack it.
    /// Returns the persisted archive's root-relative path.
    async fn mirror_platform(
        &self,
        source: &RuntimeSource,
        platform: &str,
        url: &str,
    ) -> Result<PathBuf> {
        let file_name = archive_file_name(url, &source.name, &source.version, platform);
        let archive_rel = PathBuf::from("runtimes")
            .join(&source.name)
            .join(platform)
            .join(&file_name);
        let build_dir = PathBuf::from("builds").join(&source.name).join(platform);

        let bytes = self.fetcher.fetch(url).await?;
        self.store.write(&archive_rel, &bytes).await?;

        let store = self.store.clone();
        let archive = archive_rel.clone();
        let is_tarball = file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz");
        tokio::task::spawn_blocking(move || {
            if is_tarball {
                store.unpack_tarball(&archive, &build_dir)
            } else {
                store.unzip(&archive, &build_dir).map(|_| ())
            }
        })
        .await
        .map_err(|e| Error::Other(format!("runtime unpack task failed: {}", e)))??;

        debug!(
            runtime = %source.name,
            platform,
            archive = ?archive_rel,
            "runtime platform build unpacked"
        );
        Ok(archive_rel)
    }
}

/// Archive file name from the URL's last path segment, with a synthesized
/// fallback for URLs that don't end in a file name
fn archive_file_name(url: &str, name: &str, version: &str, platform: &str) -> String {
    let from_url = url::Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|segments| segments.last().map(|s| s.to_string()))
            .filter(|s| !s.is_empty())
    });

    from_url.unwrap_or_else(|| {
        let ext = if platform == "linux" { "tar.gz" } else { "zip" };
        format!("{}-{}-{}.{}", name, version, platform, ext)
    })
}
