//! Release pipeline orchestration
//!
//! [`PluginDownloader`] is the main entry point of the crate. It accepts
//! structured plugin pages, registers releases and their artifacts, and drives
//! each release through the pipeline:
//!
//! ```text
//! Pending -> Downloading -> [Extracting] -> Archiving -> Done
//!                 |              |              |
//!                 v              v              | (state preserved,
//!              Failed         Failed            |  re-run retries)
//! ```
//!
//! Every stage is idempotent, so a release can be re-run from any non-Done
//! state: materialized artifacts are skipped, extraction deduplicates its
//! registrations, and the archive attach commits at most once.

use crate::archive::{ArchiveBuilder, ArchiveOutcome};
use crate::build::BuildComposer;
use crate::config::Config;
use crate::db::{Database, NewArtifact, NewRelease, Release};
use crate::error::{Error, PipelineError, Result};
use crate::fetcher::Fetcher;
use crate::runtime::RuntimeDownloader;
use crate::source::PluginSource;
use crate::store::FileStore;
use crate::types::{ArtifactKind, Event, PluginPage, ReleaseId, ReleaseState};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod download_stage;
mod extract_stage;

pub use download_stage::StageReport;
pub use extract_stage::ExtractReport;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Main plugin mirroring pipeline
///
/// Cheap to clone; all clones share the same database pool, store, and event
/// channel.
#[derive(Clone)]
pub struct PluginDownloader {
    db: Database,
    store: FileStore,
    fetcher: Fetcher,
    archiver: ArchiveBuilder,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    download_semaphore: Arc<Semaphore>,
    accepting_new: Arc<AtomicBool>,
    active: Arc<Mutex<HashMap<ReleaseId, CancellationToken>>>,
}

impl PluginDownloader {
    /// Create a pipeline from configuration, opening (and migrating) the
    /// database and rooting the store at the configured content root.
    pub async fn new(config: Config) -> Result<Self> {
        let db = Database::new(config.database_path()).await?;
        let store = FileStore::new(config.content_root().clone());
        let fetcher = Fetcher::new(&config.fetch)?;
        let archiver = ArchiveBuilder::new(db.clone(), store.clone());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let download_semaphore = Arc::new(Semaphore::new(config.fetch.max_concurrent_downloads));

        Ok(Self {
            db,
            store,
            fetcher,
            archiver,
            config: Arc::new(config),
            event_tx,
            download_semaphore,
            accepting_new: Arc::new(AtomicBool::new(true)),
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Subscribe to pipeline lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The database handle (for inspection and ad-hoc queries)
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The file store over the content root
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// A runtime downloader sharing this pipeline's store and event channel
    pub fn runtime_downloader(&self) -> RuntimeDownloader {
        RuntimeDownloader::new(
            self.db.clone(),
            self.store.clone(),
            self.fetcher.clone(),
            self.event_tx.clone(),
        )
    }

    /// Mirror every runtime build named in the configuration
    pub async fn sync_runtimes(&self) -> Result<usize> {
        self.runtime_downloader().sync(&self.config.runtimes).await
    }

    /// A build composer sharing this pipeline's database, store, and event
    /// channel
    pub fn build_composer(&self) -> BuildComposer {
        BuildComposer::new(self.db.clone(), self.store.clone(), self.event_tx.clone())
    }

    /// Register a release from a structured plugin page.
    ///
    /// Idempotent on (plugin_id, version): resubmitting a known release
    /// returns its existing ID and registers any links the first submission
    /// did not carry. The submitted release becomes its plugin's latest.
    pub async fn submit(&self, page: &PluginPage) -> Result<ReleaseId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let release_id = match self.db.find_release(&page.plugin_id, &page.version).await? {
            Some(existing) => {
                debug!(
                    release_id = existing.id,
                    plugin_id = %page.plugin_id,
                    version = %page.version,
                    "release already registered"
                );
                existing.release_id()
            }
            None => {
                let id = self
                    .db
                    .insert_release(&NewRelease {
                        plugin_id: page.plugin_id.clone(),
                        version: page.version.clone(),
                        name: page.name.clone(),
                        author: page.author.clone(),
                        category: page.category.clone(),
                        game: page.game.clone(),
                        source_url: page.url.clone(),
                        is_latest: false,
                    })
                    .await?;
                info!(
                    release_id = id.0,
                    plugin_id = %page.plugin_id,
                    version = %page.version,
                    "release registered"
                );
                id
            }
        };

        // The page we were just handed reflects upstream now, so this release
        // is the plugin's latest
        self.db.mark_latest(release_id, &page.plugin_id).await?;

        for link in &page.links {
            self.db
                .register_artifact(&NewArtifact {
                    release_id,
                    name: link.file_name.clone(),
                    kind: link.role.artifact_kind(),
                    remote_url: Some(link.url.clone()),
                })
                .await?;
        }

        self.emit(Event::Queued {
            id: release_id,
            name: page.name.clone(),
            version: page.version.clone(),
        });

        Ok(release_id)
    }

    /// Discover and register every page a source currently publishes
    pub async fn sync_source(&self, source: &dyn PluginSource) -> Result<Vec<ReleaseId>> {
        let mut ids = Vec::new();
        for url in source.discover().await? {
            let page = source.fetch_page(&url).await?;
            ids.push(self.submit(&page).await?);
        }
        Ok(ids)
    }

    /// Drive a release through the pipeline to Done.
    ///
    /// Safe to call again on a partially-completed release; completed work is
    /// skipped. A release already in Done returns immediately. Download and
    /// extraction failures transition the release to Failed; an archive
    /// failure leaves it in Archiving so a re-run retries only that stage.
    ///
    /// At most one run per release is active at a time; the run can be
    /// cancelled mid-flight with [`cancel_release`](Self::cancel_release),
    /// which fails the release (partial files are overwritten on retry).
    pub async fn run_release(&self, id: ReleaseId) -> Result<()> {
        let token = self.register_active(id)?;
        let result = self.run_release_inner(id, &token).await;
        self.lock_active().remove(&id);
        result
    }

    /// Cancel an in-flight run of a release. Returns false when no run of
    /// this release is active.
    pub fn cancel_release(&self, id: ReleaseId) -> bool {
        match self.lock_active().get(&id) {
            Some(token) => {
                info!(release_id = id.0, "cancelling release run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_release_inner(&self, id: ReleaseId, token: &CancellationToken) -> Result<()> {
        let release = self
            .db
            .get_release(id)
            .await?
            .ok_or(Error::Pipeline(PipelineError::ReleaseNotFound { id: id.0 }))?;

        if release.release_state() == ReleaseState::Done {
            debug!(release_id = id.0, "release already done");
            return Ok(());
        }

        // Stage 1: fan-out downloads
        self.db
            .update_release_state(id, ReleaseState::Downloading)
            .await?;
        if let Err(e) = self.download_stage(&release, token).await {
            return self.fail_release(id, ReleaseState::Downloading, e).await;
        }
        if token.is_cancelled() {
            return self
                .fail_release(id, ReleaseState::Downloading, Error::Cancelled(id.0))
                .await;
        }

        // Stage 2: extraction, only when zip attachments were downloaded
        let artifacts = self.db.list_artifacts(id).await?;
        let has_archives = artifacts
            .iter()
            .any(|a| a.artifact_kind() == ArtifactKind::Archive && a.is_materialized());
        if has_archives {
            self.db
                .update_release_state(id, ReleaseState::Extracting)
                .await?;
            if let Err(e) = self.extract_stage(&release).await {
                return self.fail_release(id, ReleaseState::Extracting, e).await;
            }
            if token.is_cancelled() {
                return self
                    .fail_release(id, ReleaseState::Extracting, Error::Cancelled(id.0))
                    .await;
            }
        }

        // Stage 3: build and attach the final archive. Failures here do not
        // transition to Failed: the state stays Archiving and a re-run
        // retries only this stage.
        self.db
            .update_release_state(id, ReleaseState::Archiving)
            .await?;
        self.emit(Event::Archiving { id });

        let fresh = self
            .db
            .get_release(id)
            .await?
            .ok_or(Error::Pipeline(PipelineError::ReleaseNotFound { id: id.0 }))?;
        let outcome = match self.archiver.build(&fresh).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(release_id = id.0, error = %e, "archive stage failed, release stays in Archiving");
                self.emit(Event::ArchiveFailed {
                    id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        let archive_path = match outcome {
            ArchiveOutcome::Built { archive_path, .. } => archive_path,
            ArchiveOutcome::AlreadyExists { archive_path } => archive_path,
        };

        self.db.mark_release_done(id).await?;
        info!(release_id = id.0, archive = ?archive_path, "release complete");
        self.emit(Event::Complete {
            id,
            archive: archive_path,
        });

        Ok(())
    }

    /// Re-submit a Failed release and run it again.
    ///
    /// Only Failed releases can be retried; anything else is an invalid
    /// state for the operation.
    pub async fn retry_release(&self, id: ReleaseId) -> Result<()> {
        let release = self
            .db
            .get_release(id)
            .await?
            .ok_or(Error::Pipeline(PipelineError::ReleaseNotFound { id: id.0 }))?;

        if release.release_state() != ReleaseState::Failed {
            return Err(Error::Pipeline(PipelineError::InvalidState {
                id: id.0,
                operation: "retry".to_string(),
                current_state: release.release_state().to_string(),
            }));
        }

        self.db.update_release_state(id, ReleaseState::Pending).await?;
        info!(release_id = id.0, "release re-submitted after failure");
        self.run_release(id).await
    }

    /// Stop accepting new submissions, cancel active runs, wait for them to
    /// drain, then close the database.
    ///
    /// New `submit` calls fail with [`Error::ShuttingDown`]. Cancelled runs
    /// transition their release to Failed and can be retried after restart.
    pub async fn shutdown(&self) {
        self.accepting_new.store(false, Ordering::SeqCst);
        info!("pipeline shutting down, no longer accepting submissions");

        for token in self.lock_active().values() {
            token.cancel();
        }
        while !self.lock_active().is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.db.close().await;
    }

    /// Register a run of a release, rejecting a second concurrent run
    fn register_active(&self, id: ReleaseId) -> Result<CancellationToken> {
        let mut active = self.lock_active();
        if active.contains_key(&id) {
            return Err(Error::Pipeline(PipelineError::InvalidState {
                id: id.0,
                operation: "run".to_string(),
                current_state: "running".to_string(),
            }));
        }
        let token = CancellationToken::new();
        active.insert(id, token.clone());
        Ok(token)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<ReleaseId, CancellationToken>> {
        // A poisoned lock only means a panicked task; the map is still valid
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Transition a release to Failed, emit the event, and propagate the error
    async fn fail_release(&self, id: ReleaseId, state: ReleaseState, e: Error) -> Result<()> {
        let message = e.to_string();
        self.db.mark_release_failed(id, &message).await?;
        warn!(release_id = id.0, %state, error = %message, "release failed");
        self.emit(Event::Failed {
            id,
            state,
            error: message,
        });
        Err(e)
    }

    /// Broadcast an event; a send error just means nobody is subscribed
    pub(crate) fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }
}

/// Artifact kind an extracted file registers as, derived from its extension
pub(crate) fn extracted_kind(path: &std::path::Path) -> ArtifactKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "smx" => ArtifactKind::CompiledBinary,
        "sp" => ArtifactKind::SourceScript,
        _ => ArtifactKind::Config,
    }
}

impl std::fmt::Debug for PluginDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDownloader")
            .field("content_root", &self.store.root())
            .field("accepting_new", &self.accepting_new.load(Ordering::SeqCst))
            .finish()
    }
}

/// Scratch directory for one archive's extraction, under the release's temp dir
pub(crate) fn extraction_dir(release: &Release, archive_name: &str) -> PathBuf {
    let stem = std::path::Path::new(archive_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(archive_name);
    release.temp_dir().join(stem)
}
