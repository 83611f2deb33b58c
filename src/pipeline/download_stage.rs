//! Download stage: bounded fan-out with a full-report barrier
//!
//! Every pending artifact of a release is dispatched as its own task, bounded
//! by the download semaphore. The stage is a barrier: it waits for every task
//! to report before returning, so a partial failure never hides the outcomes
//! of the artifacts that did succeed.

use crate::db::Release;
use crate::error::{Error, PipelineError, Result};
use crate::fetcher::FetchOutcome;
use crate::types::Event;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::PluginDownloader;

/// Aggregate result of the download stage barrier
#[derive(Clone, Debug, Default)]
pub struct StageReport {
    /// Artifacts fetched in this run
    pub fetched: usize,
    /// Artifacts skipped because they were already materialized
    pub skipped: usize,
    /// Artifacts whose fetch or persist failed
    pub failed: usize,
    /// First captured failure, for the aggregated error message
    pub first_error: Option<String>,
}

impl StageReport {
    /// Artifacts that ended the stage materialized
    pub fn succeeded(&self) -> usize {
        self.fetched + self.skipped
    }

    fn total(&self) -> usize {
        self.fetched + self.skipped + self.failed
    }
}

impl PluginDownloader {
    /// Fetch every artifact of a release in parallel and wait for all of them.
    ///
    /// Returns the aggregate report on full success; any task failure
    /// converts the report into [`PipelineError::DownloadStageFailed`] after
    /// the barrier, never before.
    pub(crate) async fn download_stage(
        &self,
        release: &Release,
        token: &CancellationToken,
    ) -> Result<StageReport> {
        let id = release.release_id();
        // Members discovered during extraction carry no remote URL; they are
        // materialized by the extract stage, not fetched here
        let artifacts: Vec<_> = self
            .db
            .list_artifacts(id)
            .await?
            .into_iter()
            .filter(|a| a.remote_url.is_some())
            .collect();

        self.emit(Event::Downloading {
            id,
            artifact_count: artifacts.len(),
        });
        debug!(
            release_id = release.id,
            artifact_count = artifacts.len(),
            "download fan-out started"
        );

        let mut tasks: JoinSet<(String, Result<FetchOutcome>)> = JoinSet::new();
        for artifact in artifacts {
            let fetcher = self.fetcher.clone();
            let db = self.db.clone();
            let store = self.store.clone();
            let release = release.clone();
            let semaphore = self.download_semaphore.clone();
            let token = token.clone();

            tasks.spawn(async move {
                let name = artifact.name.clone();
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() {
                    return (
                        name,
                        Err(Error::Other("download semaphore closed".to_string())),
                    );
                }
                // Cancellation abandons the fetch; a partial file on disk is
                // overwritten by the retry
                let result = tokio::select! {
                    _ = token.cancelled() => Err(Error::Cancelled(release.id)),
                    result = fetcher.fetch_and_persist(&db, &store, &release, &artifact) => result,
                };
                (name, result)
            });
        }

        // Barrier: collect every outcome before deciding the stage result
        let mut report = StageReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(FetchOutcome::Fetched { storage_path }))) => {
                    report.fetched += 1;
                    self.emit(Event::ArtifactComplete {
                        id,
                        artifact: name,
                        storage_path,
                    });
                }
                Ok((name, Ok(FetchOutcome::SkippedExisting { .. }))) => {
                    report.skipped += 1;
                    debug!(release_id = release.id, artifact = %name, "artifact skipped");
                    self.emit(Event::ArtifactSkipped { id, artifact: name });
                }
                Ok((name, Err(e))) => {
                    report.failed += 1;
                    let message = e.to_string();
                    warn!(release_id = release.id, artifact = %name, error = %message, "artifact failed");
                    if report.first_error.is_none() {
                        report.first_error = Some(message.clone());
                    }
                    self.emit(Event::ArtifactFailed {
                        id,
                        artifact: name,
                        error: message,
                    });
                }
                Err(join_error) => {
                    // Task panicked or was aborted before reporting
                    report.failed += 1;
                    let e = Error::Pipeline(PipelineError::TaskLost {
                        artifact: "unknown".to_string(),
                        reason: join_error.to_string(),
                    });
                    let message = e.to_string();
                    warn!(release_id = release.id, error = %message, "download task lost");
                    if report.first_error.is_none() {
                        report.first_error = Some(message);
                    }
                }
            }
        }

        self.emit(Event::DownloadComplete {
            id,
            succeeded: report.succeeded(),
            failed: report.failed,
        });
        debug!(
            release_id = release.id,
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failed,
            "download barrier complete"
        );

        if report.failed > 0 {
            return Err(Error::Pipeline(PipelineError::DownloadStageFailed {
                id: release.id,
                failed: report.failed,
                total: report.total(),
                first_error: report
                    .first_error
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            }));
        }

        Ok(report)
    }
}
