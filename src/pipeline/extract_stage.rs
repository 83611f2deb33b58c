//! Extraction stage: unpack zip attachments and route their members
//!
//! Each downloaded zip attachment is extracted into the release's temp
//! directory, then every member is routed into the deployable `files/` tree
//! by the path resolver. Members no rule matches stay where they were
//! extracted and are reported as warnings; an unknown file is never an error.
//!
//! Routed members are registered as artifacts of the release (without a
//! remote URL), deduplicated by (release, kind, name), so re-running the
//! stage after a partial failure converges instead of accumulating rows.

use crate::db::{NewArtifact, RegisterOutcome, Release};
use crate::error::{Error, PipelineError, Result};
use crate::routing::{self, Route};
use crate::types::{ArtifactKind, Event};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{PluginDownloader, extracted_kind, extraction_dir};

/// Aggregate result of the extraction stage
#[derive(Clone, Debug, Default)]
pub struct ExtractReport {
    /// Members routed into the deployable tree
    pub routed: usize,
    /// Members no routing rule matched, left in the temp directory
    pub unrouted: usize,
}

impl PluginDownloader {
    /// Extract every downloaded zip attachment of a release and route the
    /// members into the release's `files/` tree.
    pub(crate) async fn extract_stage(&self, release: &Release) -> Result<ExtractReport> {
        let id = release.release_id();
        let mut report = ExtractReport::default();

        let artifacts = self.db.list_artifacts(id).await?;
        for artifact in artifacts {
            if artifact.artifact_kind() != ArtifactKind::Archive {
                continue;
            }
            let Some(storage_path) = artifact.storage_path.clone() else {
                continue;
            };

            self.emit(Event::Extracting {
                id,
                archive: artifact.name.clone(),
            });

            let dest_dir = extraction_dir(release, &artifact.name);
            let extracted = self
                .unzip_attachment(PathBuf::from(storage_path), dest_dir.clone())
                .await
                .map_err(|e| {
                    Error::Pipeline(PipelineError::ExtractStageFailed {
                        id: release.id,
                        reason: e.to_string(),
                    })
                })?;
            debug!(
                release_id = release.id,
                archive = %artifact.name,
                member_count = extracted.len(),
                "attachment extracted"
            );

            for member in extracted {
                // Route on the member's path inside the archive
                let member_rel = member
                    .strip_prefix(&dest_dir)
                    .map_err(|e| {
                        Error::Pipeline(PipelineError::ExtractStageFailed {
                            id: release.id,
                            reason: format!(
                                "extracted member {} escaped its temp directory: {}",
                                member.display(),
                                e
                            ),
                        })
                    })?
                    .to_path_buf();

                match routing::resolve(&member_rel) {
                    Route::Placed(dest) => {
                        let target = release.files_dir().join(&dest);
                        self.store.move_file(&member, &target).await?;

                        let name = dest
                            .file_name()
                            .and_then(|n| n.to_str())
                            .unwrap_or_default()
                            .to_string();
                        let outcome = self
                            .db
                            .register_artifact(&NewArtifact {
                                release_id: id,
                                name,
                                kind: extracted_kind(&dest),
                                remote_url: None,
                            })
                            .await?;
                        // Extracted members are materialized by the move above;
                        // record that so a re-run never tries to fetch them
                        let artifact_id = match outcome {
                            RegisterOutcome::Created(aid) | RegisterOutcome::Duplicate(aid) => aid,
                        };
                        self.db
                            .set_storage_path(artifact_id, &target.to_string_lossy())
                            .await?;
                        report.routed += 1;
                    }
                    Route::Unrouted => {
                        warn!(
                            release_id = release.id,
                            path = ?member,
                            "no routing rule for extracted file, leaving in place"
                        );
                        self.emit(Event::UnroutedFile { id, path: member });
                        report.unrouted += 1;
                    }
                }
            }
        }

        info!(
            release_id = release.id,
            routed = report.routed,
            unrouted = report.unrouted,
            "extraction complete"
        );
        self.emit(Event::ExtractComplete {
            id,
            routed: report.routed,
            unrouted: report.unrouted,
        });

        Ok(report)
    }

    /// Run the blocking unzip on the blocking pool
    async fn unzip_attachment(
        &self,
        archive: PathBuf,
        dest_dir: PathBuf,
    ) -> Result<Vec<PathBuf>> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.unzip(&archive, &dest_dir))
            .await
            .map_err(|e| Error::Other(format!("extraction task failed: {}", e)))?
    }
}
