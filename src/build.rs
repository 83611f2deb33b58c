//! Server build composition
//!
//! A build bundles the latest completed release of several plugins into one
//! deployable tree under `builds/<build_id>/<version>/files`, then archives
//! that tree. Unlike the per-release pipeline, composition never touches the
//! network: it copies artifacts already materialized by completed releases,
//! so a build can be recomposed at any time from local content alone.

use crate::db::{Database, Release};
use crate::error::{Error, PipelineError, Result};
use crate::routing::{PLUGINS_DIR, SCRIPTING_DIR, TRANSLATIONS_DIR};
use crate::store::FileStore;
use crate::types::{ArtifactKind, Event, ReleaseState};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// What to compose: a named bundle of plugins at a version
#[derive(Clone, Debug)]
pub struct BuildSpec {
    /// Stable build identifier, used as the directory name under `builds/`
    pub build_id: String,
    /// Display name, used in the archive file name
    pub name: String,
    /// Build version
    pub version: String,
    /// Plugins whose latest completed release goes into the build
    pub plugin_ids: Vec<String>,
}

/// Result of composing one build
#[derive(Clone, Debug)]
pub struct ComposedBuild {
    /// Archive path relative to the content root
    pub archive_path: PathBuf,
    /// Number of artifact files copied into the build tree
    pub copied: usize,
}

/// Composes deployable builds from completed plugin releases
#[derive(Clone, Debug)]
pub struct BuildComposer {
    db: Database,
    store: FileStore,
    event_tx: broadcast::Sender<Event>,
}

impl BuildComposer {
    /// Create a build composer
    pub fn new(db: Database, store: FileStore, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            db,
            store,
            event_tx,
        }
    }

    /// Compose a build: copy every deployable artifact of each plugin's
    /// latest completed release into the build tree and archive it.
    ///
    /// Re-composing the same spec overwrites the tree and the archive in
    /// place, so the result always reflects the releases that are latest now.
    /// A plugin without a release is an error; a plugin whose latest release
    /// has not completed the pipeline is an invalid state for composition.
    pub async fn compose(&self, spec: &BuildSpec) -> Result<ComposedBuild> {
        let files_dir = PathBuf::from("builds")
            .join(&spec.build_id)
            .join(&spec.version)
            .join("files");

        let mut copied = 0;
        for plugin_id in &spec.plugin_ids {
            let release = self.latest_done_release(plugin_id).await?;
            copied += self.copy_release_artifacts(&release, &files_dir).await?;
            debug!(
                build_id = %spec.build_id,
                plugin_id = %plugin_id,
                release_id = release.id,
                "plugin composed into build"
            );
        }

        let store = self.store.clone();
        let archive_name = format!("{}-{}.zip", spec.name, spec.version);
        let source_dir = files_dir.clone();
        let dest_dir = PathBuf::from("builds").join(&spec.build_id);
        let archive_path = tokio::task::spawn_blocking(move || {
            store.zip(&archive_name, &source_dir, &dest_dir)
        })
        .await
        .map_err(|e| Error::Other(format!("build archive task failed: {}", e)))??;

        info!(
            build_id = %spec.build_id,
            version = %spec.version,
            copied,
            archive = ?archive_path,
            "build composed"
        );
        let _ = self.event_tx.send(Event::BuildComposed {
            build_id: spec.build_id.clone(),
            version: spec.version.clone(),
            archive: archive_path.clone(),
        });

        Ok(ComposedBuild {
            archive_path,
            copied,
        })
    }

    /// The plugin's latest release, required to be Done
    async fn latest_done_release(&self, plugin_id: &str) -> Result<Release> {
        let release = self
            .db
            .latest_release(plugin_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no release for plugin {}", plugin_id)))?;

        if release.release_state() != ReleaseState::Done {
            return Err(Error::Pipeline(PipelineError::InvalidState {
                id: release.id,
                operation: "compose build from".to_string(),
                current_state: release.release_state().to_string(),
            }));
        }
        Ok(release)
    }

    /// Copy one release's deployable artifacts into the build's files tree,
    /// returning how many were copied
    async fn copy_release_artifacts(&self, release: &Release, files_dir: &Path) -> Result<usize> {
        let mut copied = 0;
        for artifact in self.db.list_artifacts(release.release_id()).await? {
            let Some(storage_path) = &artifact.storage_path else {
                continue;
            };
            let Some(dest) = build_destination(artifact.artifact_kind(), &artifact.name) else {
                continue;
            };
            self.store
                .copy_file(Path::new(storage_path), &files_dir.join(dest))
                .await?;
            copied += 1;
        }
        Ok(copied)
    }
}

/// Where an artifact kind lands inside a build's files tree.
///
/// Zip attachments never ship in a build; their extracted members are
/// registered as artifacts of their own and ship individually.
fn build_destination(kind: ArtifactKind, file_name: &str) -> Option<PathBuf> {
    let dir = match kind {
        ArtifactKind::CompiledBinary => PLUGINS_DIR,
        ArtifactKind::SourceScript => SCRIPTING_DIR,
        ArtifactKind::Config => TRANSLATIONS_DIR,
        ArtifactKind::Archive => return None,
    };
    Some(Path::new(dir).join(file_name))
}
