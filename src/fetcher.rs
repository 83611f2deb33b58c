//! Remote artifact fetching and persistence
//!
//! The fetcher is deliberately dumb about failure: a non-2xx status, timeout,
//! or connection error surfaces as a [`FetchError`] and is never retried here.
//! Retry policy belongs to the orchestration layer, which can safely re-dispatch
//! because persistence is write-then-commit: the file is durably written through
//! the store before the artifact row is updated, so a crash between the two
//! leaves the artifact unmaterialized and the retry overwrites the partial file.

use crate::config::FetchConfig;
use crate::db::{Artifact, Database, Release};
use crate::error::{Error, FetchError, Result};
use crate::routing;
use crate::store::FileStore;
use std::path::PathBuf;
use tracing::{debug, info};
use url::Url;

/// Outcome of a fetch+persist for one artifact
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The artifact was fetched and its storage location committed
    Fetched {
        /// Storage path relative to the content root
        storage_path: PathBuf,
    },
    /// The artifact is already materialized; nothing was fetched
    SkippedExisting {
        /// Existing storage path relative to the content root
        storage_path: PathBuf,
    },
}

/// HTTP fetcher with a bounded per-request timeout
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl Fetcher {
    /// Create a fetcher from fetch configuration
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            timeout_secs: config.timeout.as_secs(),
        })
    }

    /// Fetch a remote file, returning its bytes.
    ///
    /// Fails with [`FetchError::Status`] on any non-2xx response and
    /// [`FetchError::Timeout`]/[`FetchError::Request`] on transport failure.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url).map_err(|e| {
            Error::Fetch(FetchError::Request {
                url: url.to_string(),
                reason: format!("invalid URL: {}", e),
            })
        })?;

        debug!(%url, "fetching remote file");

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.classify_transport_error(url, e))?;

        debug!(%url, size = bytes.len(), "fetched remote file");
        Ok(bytes.to_vec())
    }

    /// Fetch one artifact and persist it into its release tree.
    ///
    /// The destination is computed from the artifact's declared kind via the
    /// path resolver. Artifacts that already have a storage location with the
    /// file present on disk are skipped without touching the network.
    pub async fn fetch_and_persist(
        &self,
        db: &Database,
        store: &FileStore,
        release: &Release,
        artifact: &Artifact,
    ) -> Result<FetchOutcome> {
        // Skip-if-present: idempotent re-run support
        if let Some(existing) = &artifact.storage_path {
            let existing_path = PathBuf::from(existing);
            if store.exists(&existing_path) {
                debug!(
                    release_id = release.id,
                    artifact = %artifact.name,
                    "artifact already materialized, skipping fetch"
                );
                return Ok(FetchOutcome::SkippedExisting {
                    storage_path: existing_path,
                });
            }
        }

        let url = artifact.remote_url.as_deref().ok_or_else(|| {
            Error::Fetch(FetchError::MissingUrl {
                name: artifact.name.clone(),
            })
        })?;

        let bytes = self.fetch(url).await?;

        let dest = release
            .root()
            .join(routing::kind_destination(artifact.artifact_kind(), &artifact.name));

        // Durable write first, metadata commit second
        store.write(&dest, &bytes).await?;
        let storage_path = dest.to_string_lossy().to_string();
        db.set_storage_path(artifact.artifact_id(), &storage_path).await?;

        info!(
            release_id = release.id,
            artifact = %artifact.name,
            storage_path = %storage_path,
            size = bytes.len(),
            "artifact persisted"
        );

        Ok(FetchOutcome::Fetched { storage_path: dest })
    }

    /// Map a reqwest transport error to the fetch error taxonomy
    fn classify_transport_error(&self, url: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Fetch(FetchError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout_secs,
            })
        } else {
            Error::Fetch(FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })
        }
    }
}
