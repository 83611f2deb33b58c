//! Artifact registration and materialization tracking.

use crate::error::DatabaseError;
use crate::types::{ArtifactId, ReleaseId};
use crate::{Error, Result};

use super::{Artifact, Database, NewArtifact, RegisterOutcome};

const ARTIFACT_COLUMNS: &str =
    "id, release_id, name, kind, remote_url, storage_path, created_at";

impl Database {
    /// Register an artifact for a release, deduplicated by (release, kind, name).
    ///
    /// Hitting an existing row returns [`RegisterOutcome::Duplicate`] with the
    /// existing artifact's ID; the row is never modified. This makes both the
    /// scrape path and the extraction path safe to re-run.
    pub async fn register_artifact(&self, artifact: &NewArtifact) -> Result<RegisterOutcome> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO artifacts (release_id, name, kind, remote_url, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(release_id, kind, name) DO NOTHING
            "#,
        )
        .bind(artifact.release_id)
        .bind(&artifact.name)
        .bind(artifact.kind.to_i32())
        .bind(&artifact.remote_url)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to register artifact: {}",
                e
            )))
        })?;

        if result.rows_affected() == 1 {
            return Ok(RegisterOutcome::Created(ArtifactId(
                result.last_insert_rowid(),
            )));
        }

        // Conflict path: look up the existing row
        let existing_id: i64 = sqlx::query_scalar(
            "SELECT id FROM artifacts WHERE release_id = ? AND kind = ? AND name = ?",
        )
        .bind(artifact.release_id)
        .bind(artifact.kind.to_i32())
        .bind(&artifact.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to look up duplicate artifact: {}",
                e
            )))
        })?;

        Ok(RegisterOutcome::Duplicate(ArtifactId(existing_id)))
    }

    /// Get an artifact by ID
    pub async fn get_artifact(&self, id: ArtifactId) -> Result<Option<Artifact>> {
        let row = sqlx::query_as::<_, Artifact>(&format!(
            "SELECT {} FROM artifacts WHERE id = ?",
            ARTIFACT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get artifact: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all artifacts of a release, oldest first
    pub async fn list_artifacts(&self, release_id: ReleaseId) -> Result<Vec<Artifact>> {
        let rows = sqlx::query_as::<_, Artifact>(&format!(
            "SELECT {} FROM artifacts WHERE release_id = ? ORDER BY id ASC",
            ARTIFACT_COLUMNS
        ))
        .bind(release_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list artifacts: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Record an artifact's storage location after its content is durably written.
    ///
    /// Callers must write the file through the store first; this update is the
    /// commit point, so a crash between the two leaves the artifact
    /// unmaterialized and a retry simply overwrites the file.
    pub async fn set_storage_path(&self, id: ArtifactId, storage_path: &str) -> Result<()> {
        sqlx::query("UPDATE artifacts SET storage_path = ? WHERE id = ?")
            .bind(storage_path)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set storage path: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
