//! Release CRUD, state transitions, and the archive-attach claim.

use crate::error::DatabaseError;
use crate::types::{ReleaseId, ReleaseState};
use crate::{Error, Result};

use super::{Database, NewRelease, Release};

const RELEASE_COLUMNS: &str = r#"
    id, plugin_id, version, name, author, category, game, source_url,
    is_latest, state, error_message, archive_path, archive_sha256,
    created_at, completed_at
"#;

impl Database {
    /// Insert a new release record in state Pending
    pub async fn insert_release(&self, release: &NewRelease) -> Result<ReleaseId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO releases (
                plugin_id, version, name, author, category, game,
                source_url, is_latest, state, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&release.plugin_id)
        .bind(&release.version)
        .bind(&release.name)
        .bind(&release.author)
        .bind(&release.category)
        .bind(&release.game)
        .bind(&release.source_url)
        .bind(release.is_latest)
        .bind(ReleaseState::Pending.to_i32())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert release: {}",
                e
            )))
        })?;

        Ok(ReleaseId(result.last_insert_rowid()))
    }

    /// Get a release by ID
    pub async fn get_release(&self, id: ReleaseId) -> Result<Option<Release>> {
        let row = sqlx::query_as::<_, Release>(&format!(
            "SELECT {} FROM releases WHERE id = ?",
            RELEASE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get release: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Find a release by (plugin_id, version)
    pub async fn find_release(&self, plugin_id: &str, version: &str) -> Result<Option<Release>> {
        let row = sqlx::query_as::<_, Release>(&format!(
            "SELECT {} FROM releases WHERE plugin_id = ? AND version = ?",
            RELEASE_COLUMNS
        ))
        .bind(plugin_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find release: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// The release currently flagged as a plugin's latest
    pub async fn latest_release(&self, plugin_id: &str) -> Result<Option<Release>> {
        let row = sqlx::query_as::<_, Release>(&format!(
            "SELECT {} FROM releases WHERE plugin_id = ? AND is_latest = 1",
            RELEASE_COLUMNS
        ))
        .bind(plugin_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get latest release: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all releases, newest first
    pub async fn list_releases(&self) -> Result<Vec<Release>> {
        let rows = sqlx::query_as::<_, Release>(&format!(
            "SELECT {} FROM releases ORDER BY created_at DESC",
            RELEASE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list releases: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List releases in a specific state
    pub async fn list_releases_by_state(&self, state: ReleaseState) -> Result<Vec<Release>> {
        let rows = sqlx::query_as::<_, Release>(&format!(
            "SELECT {} FROM releases WHERE state = ? ORDER BY created_at ASC",
            RELEASE_COLUMNS
        ))
        .bind(state.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list releases by state: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Update a release's pipeline state, clearing any previous error
    pub async fn update_release_state(&self, id: ReleaseId, state: ReleaseState) -> Result<()> {
        sqlx::query("UPDATE releases SET state = ?, error_message = NULL WHERE id = ?")
            .bind(state.to_i32())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update release state: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Transition a release to Failed with the captured error message
    pub async fn mark_release_failed(&self, id: ReleaseId, error: &str) -> Result<()> {
        sqlx::query("UPDATE releases SET state = ?, error_message = ? WHERE id = ?")
            .bind(ReleaseState::Failed.to_i32())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark release failed: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Transition a release to Done and stamp completion time
    pub async fn mark_release_done(&self, id: ReleaseId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE releases SET state = ?, error_message = NULL, completed_at = ? WHERE id = ?",
        )
        .bind(ReleaseState::Done.to_i32())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark release done: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Make a release its plugin's latest, clearing the flag on every other
    /// release of the same plugin. Runs in a transaction so at most one
    /// latest row exists per plugin at any point.
    pub async fn mark_latest(&self, id: ReleaseId, plugin_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        sqlx::query("UPDATE releases SET is_latest = 0 WHERE plugin_id = ?")
            .bind(plugin_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear latest flags: {}",
                    e
                )))
            })?;

        sqlx::query("UPDATE releases SET is_latest = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set latest flag: {}",
                    e
                )))
            })?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit latest flag: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Atomically claim the archive slot for a release.
    ///
    /// Returns true if this call attached the archive, false if another
    /// attach already committed. The WHERE guard makes the check-then-act
    /// race safe: at most one claim ever succeeds per release.
    pub async fn claim_archive(
        &self,
        id: ReleaseId,
        archive_path: &str,
        sha256: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE releases
            SET archive_path = ?, archive_sha256 = ?
            WHERE id = ? AND archive_path IS NULL
            "#,
        )
        .bind(archive_path)
        .bind(sha256)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim archive: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a release (cascades to its artifacts)
    pub async fn delete_release(&self, id: ReleaseId) -> Result<()> {
        sqlx::query("DELETE FROM releases WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete release: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
