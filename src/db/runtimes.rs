//! Runtime build snapshot records.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Database, RuntimeBuild};

impl Database {
    /// Whether a build of this runtime version has already been mirrored
    pub async fn runtime_build_exists(&self, runtime: &str, version: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM runtime_builds WHERE runtime = ? AND version = ?",
        )
        .bind(runtime)
        .bind(version)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to check runtime build: {}",
                e
            )))
        })?;

        Ok(count > 0)
    }

    /// Record a mirrored runtime build
    pub async fn insert_runtime_build(
        &self,
        runtime: &str,
        version: &str,
        windows_path: &str,
        linux_path: &str,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO runtime_builds (runtime, version, windows_path, linux_path, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(runtime)
        .bind(version)
        .bind(windows_path)
        .bind(linux_path)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert runtime build: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Latest recorded build of a runtime, if any
    pub async fn latest_runtime_build(&self, runtime: &str) -> Result<Option<RuntimeBuild>> {
        let row = sqlx::query_as::<_, RuntimeBuild>(
            r#"
            SELECT id, runtime, version, windows_path, linux_path, created_at
            FROM runtime_builds
            WHERE runtime = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(runtime)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get latest runtime build: {}",
                e
            )))
        })?;

        Ok(row)
    }
}
