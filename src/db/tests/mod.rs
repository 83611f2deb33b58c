use crate::db::{Database, NewArtifact, NewRelease, RegisterOutcome};
use crate::types::{ArtifactKind, ReleaseId, ReleaseState};
use std::path::PathBuf;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn test_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("test.db")).await.unwrap();
    (dir, db)
}

fn test_release(plugin_id: &str, version: &str) -> NewRelease {
    NewRelease {
        plugin_id: plugin_id.to_string(),
        version: version.to_string(),
        name: "Fun Commands".to_string(),
        author: "someone".to_string(),
        category: "General Purpose".to_string(),
        game: "Team Fortress 2".to_string(),
        source_url: "https://forums.example.net/showthread.php?p=1".to_string(),
        is_latest: true,
    }
}

fn test_artifact(release_id: ReleaseId, name: &str, kind: ArtifactKind) -> NewArtifact {
    NewArtifact {
        release_id,
        name: name.to_string(),
        kind,
        remote_url: Some(format!("https://files.example.net/{}", name)),
    }
}

// ---------------------------------------------------------------------------
// Releases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_insert_and_get_release() {
    let (_dir, db) = test_db().await;

    let id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();
    let release = db.get_release(id).await.unwrap().unwrap();

    assert_eq!(release.plugin_id, "plugin_fun");
    assert_eq!(release.version, "2.1");
    assert_eq!(release.release_state(), ReleaseState::Pending);
    assert!(release.archive_path.is_none());
    assert!(release.is_latest);
}

#[tokio::test]
async fn test_release_tree_paths() {
    let (_dir, db) = test_db().await;

    let id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();
    let release = db.get_release(id).await.unwrap().unwrap();

    assert_eq!(release.root(), PathBuf::from("plugins/plugin_fun/2.1"));
    assert_eq!(release.files_dir(), PathBuf::from("plugins/plugin_fun/2.1/files"));
    assert_eq!(release.archives_dir(), PathBuf::from("plugins/plugin_fun/2.1/archives"));
    assert_eq!(release.temp_dir(), PathBuf::from("plugins/plugin_fun/2.1/temp"));
    assert_eq!(release.archive_name(), "Fun Commands 2.1.zip");
}

#[tokio::test]
async fn test_find_release_by_plugin_and_version() {
    let (_dir, db) = test_db().await;

    let id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();

    let found = db.find_release("plugin_fun", "2.1").await.unwrap().unwrap();
    assert_eq!(found.id, id.get());
    assert!(db.find_release("plugin_fun", "9.9").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_plugin_version_rejected() {
    let (_dir, db) = test_db().await;

    db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();
    let result = db.insert_release(&test_release("plugin_fun", "2.1")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_state_transitions_and_failure_message() {
    let (_dir, db) = test_db().await;
    let id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();

    db.update_release_state(id, ReleaseState::Downloading).await.unwrap();
    db.mark_release_failed(id, "boom").await.unwrap();

    let failed = db.get_release(id).await.unwrap().unwrap();
    assert_eq!(failed.release_state(), ReleaseState::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("boom"));

    // Re-submitting to Pending clears the error
    db.update_release_state(id, ReleaseState::Pending).await.unwrap();
    let pending = db.get_release(id).await.unwrap().unwrap();
    assert_eq!(pending.release_state(), ReleaseState::Pending);
    assert!(pending.error_message.is_none());
}

#[tokio::test]
async fn test_mark_release_done_stamps_completion() {
    let (_dir, db) = test_db().await;
    let id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();

    db.mark_release_done(id).await.unwrap();

    let done = db.get_release(id).await.unwrap().unwrap();
    assert_eq!(done.release_state(), ReleaseState::Done);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_mark_latest_clears_previous_latest() {
    let (_dir, db) = test_db().await;

    let old = db.insert_release(&test_release("plugin_fun", "2.0")).await.unwrap();
    let new = db.insert_release(&NewRelease {
        is_latest: false,
        ..test_release("plugin_fun", "2.1")
    })
    .await
    .unwrap();

    db.mark_latest(new, "plugin_fun").await.unwrap();

    assert!(!db.get_release(old).await.unwrap().unwrap().is_latest);
    assert!(db.get_release(new).await.unwrap().unwrap().is_latest);
}

#[tokio::test]
async fn test_latest_release_follows_the_flag() {
    let (_dir, db) = test_db().await;
    assert!(db.latest_release("plugin_fun").await.unwrap().is_none());

    let old = db.insert_release(&test_release("plugin_fun", "2.0")).await.unwrap();
    db.mark_latest(old, "plugin_fun").await.unwrap();
    let new = db.insert_release(&NewRelease {
        is_latest: false,
        ..test_release("plugin_fun", "2.1")
    })
    .await
    .unwrap();
    db.mark_latest(new, "plugin_fun").await.unwrap();

    let latest = db.latest_release("plugin_fun").await.unwrap().unwrap();
    assert_eq!(latest.release_id(), new);
    assert_eq!(latest.version, "2.1");
}

#[tokio::test]
async fn test_claim_archive_commits_at_most_once() {
    let (_dir, db) = test_db().await;
    let id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();

    let first = db
        .claim_archive(id, "plugins/plugin_fun/2.1/Fun Commands 2.1.zip", "abc123")
        .await
        .unwrap();
    let second = db
        .claim_archive(id, "plugins/plugin_fun/2.1/other.zip", "def456")
        .await
        .unwrap();

    assert!(first);
    assert!(!second);

    // The losing claim must not have overwritten the committed one
    let release = db.get_release(id).await.unwrap().unwrap();
    assert_eq!(
        release.archive_path.as_deref(),
        Some("plugins/plugin_fun/2.1/Fun Commands 2.1.zip")
    );
    assert_eq!(release.archive_sha256.as_deref(), Some("abc123"));
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_register_artifact_then_duplicate_skip() {
    let (_dir, db) = test_db().await;
    let release_id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();

    let first = db
        .register_artifact(&test_artifact(release_id, "fun.smx", ArtifactKind::CompiledBinary))
        .await
        .unwrap();
    let RegisterOutcome::Created(created_id) = first else {
        panic!("expected Created, got {:?}", first);
    };

    let second = db
        .register_artifact(&test_artifact(release_id, "fun.smx", ArtifactKind::CompiledBinary))
        .await
        .unwrap();
    assert_eq!(second, RegisterOutcome::Duplicate(created_id));

    // Still exactly one row
    assert_eq!(db.list_artifacts(release_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_name_different_kind_is_not_a_duplicate() {
    let (_dir, db) = test_db().await;
    let release_id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();

    db.register_artifact(&test_artifact(release_id, "fun.txt", ArtifactKind::Config))
        .await
        .unwrap();
    let outcome = db
        .register_artifact(&test_artifact(release_id, "fun.txt", ArtifactKind::Archive))
        .await
        .unwrap();

    assert!(matches!(outcome, RegisterOutcome::Created(_)));
    assert_eq!(db.list_artifacts(release_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_set_storage_path_materializes_artifact() {
    let (_dir, db) = test_db().await;
    let release_id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();

    let outcome = db
        .register_artifact(&test_artifact(release_id, "fun.smx", ArtifactKind::CompiledBinary))
        .await
        .unwrap();
    let RegisterOutcome::Created(artifact_id) = outcome else {
        panic!("expected Created");
    };

    let before = db.get_artifact(artifact_id).await.unwrap().unwrap();
    assert!(!before.is_materialized());

    db.set_storage_path(
        artifact_id,
        "plugins/plugin_fun/2.1/files/addons/sourcemod/plugins/fun.smx",
    )
    .await
    .unwrap();

    let after = db.get_artifact(artifact_id).await.unwrap().unwrap();
    assert!(after.is_materialized());
    assert_eq!(after.artifact_kind(), ArtifactKind::CompiledBinary);
}

#[tokio::test]
async fn test_delete_release_cascades_to_artifacts() {
    let (_dir, db) = test_db().await;
    let release_id = db.insert_release(&test_release("plugin_fun", "2.1")).await.unwrap();
    db.register_artifact(&test_artifact(release_id, "fun.smx", ArtifactKind::CompiledBinary))
        .await
        .unwrap();

    db.delete_release(release_id).await.unwrap();

    assert!(db.get_release(release_id).await.unwrap().is_none());
    assert!(db.list_artifacts(release_id).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Runtime builds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_runtime_build_exists_after_insert() {
    let (_dir, db) = test_db().await;

    assert!(!db.runtime_build_exists("sourcemod", "1.12.0").await.unwrap());

    db.insert_runtime_build(
        "sourcemod",
        "1.12.0",
        "runtimes/sourcemod/windows/sm.zip",
        "runtimes/sourcemod/linux/sm.tar.gz",
    )
    .await
    .unwrap();

    assert!(db.runtime_build_exists("sourcemod", "1.12.0").await.unwrap());
    assert!(!db.runtime_build_exists("sourcemod", "1.13.0").await.unwrap());

    let latest = db.latest_runtime_build("sourcemod").await.unwrap().unwrap();
    assert_eq!(latest.version, "1.12.0");
}
