use crate::config::{Config, StorageConfig};
use crate::error::{Error, PipelineError};
use crate::pipeline::PluginDownloader;
use crate::source::{PluginSource, StaticSource};
use crate::types::{DownloadLink, Event, LinkRole, PluginPage, ReleaseId, ReleaseState};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn test_pipeline() -> (TempDir, PluginDownloader) {
    let dir = TempDir::new().unwrap();
    let config = Config {
        storage: StorageConfig {
            content_root: dir.path().join("downloads"),
            database_path: dir.path().join("test.db"),
        },
        ..Default::default()
    };
    let pipeline = PluginDownloader::new(config).await.unwrap();
    (dir, pipeline)
}

fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, contents) in members {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn link(role: LinkRole, file_name: &str, server: &MockServer) -> DownloadLink {
    DownloadLink {
        role,
        file_name: file_name.to_string(),
        url: format!("{}/{}", server.uri(), file_name),
    }
}

fn page(links: Vec<DownloadLink>) -> PluginPage {
    PluginPage {
        plugin_id: "plugin_fun".to_string(),
        name: "Fun Commands".to_string(),
        description: "extra admin commands".to_string(),
        author: "someone".to_string(),
        version: "2.1".to_string(),
        category: "General Purpose".to_string(),
        game: "Team Fortress 2".to_string(),
        url: "https://forums.example.net/showthread.php?p=1".to_string(),
        links,
    }
}

async fn mount_file(server: &MockServer, name: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_pipeline_routes_extracts_and_archives() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;

    mount_file(&server, "fun.smx", b"binary".to_vec()).await;
    mount_file(&server, "fun.sp", b"source".to_vec()).await;
    mount_file(
        &server,
        "bundle.zip",
        zip_bytes(&[
            ("extras/more.smx", b"more binary"),
            ("scripting/more.sp", b"more source"),
            ("fun.phrases.txt", b"translations"),
            ("bin/helper.dll", b"unrouteable"),
        ]),
    )
    .await;

    let mut rx = pipeline.subscribe();
    let id = pipeline
        .submit(&page(vec![
            link(LinkRole::CompiledBinary, "fun.smx", &server),
            link(LinkRole::Source, "fun.sp", &server),
            link(LinkRole::Archive, "bundle.zip", &server),
        ]))
        .await
        .unwrap();
    pipeline.run_release(id).await.unwrap();

    let release = pipeline.database().get_release(id).await.unwrap().unwrap();
    assert_eq!(release.release_state(), ReleaseState::Done);
    assert!(release.completed_at.is_some());

    // Direct downloads placed by kind
    let store = pipeline.store();
    let files = Path::new("plugins/plugin_fun/2.1/files");
    assert!(store.exists(&files.join("addons/sourcemod/plugins/fun.smx")));
    assert!(store.exists(&files.join("addons/sourcemod/scripting/fun.sp")));
    assert!(store.exists(Path::new("plugins/plugin_fun/2.1/archives/bundle.zip")));

    // Extracted members routed by extension, regardless of archive layout
    assert!(store.exists(&files.join("addons/sourcemod/plugins/more.smx")));
    assert!(store.exists(&files.join("addons/sourcemod/scripting/more.sp")));
    assert!(store.exists(&files.join("addons/sourcemod/translations/fun.phrases.txt")));

    // The unrouteable member stays in the temp directory
    assert!(store.exists(Path::new(
        "plugins/plugin_fun/2.1/temp/bundle/bin/helper.dll"
    )));
    assert!(!store.exists(&files.join("bin/helper.dll")));

    // Final archive attached with a digest
    assert_eq!(
        release.archive_path.as_deref(),
        Some("plugins/plugin_fun/2.1/Fun Commands 2.1.zip")
    );
    assert!(store.exists(Path::new("plugins/plugin_fun/2.1/Fun Commands 2.1.zip")));
    assert_eq!(release.archive_sha256.map(|s| s.len()), Some(64));

    // Extracted members registered as artifacts: 3 direct + 3 routed
    assert_eq!(pipeline.database().list_artifacts(id).await.unwrap().len(), 6);

    // Lifecycle events in stage order
    let events = drain_events(&mut rx);
    let stage_order: [fn(&Event) -> bool; 7] = [
        |e| matches!(e, Event::Queued { .. }),
        |e| matches!(e, Event::Downloading { .. }),
        |e| matches!(e, Event::DownloadComplete { .. }),
        |e| matches!(e, Event::Extracting { .. }),
        |e| matches!(e, Event::ExtractComplete { .. }),
        |e| matches!(e, Event::Archiving { .. }),
        |e| matches!(e, Event::Complete { .. }),
    ];
    let positions: Vec<usize> = stage_order
        .iter()
        .map(|pred| events.iter().position(|e| pred(e)).expect("missing event"))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    if let Some(Event::ExtractComplete {
        routed, unrouted, ..
    }) = events
        .iter()
        .find(|e| matches!(e, Event::ExtractComplete { .. }))
    {
        assert_eq!(*routed, 3);
        assert_eq!(*unrouted, 1);
    }
}

#[tokio::test]
async fn test_final_archive_contains_only_the_deployable_tree() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;
    mount_file(&server, "fun.smx", b"binary".to_vec()).await;
    mount_file(
        &server,
        "bundle.zip",
        zip_bytes(&[("more.smx", b"more binary")]),
    )
    .await;

    let id = pipeline
        .submit(&page(vec![
            link(LinkRole::CompiledBinary, "fun.smx", &server),
            link(LinkRole::Archive, "bundle.zip", &server),
        ]))
        .await
        .unwrap();
    pipeline.run_release(id).await.unwrap();

    let release = pipeline.database().get_release(id).await.unwrap().unwrap();
    let abs = pipeline
        .store()
        .resolve(Path::new(release.archive_path.as_deref().unwrap()))
        .unwrap();
    let mut archive = zip::ZipArchive::new(std::fs::File::open(abs).unwrap()).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();

    // The downloaded bundle.zip and the temp tree are not members
    assert_eq!(
        names,
        vec![
            "addons/sourcemod/plugins/fun.smx".to_string(),
            "addons/sourcemod/plugins/more.smx".to_string(),
        ]
    );
}

// ---------------------------------------------------------------------------
// Partial failure and retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_partial_download_failure_reports_all_outcomes() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;
    mount_file(&server, "a.smx", b"a".to_vec()).await;
    mount_file(&server, "c.smx", b"c".to_vec()).await;
    // b.smx is not mounted: 404

    let mut rx = pipeline.subscribe();
    let id = pipeline
        .submit(&page(vec![
            link(LinkRole::CompiledBinary, "a.smx", &server),
            link(LinkRole::CompiledBinary, "b.smx", &server),
            link(LinkRole::CompiledBinary, "c.smx", &server),
        ]))
        .await
        .unwrap();

    let err = pipeline.run_release(id).await.unwrap_err();
    match err {
        Error::Pipeline(PipelineError::DownloadStageFailed { failed, total, .. }) => {
            assert_eq!(failed, 1);
            assert_eq!(total, 3);
        }
        other => panic!("expected DownloadStageFailed, got {:?}", other),
    }

    let release = pipeline.database().get_release(id).await.unwrap().unwrap();
    assert_eq!(release.release_state(), ReleaseState::Failed);
    assert!(release.error_message.is_some());

    // The barrier waited for the successes; both are materialized
    let files = Path::new("plugins/plugin_fun/2.1/files/addons/sourcemod/plugins");
    assert!(pipeline.store().exists(&files.join("a.smx")));
    assert!(pipeline.store().exists(&files.join("c.smx")));

    // One failure event, aggregate counts on the barrier event
    let events = drain_events(&mut rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::ArtifactFailed { .. }))
            .count(),
        1
    );
    assert!(events.iter().any(
        |e| matches!(e, Event::DownloadComplete { succeeded: 2, failed: 1, .. })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Failed {
            state: ReleaseState::Downloading,
            ..
        }
    )));
}

#[tokio::test]
async fn test_retry_after_failure_skips_materialized_artifacts() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;
    mount_file(&server, "a.smx", b"a".to_vec()).await;
    // b.smx missing on the first run

    let id = pipeline
        .submit(&page(vec![
            link(LinkRole::CompiledBinary, "a.smx", &server),
            link(LinkRole::CompiledBinary, "b.smx", &server),
        ]))
        .await
        .unwrap();
    pipeline.run_release(id).await.unwrap_err();

    // Upstream recovers
    server.reset().await;
    mount_file(&server, "b.smx", b"b".to_vec()).await;
    // a.smx stays unmounted: a re-fetch of it would now fail, proving the
    // retry skipped it

    let mut rx = pipeline.subscribe();
    pipeline.retry_release(id).await.unwrap();

    let release = pipeline.database().get_release(id).await.unwrap().unwrap();
    assert_eq!(release.release_state(), ReleaseState::Done);

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ArtifactSkipped { artifact, .. } if artifact == "a.smx")));
}

#[tokio::test]
async fn test_retry_after_extraction_does_not_refetch_extracted_members() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;
    mount_file(
        &server,
        "bundle.zip",
        zip_bytes(&[("more.smx", b"more binary"), ("scripting/more.sp", b"src")]),
    )
    .await;

    let id = pipeline
        .submit(&page(vec![link(LinkRole::Archive, "bundle.zip", &server)]))
        .await
        .unwrap();
    pipeline.run_release(id).await.unwrap();

    // Extracted members carry no remote URL but are materialized on disk
    let artifacts = pipeline.database().list_artifacts(id).await.unwrap();
    assert_eq!(artifacts.len(), 3);
    assert!(artifacts
        .iter()
        .filter(|a| a.remote_url.is_none())
        .all(|a| a.storage_path.is_some()));

    // Force a retry of the fully-extracted release; it must converge back to
    // Done without trying to fetch the URL-less members
    pipeline
        .database()
        .mark_release_failed(id, "simulated failure")
        .await
        .unwrap();
    server.reset().await;

    let mut rx = pipeline.subscribe();
    pipeline.retry_release(id).await.unwrap();

    let release = pipeline.database().get_release(id).await.unwrap().unwrap();
    assert_eq!(release.release_state(), ReleaseState::Done);

    // Only the archive entered the fan-out, and it was skipped off disk
    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Downloading { artifact_count: 1, .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::ArtifactFailed { .. })));
}

#[tokio::test]
async fn test_retry_after_partial_extraction_fails_in_the_same_stage() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;
    mount_file(
        &server,
        "good.zip",
        zip_bytes(&[("more.smx", b"more binary")]),
    )
    .await;
    mount_file(&server, "broken.zip", b"not a zip".to_vec()).await;

    let id = pipeline
        .submit(&page(vec![
            link(LinkRole::Archive, "good.zip", &server),
            link(LinkRole::Archive, "broken.zip", &server),
        ]))
        .await
        .unwrap();

    let first = pipeline.run_release(id).await.unwrap_err();
    assert!(matches!(
        first,
        Error::Pipeline(PipelineError::ExtractStageFailed { .. })
    ));

    // The member extracted before the failure is registered and materialized
    let artifacts = pipeline.database().list_artifacts(id).await.unwrap();
    let member = artifacts
        .iter()
        .find(|a| a.name == "more.smx")
        .expect("extracted member registered");
    assert!(member.remote_url.is_none());
    assert!(member.storage_path.is_some());

    // The retry reaches extraction again instead of failing the download
    // stage over the URL-less member
    let second = pipeline.retry_release(id).await.unwrap_err();
    assert!(matches!(
        second,
        Error::Pipeline(PipelineError::ExtractStageFailed { .. })
    ));
}

#[tokio::test]
async fn test_archive_failure_keeps_release_in_archiving() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;
    mount_file(&server, "fun.smx", b"binary".to_vec()).await;

    let id = pipeline
        .submit(&page(vec![link(LinkRole::CompiledBinary, "fun.smx", &server)]))
        .await
        .unwrap();

    // A directory squatting on the archive's path makes the build fail
    let archive_abs = pipeline
        .store()
        .root()
        .join("plugins/plugin_fun/2.1/Fun Commands 2.1.zip");
    std::fs::create_dir_all(&archive_abs).unwrap();

    let mut rx = pipeline.subscribe();
    pipeline.run_release(id).await.unwrap_err();

    // The release stays in Archiving and announces the stage failure without
    // the terminal Failed event
    let release = pipeline.database().get_release(id).await.unwrap().unwrap();
    assert_eq!(release.release_state(), ReleaseState::Archiving);

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ArchiveFailed { .. })));
    assert!(!events.iter().any(|e| matches!(e, Event::Failed { .. })));

    // Clearing the blocker and re-running retries only the archive stage
    std::fs::remove_dir_all(&archive_abs).unwrap();
    pipeline.run_release(id).await.unwrap();
    let release = pipeline.database().get_release(id).await.unwrap().unwrap();
    assert_eq!(release.release_state(), ReleaseState::Done);
}

#[tokio::test]
async fn test_retry_requires_failed_state() {
    let (_dir, pipeline) = test_pipeline().await;
    let id = pipeline.submit(&page(vec![])).await.unwrap();

    let err = pipeline.retry_release(id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Pipeline(PipelineError::InvalidState { .. })
    ));
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_submit_is_idempotent_on_plugin_and_version() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;

    let p = page(vec![link(LinkRole::CompiledBinary, "fun.smx", &server)]);
    let first = pipeline.submit(&p).await.unwrap();
    let second = pipeline.submit(&p).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        pipeline.database().list_artifacts(first).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_rerun_of_done_release_changes_nothing() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;
    mount_file(&server, "fun.smx", b"binary".to_vec()).await;

    let id = pipeline
        .submit(&page(vec![link(LinkRole::CompiledBinary, "fun.smx", &server)]))
        .await
        .unwrap();
    pipeline.run_release(id).await.unwrap();

    let before = pipeline.database().get_release(id).await.unwrap().unwrap();
    pipeline.run_release(id).await.unwrap();
    let after = pipeline.database().get_release(id).await.unwrap().unwrap();

    assert_eq!(after.release_state(), ReleaseState::Done);
    assert_eq!(after.archive_path, before.archive_path);
    assert_eq!(after.archive_sha256, before.archive_sha256);
    assert_eq!(after.completed_at, before.completed_at);
}

#[tokio::test]
async fn test_extraction_rerun_does_not_accumulate_artifacts() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;
    mount_file(
        &server,
        "bundle.zip",
        zip_bytes(&[("more.smx", b"more binary")]),
    )
    .await;

    let id = pipeline
        .submit(&page(vec![link(LinkRole::Archive, "bundle.zip", &server)]))
        .await
        .unwrap();
    pipeline.run_release(id).await.unwrap();

    let release = pipeline.database().get_release(id).await.unwrap().unwrap();
    let count_after_first = pipeline.database().list_artifacts(id).await.unwrap().len();

    // Run the stage again directly; registration must deduplicate
    pipeline.extract_stage(&release).await.unwrap();
    assert_eq!(
        pipeline.database().list_artifacts(id).await.unwrap().len(),
        count_after_first
    );
}

// ---------------------------------------------------------------------------
// Submission surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_submit_marks_release_latest() {
    let (_dir, pipeline) = test_pipeline().await;

    let old = pipeline
        .submit(&PluginPage {
            version: "2.0".to_string(),
            ..page(vec![])
        })
        .await
        .unwrap();
    let new = pipeline.submit(&page(vec![])).await.unwrap();

    let db = pipeline.database();
    assert!(!db.get_release(old).await.unwrap().unwrap().is_latest);
    assert!(db.get_release(new).await.unwrap().unwrap().is_latest);
}

#[tokio::test]
async fn test_sync_source_registers_every_page() {
    let (_dir, pipeline) = test_pipeline().await;
    let source = StaticSource::new(vec![
        page(vec![]),
        PluginPage {
            plugin_id: "plugin_other".to_string(),
            url: "https://forums.example.net/showthread.php?p=2".to_string(),
            ..page(vec![])
        },
    ]);

    let ids = pipeline.sync_source(&source).await.unwrap();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let (_dir, pipeline) = test_pipeline().await;
    pipeline.shutdown().await;

    let err = pipeline.submit(&page(vec![])).await.unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}

#[tokio::test]
async fn test_cancel_fails_the_release_mid_download() {
    let (_dir, pipeline) = test_pipeline().await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.smx"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"binary".as_slice())
                .set_delay(std::time::Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let id = pipeline
        .submit(&page(vec![link(LinkRole::CompiledBinary, "slow.smx", &server)]))
        .await
        .unwrap();

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.run_release(id).await });

    // Wait until the run is registered, then cancel it
    while !pipeline.cancel_release(id) {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::Pipeline(PipelineError::DownloadStageFailed { .. })
    ));

    let release = pipeline.database().get_release(id).await.unwrap().unwrap();
    assert_eq!(release.release_state(), ReleaseState::Failed);
    assert!(release.error_message.unwrap().contains("cancelled"));

    // The run is no longer active
    assert!(!pipeline.cancel_release(id));
}

#[tokio::test]
async fn test_run_unknown_release_is_not_found() {
    let (_dir, pipeline) = test_pipeline().await;
    let err = pipeline.run_release(ReleaseId(999)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Pipeline(PipelineError::ReleaseNotFound { id: 999 })
    ));
}
