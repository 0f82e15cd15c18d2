use std::fs;
use std::sync::Arc;

use tempfile::tempdir;
use url::Url;
use vibevault::error_codes::{has_code, SESSION_CLOSED};
use vibevault::ingest::ingest_upload;
use vibevault::platform::HeadlessPlatform;
use vibevault::resource::MemoryResourceHost;
use vibevault::session::{PlaybackEnvironment, PlaybackSession, SessionOptions, SessionState};
use vibevault::{FileResourceHost, JsonRecordStore, Normalizer, RecordStore};

fn html_files(dir: &std::path::Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "html"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn file_backed_session_cleans_up_every_restart() {
    let dir = tempdir().expect("tempdir should create");
    let cache = dir.path().join("cache");
    let platform = Arc::new(HeadlessPlatform::new());
    platform.set_now(42);

    let store = Arc::new(JsonRecordStore::new(dir.path().join("library.json")));
    let record = ingest_upload(
        &Normalizer::default(),
        platform.as_ref(),
        "export default function Runner(){return null}",
        "runner.jsx",
    );
    store.save(&record).expect("record should save");

    let host = Arc::new(FileResourceHost::new(&cache).expect("host should init"));
    let env = PlaybackEnvironment::new(host, platform.clone(), store.clone()).with_options(
        SessionOptions {
            confirm_restart: false,
            ..SessionOptions::default()
        },
    );
    let session = PlaybackSession::launch(record.clone(), env)
        .await
        .expect("launch should succeed");
    assert_eq!(html_files(&cache), 1);

    let first = session.current_resource().expect("resource assigned");
    let second = session
        .restart()
        .await
        .expect("restart should succeed")
        .expect("confirmation is disabled");
    assert_ne!(first.url, second.url);
    assert_eq!(second.generation, first.generation + 1);
    assert_eq!(html_files(&cache), 1, "old document should be removed");
    assert!(platform.prompts().is_empty());

    let path = Url::parse(&second.url)
        .expect("url parses")
        .to_file_path()
        .expect("file url");
    assert_eq!(
        fs::read_to_string(&path).expect("document readable"),
        record.content
    );

    let stored = store.get(&record.id).expect("record persisted");
    assert_eq!(stored.last_played, Some(42));
    assert_eq!(stored.content, record.content);

    session.close();
    assert_eq!(html_files(&cache), 0);
}

#[tokio::test]
async fn close_right_after_start_leaves_no_live_handles() {
    let host = Arc::new(MemoryResourceHost::new());
    let platform = Arc::new(HeadlessPlatform::new());
    let record = ingest_upload(
        &Normalizer::default(),
        platform.as_ref(),
        "<!DOCTYPE html><title>Slow</title>",
        "slow.html",
    );
    let store = Arc::new(vibevault::MemoryRecordStore::with_records([record.clone()]));
    host.pause();

    let session = Arc::new(PlaybackSession::new(
        record,
        PlaybackEnvironment::new(host.clone(), platform, store),
    ));
    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    while host.pending_count() == 0 {
        tokio::task::yield_now().await;
    }
    session.close();
    host.resume();

    let error = pending
        .await
        .expect("start task should not panic")
        .expect_err("closed session should not report success");
    assert!(has_code(&error, SESSION_CLOSED));
    assert_eq!(host.created_count(), 1);
    assert_eq!(host.live_count(), 0);
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn dropping_the_last_handle_closes_the_session() {
    let host = Arc::new(MemoryResourceHost::new());
    let platform = Arc::new(HeadlessPlatform::new());
    let record = ingest_upload(
        &Normalizer::default(),
        platform.as_ref(),
        "<!DOCTYPE html><title>Drop</title>",
        "drop.html",
    );
    let store = Arc::new(vibevault::MemoryRecordStore::with_records([record.clone()]));
    let session = PlaybackSession::launch(
        record,
        PlaybackEnvironment::new(host.clone(), platform, store),
    )
    .await
    .expect("launch should succeed");
    assert_eq!(host.live_count(), 1);

    drop(session);
    assert_eq!(host.live_count(), 0);
    assert_eq!(host.released_count(), 1);
}
