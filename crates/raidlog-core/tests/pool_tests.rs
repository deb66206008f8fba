mod common;

use common::FakeInvoker;
use raidlog_core::lifecycle::{FileState, StorageLayout};
use raidlog_core::storage::Database;
use raidlog_core::{bulk_import, collect_inputs, IngestService, Pipeline, SilentReporter};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(20);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_service_drains_every_pending_file() {
    let root = tempdir().unwrap();
    let config = common::test_config(root.path(), 3);
    let layout = StorageLayout::new(root.path());
    layout.ensure().unwrap();

    let pending = layout.dir_for(FileState::Pending);
    for i in 0..6 {
        fs::write(pending.join(format!("kill-{:02}.zevtc", i)), format!("trigger:{}", 20000 + i)).unwrap();
    }
    fs::write(pending.join("broken.zevtc"), b"crash").unwrap();
    fs::write(pending.join("late.zevtc"), b"late trigger:31000").unwrap();
    fs::write(pending.join("copy-a.zevtc"), b"trigger:32000").unwrap();
    fs::write(pending.join("copy-b.zevtc"), b"trigger:32000").unwrap();
    fs::write(pending.join("notes.txt"), b"ignored").unwrap();
    let expected = 10;

    let handle = IngestService::start(config.clone(), common::fake(FakeInvoker::by_marker()), CancellationToken::new())
        .await
        .unwrap();
    assert!(handle.wait_for(expected, WAIT).await);
    let stats = handle.shutdown().await;

    assert_eq!(stats.finished(), expected);
    assert_eq!(stats.imported, 7);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.released, 0);

    // Only the unrecognized file is left behind.
    assert_eq!(common::files_in(pending), vec![pending.join("notes.txt")]);
    assert!(common::files_in(layout.dir_for(FileState::Processing)).is_empty());

    let failed = common::files_in(layout.dir_for(FileState::Failed));
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().any(|p| p.to_string_lossy().ends_with("broken.zevtc.error.txt")));

    let completed = layout.dir_for(FileState::Completed);
    assert_eq!(common::count_files_recursive(&completed.join("2024").join("03")), 7 * 3);

    let db = Database::open(&config.database_path()).unwrap();
    assert_eq!(db.count_encounters().unwrap(), 7);
    let work = root.path().join("work");
    assert!(common::files_in(&work).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_recovers_orphans_on_start() {
    let root = tempdir().unwrap();
    let config = common::test_config(root.path(), 1);
    let layout = StorageLayout::new(root.path());
    layout.ensure().unwrap();

    let processing = layout.dir_for(FileState::Processing);
    fs::write(processing.join("orphan.zevtc"), b"trigger:17172").unwrap();
    fs::write(processing.join("orphan_kill.json"), b"{}").unwrap();

    let handle = IngestService::start(config.clone(), common::fake(FakeInvoker::by_marker()), CancellationToken::new())
        .await
        .unwrap();
    assert!(handle.wait_for(1, WAIT).await);
    let stats = handle.shutdown().await;

    assert_eq!(stats.imported, 1);
    assert!(common::files_in(processing).is_empty());
    assert!(common::files_in(layout.pending_dir()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_returns_in_flight_file_to_pending() {
    let root = tempdir().unwrap();
    let config = common::test_config(root.path(), 1);
    let layout = StorageLayout::new(root.path());
    layout.ensure().unwrap();
    let input = layout.pending_dir().join("slow.zevtc");
    fs::write(&input, b"trigger:15438").unwrap();

    let invoker = FakeInvoker::by_marker().with_delay(Duration::from_secs(60));
    let handle = IngestService::start(config.clone(), common::fake(invoker), CancellationToken::new())
        .await
        .unwrap();

    // Wait for the worker to take the file.
    let processing = layout.dir_for(FileState::Processing).join("slow.zevtc");
    let deadline = tokio::time::Instant::now() + WAIT;
    while !processing.exists() {
        assert!(tokio::time::Instant::now() < deadline, "file was never claimed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stats = tokio::time::timeout(Duration::from_secs(10), handle.shutdown())
        .await
        .expect("shutdown should not wait for the parser");
    assert_eq!(stats.released, 1);
    assert_eq!(stats.finished(), 0);
    assert!(input.exists());
    assert!(!processing.exists());
    assert!(common::files_in(layout.dir_for(FileState::Failed)).is_empty());

    let db = Database::open(&config.database_path()).unwrap();
    assert_eq!(db.count_encounters().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_moved_into_pending_is_picked_up() {
    let root = tempdir().unwrap();
    let config = common::test_config(root.path(), 2);
    let layout = StorageLayout::new(root.path());

    let handle = IngestService::start(config.clone(), common::fake(FakeInvoker::by_marker()), CancellationToken::new())
        .await
        .unwrap();

    let outside = root.path().join("incoming.zevtc");
    fs::write(&outside, b"trigger:16202").unwrap();
    fs::rename(&outside, layout.pending_dir().join("incoming.zevtc")).unwrap();

    assert!(handle.wait_for(1, WAIT).await);
    let stats = handle.shutdown().await;
    assert_eq!(stats.imported, 1);
    assert!(common::files_in(layout.pending_dir()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_directory_enqueue_feeds_running_service() {
    let root = tempdir().unwrap();
    let source = tempdir().unwrap();
    fs::create_dir_all(source.path().join("Wing 1")).unwrap();
    fs::write(source.path().join("Wing 1").join("vg.zevtc"), b"trigger:15438").unwrap();
    fs::write(source.path().join("gors.evtc"), b"trigger:15429").unwrap();
    fs::write(source.path().join("screenshot.png"), b"png").unwrap();

    let config = common::test_config(root.path(), 2);
    let handle = IngestService::start(config.clone(), common::fake(FakeInvoker::by_marker()), CancellationToken::new())
        .await
        .unwrap();

    // Driven from a detached control, the way a signal handler would.
    let control = handle.control();
    let source_dir = source.path().to_path_buf();
    let summary = tokio::spawn(async move { control.enqueue_directory(source_dir).await })
        .await
        .unwrap()
        .unwrap()
        .expect("no other scan is running");
    assert_eq!(summary.copied, 2);

    assert!(handle.wait_for(2, WAIT).await);
    let stats = handle.shutdown().await;
    assert_eq!(stats.imported, 2);
    // The source folder is left as it was.
    assert_eq!(common::count_files_recursive(source.path()), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulk_import_summarizes_and_leaves_sources() {
    let root = tempdir().unwrap();
    let source = tempdir().unwrap();
    for i in 0..4 {
        fs::write(source.path().join(format!("k{}.zevtc", i)), format!("trigger:{}", 21000 + i)).unwrap();
    }
    fs::write(source.path().join("again.zevtc"), b"trigger:21000").unwrap();
    fs::write(source.path().join("bad.zevtc"), b"crash").unwrap();
    fs::write(source.path().join("readme.txt"), b"x").unwrap();

    let config = common::test_config(root.path(), 2);
    let pipeline = Arc::new(Pipeline::from_config(&config, common::fake(FakeInvoker::by_marker())));
    pipeline.prepare().unwrap();

    let files = collect_inputs(&[source.path().to_path_buf()], &config.extensions);
    assert_eq!(files.len(), 6);

    let summary = bulk_import(
        pipeline.clone(),
        files,
        3,
        Arc::new(SilentReporter),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(summary.imported, 4);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].0.ends_with("bad.zevtc"));
    assert_eq!(summary.total(), 6);

    let layout = pipeline.layout();
    assert!(common::files_in(layout.dir_for(FileState::Processing)).is_empty());
    assert!(common::files_in(layout.pending_dir()).is_empty());
    assert_eq!(common::count_files_recursive(source.path()), 7);

    let stored = common::files_in(&layout.dir_for(FileState::Completed).join("2024").join("03"));
    assert_eq!(stored.len(), 4);
    for dir in stored {
        let names: Vec<String> = common::files_in(&dir)
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names.iter().filter(|n| n.ends_with(".zevtc")).count(), 1, "{:?}", names);
        assert!(names.iter().any(|n| n.ends_with("_fake.json")), "{:?}", names);
    }
}

#[tokio::test]
async fn test_bulk_import_after_cancel_imports_nothing() {
    let root = tempdir().unwrap();
    let source = tempdir().unwrap();
    fs::write(source.path().join("a.zevtc"), b"trigger:1").unwrap();
    fs::write(source.path().join("b.zevtc"), b"trigger:2").unwrap();

    let config = common::test_config(root.path(), 1);
    let pipeline = Arc::new(Pipeline::from_config(&config, common::fake(FakeInvoker::by_marker())));
    pipeline.prepare().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let files = collect_inputs(&[source.path().to_path_buf()], &config.extensions);
    let summary = bulk_import(pipeline.clone(), files, 2, Arc::new(SilentReporter), cancel).await;

    assert_eq!(summary.cancelled, 2);
    assert_eq!(summary.imported, 0);
    assert!(common::files_in(pipeline.layout().dir_for(FileState::Processing)).is_empty());
}
