mod common;

use common::{FakeInvoker, LogBuilder};
use raidlog_core::importer::{ImportOutcome, SkipReason};
use raidlog_core::lifecycle::{FileState, StorageLayout};
use raidlog_core::pipeline::{FileOutcome, Pipeline};
use raidlog_core::storage::Database;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[test]
fn test_import_is_idempotent_per_hash() {
    let mut db = Database::open_in_memory().unwrap();
    let importer = common::importer();
    let log = LogBuilder::new(15438, "Vale Guardian")
        .player("Alpha.1234", 20000.0)
        .parsed();

    let first = common::import(&importer, &mut db, "same-bytes", &log);
    let id = common::imported_id(&first);
    let second = common::import(&importer, &mut db, "same-bytes", &log);

    match second {
        ImportOutcome::Duplicate { encounter_id } => assert_eq!(encounter_id, id),
        other => panic!("expected duplicate, got {:?}", other),
    }
    assert_eq!(db.count_encounters().unwrap(), 1);
    assert_eq!(db.results_for_encounter(id).unwrap().len(), 1);

    let hash = raidlog_core::hasher::content_hash(b"same-bytes");
    let stored = db.find_encounter_by_hash(&hash).unwrap().unwrap();
    assert_eq!(stored.id, id);
}

#[test]
fn test_skips_late_start_and_ignored_events() {
    let mut db = Database::open_in_memory().unwrap();
    let importer = common::importer();

    let late = LogBuilder::new(15438, "Vale Guardian").late_start().parsed();
    assert!(matches!(
        common::import(&importer, &mut db, "late", &late),
        ImportOutcome::Skipped(SkipReason::LateStart)
    ));

    let race = LogBuilder::new(0, "Spirit Race").parsed();
    assert!(matches!(
        common::import(&importer, &mut db, "race", &race),
        ImportOutcome::Skipped(SkipReason::Ignored(_))
    ));

    let statue = LogBuilder::new(19691, "Statue of Darkness").parsed();
    assert!(matches!(
        common::import(&importer, &mut db, "statue", &statue),
        ImportOutcome::Skipped(SkipReason::Ignored(_))
    ));

    // Same event, but a sub-encounter that is tracked on its own.
    let broken_king = LogBuilder::new(19691, "Broken King").parsed();
    common::imported_id(&common::import(&importer, &mut db, "bk", &broken_king));

    assert_eq!(db.count_encounters().unwrap(), 1);
    assert!(db.all_notifications().unwrap().iter().all(|n| n.kind == "first_kill"));
}

#[test]
fn test_encounter_players_and_mechanics_are_persisted() {
    let mut db = Database::open_in_memory().unwrap();
    let importer = common::importer();
    let log = LogBuilder::new(16235, "Keep Construct")
        .cm()
        .duration_ms(245_500)
        .upload_link("https://dps.report/abcd-20240301-201500_kc")
        .player_with_boons("Alpha.1234", 31000.5, 45.0, 0.0)
        .player("Beta.5678", 12000.0)
        .mechanic("Orb Push", "Alpha Character", 5_000)
        .mechanic("Orb Push", "Construct Core", 6_000)
        .parsed();

    let id = common::imported_id(&common::import(&importer, &mut db, "kc", &log));
    let encounter = db.get_encounter(id).unwrap().unwrap();
    assert_eq!(encounter.fight_name, "Keep Construct");
    assert_eq!(encounter.zone, "Stronghold of the Faithful");
    assert_eq!(encounter.wing, 3);
    assert_eq!(encounter.mode, "cm");
    assert!(encounter.success);
    assert_eq!(encounter.duration_ms, 245_500);
    assert_eq!(encounter.started_at, "2024-03-01T19:15:00.000Z");
    assert_eq!(
        encounter.permalink.as_deref(),
        Some("https://dps.report/abcd-20240301-201500_kc")
    );
    assert!(encounter.storage_path.is_none());

    let results = db.results_for_encounter(id).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].account, "Alpha.1234");
    assert_eq!(results[0].dps, 31000.5);
    assert_eq!(results[0].quickness_generation, 45.0);
    assert_eq!(results[0].healing, Some(0));

    let alpha = db.get_player("Alpha.1234").unwrap().unwrap();
    let events = db.mechanic_events_for_encounter(id).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].player_id, Some(alpha.id));
    assert_eq!(events[1].player_id, None);
    assert_eq!(events[1].actor, "Construct Core");
}

fn pipeline(root: &std::path::Path, invoker: FakeInvoker) -> Arc<Pipeline> {
    let pipeline = Arc::new(Pipeline::new(
        StorageLayout::new(root),
        common::fake(invoker),
        common::importer(),
        root.join("raidlog.db"),
    ));
    pipeline.prepare().unwrap();
    pipeline
}

#[tokio::test]
async fn test_pipeline_stores_imports_and_discards_duplicates() {
    let tmp = tempdir().unwrap();
    let pipeline = pipeline(tmp.path(), FakeInvoker::by_marker());
    let layout = pipeline.layout();
    let cancel = CancellationToken::new();

    let first = layout.pending_dir().join("20240301-201500.zevtc");
    let copy = layout.pending_dir().join("renamed.zevtc");
    fs::write(&first, b"trigger:15438 attempt").unwrap();
    fs::write(&copy, b"trigger:15438 attempt").unwrap();

    let owned = layout.claim(&first).unwrap().unwrap();
    let encounter_id = match pipeline.process(owned, &cancel).await {
        FileOutcome::Done(ImportOutcome::Imported { encounter_id, .. }) => encounter_id,
        other => panic!("expected import, got {:?}", other),
    };

    let db = Database::open(pipeline.db_path()).unwrap();
    let encounter = db.get_encounter(encounter_id).unwrap().unwrap();
    let stored = std::path::PathBuf::from(encounter.storage_path.unwrap());
    assert!(stored.starts_with(layout.dir_for(FileState::Completed).join("2024").join("03")));
    assert!(stored.ends_with(&encounter.content_hash));
    assert!(stored.join("20240301-201500.zevtc").exists());
    assert!(stored.join("20240301-201500_fake.json").exists());
    assert!(stored.join("20240301-201500_fake.html").exists());
    assert_eq!(encounter.source_name, "20240301-201500.zevtc");

    let owned = layout.claim(&copy).unwrap().unwrap();
    let outcome = pipeline.process(owned, &cancel).await;
    match outcome {
        FileOutcome::Done(ImportOutcome::Duplicate { encounter_id: dup }) => {
            assert_eq!(dup, encounter_id)
        }
        other => panic!("expected duplicate, got {:?}", other),
    }
    assert!(common::files_in(layout.dir_for(FileState::Processing)).is_empty());
    assert!(common::files_in(layout.pending_dir()).is_empty());
    assert_eq!(db.count_encounters().unwrap(), 1);
}

#[tokio::test]
async fn test_pipeline_routes_tool_failure_to_failed_with_sidecar() {
    let tmp = tempdir().unwrap();
    let pipeline = pipeline(tmp.path(), FakeInvoker::by_marker());
    let layout = pipeline.layout();

    let input = layout.pending_dir().join("broken.zevtc");
    fs::write(&input, b"crash").unwrap();
    let owned = layout.claim(&input).unwrap().unwrap();
    let outcome = pipeline.process(owned, &CancellationToken::new()).await;
    assert!(matches!(outcome, FileOutcome::Failed(ref msg) if msg.contains("fake parser crashed")));

    let failed = common::files_in(layout.dir_for(FileState::Failed));
    assert_eq!(failed.len(), 2);
    let sidecar = failed
        .iter()
        .find(|p| p.to_string_lossy().ends_with(".error.txt"))
        .unwrap();
    let text = fs::read_to_string(sidecar).unwrap();
    assert!(text.contains("fake parser crashed"));
    assert!(text.contains("source: broken.zevtc"));
    assert!(common::files_in(layout.dir_for(FileState::Processing)).is_empty());
}

#[tokio::test]
async fn test_pipeline_discards_skipped_logs() {
    let tmp = tempdir().unwrap();
    let pipeline = pipeline(tmp.path(), FakeInvoker::by_marker());
    let layout = pipeline.layout();

    let input = layout.pending_dir().join("late.zevtc");
    fs::write(&input, b"trigger:15438 late").unwrap();
    let owned = layout.claim(&input).unwrap().unwrap();
    let outcome = pipeline.process(owned, &CancellationToken::new()).await;
    assert!(matches!(
        outcome,
        FileOutcome::Done(ImportOutcome::Skipped(SkipReason::LateStart))
    ));
    assert_eq!(common::count_files_recursive(tmp.path().join("completed").as_path()), 0);
    assert!(common::files_in(layout.dir_for(FileState::Failed)).is_empty());
    assert!(common::files_in(layout.dir_for(FileState::Processing)).is_empty());
}

#[tokio::test]
async fn test_cancelled_file_returns_to_pending() {
    let tmp = tempdir().unwrap();
    let pipeline = pipeline(tmp.path(), FakeInvoker::by_marker());
    let layout = pipeline.layout();

    let input = layout.pending_dir().join("wait.zevtc");
    fs::write(&input, b"trigger:15438").unwrap();
    let owned = layout.claim(&input).unwrap().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = pipeline.process(owned, &cancel).await;
    assert!(matches!(outcome, FileOutcome::Released));
    assert!(input.exists());
    assert!(common::files_in(layout.dir_for(FileState::Failed)).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sibling_names_keep_their_own_parser_output() {
    let tmp = tempdir().unwrap();
    let pipeline = pipeline(tmp.path(), FakeInvoker::by_marker());
    let layout = pipeline.layout();
    let processing = layout.dir_for(FileState::Processing);

    // Output named like a `boss_2` run, sitting next to `boss` in processing/.
    let foreign = processing.join("boss_2_vg_kill.json");
    let intruder = LogBuilder::new(99999, "Intruder").build();
    fs::write(&foreign, serde_json::to_vec(&intruder).unwrap()).unwrap();

    let a = layout.pending_dir().join("boss.zevtc");
    let b = layout.pending_dir().join("boss_2.zevtc");
    fs::write(&a, b"trigger:17172").unwrap();
    fs::write(&b, b"trigger:19767").unwrap();
    let owned_a = layout.claim(&a).unwrap().unwrap();
    let owned_b = layout.claim(&b).unwrap().unwrap();

    let cancel = CancellationToken::new();
    let (out_a, out_b) = tokio::join!(
        pipeline.process(owned_a, &cancel),
        pipeline.process(owned_b, &cancel)
    );

    let db = Database::open(pipeline.db_path()).unwrap();
    for (outcome, trigger_id, stem) in [(out_a, 17172, "boss"), (out_b, 19767, "boss_2")] {
        let encounter_id = match outcome {
            FileOutcome::Done(ImportOutcome::Imported { encounter_id, .. }) => encounter_id,
            other => panic!("expected import of {}, got {:?}", stem, other),
        };
        let encounter = db.get_encounter(encounter_id).unwrap().unwrap();
        assert_eq!(encounter.trigger_id, trigger_id);
        let stored = std::path::PathBuf::from(encounter.storage_path.unwrap());
        assert!(stored.join(format!("{}_fake.json", stem)).exists());
        assert!(!stored.join("boss_2_vg_kill.json").exists());
    }
    assert_eq!(common::files_in(processing), vec![foreign]);
}
