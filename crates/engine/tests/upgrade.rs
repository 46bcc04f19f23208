mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::{runner, write_abc, write_migration, MemoryConnector, MemoryDatabase, RecordingObserver, FAIL_MARKER};
use dbmigrate_engine::{MigrateError, MigrationDirection, TargetStatus};

fn applied_of(status: &TargetStatus) -> (Vec<String>, Vec<String>) {
    match status {
        TargetStatus::Applied { applied, skipped } => (applied.clone(), skipped.clone()),
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fresh_database_gets_whole_chain() {
    let dir = TempDir::new().unwrap();
    write_abc(dir.path());

    let db = MemoryDatabase::new();
    let mut connector = MemoryConnector::new();
    let target = connector.add("fresh", db.clone());
    let runner = runner(dir.path(), Arc::new(connector));

    let report = runner.apply(&[target]).await.unwrap();

    assert_eq!(report.direction, Some(MigrationDirection::Up));
    assert_eq!(report.outcomes.len(), 1);
    let (applied, skipped) = applied_of(&report.outcomes[0].status);
    assert_eq!(applied, vec!["a", "b", "c"]);
    assert!(skipped.is_empty());

    let state = db.state();
    assert!(state.ledger_created);
    assert_eq!(state.versions(), vec!["a", "b", "c"]);
    assert_eq!(state.head().as_deref(), Some("c"));
    let executed: Vec<&str> = state.executed.iter().map(|s| s.trim()).collect();
    assert_eq!(executed, vec!["CREATE TABLE a ();", "CREATE TABLE b ();", "CREATE TABLE c ();"]);
}

#[tokio::test]
async fn test_partially_migrated_database_gets_the_rest() {
    let dir = TempDir::new().unwrap();
    write_abc(dir.path());

    let db = MemoryDatabase::at(&["a", "b"]);
    let mut connector = MemoryConnector::new();
    let target = connector.add("partial", db.clone());
    let runner = runner(dir.path(), Arc::new(connector));

    let report = runner.apply(&[target]).await.unwrap();

    let (applied, _) = applied_of(&report.outcomes[0].status);
    assert_eq!(applied, vec!["c"]);
    assert_eq!(db.state().versions(), vec!["a", "b", "c"]);
    assert_eq!(db.state().executed.len(), 1);
}

#[tokio::test]
async fn test_second_run_does_nothing() {
    let dir = TempDir::new().unwrap();
    write_abc(dir.path());

    let db = MemoryDatabase::new();
    let mut connector = MemoryConnector::new();
    let target = connector.add("idempotent", db.clone());
    let runner = runner(dir.path(), Arc::new(connector));

    runner.apply(std::slice::from_ref(&target)).await.unwrap();
    let report = runner.apply(&[target]).await.unwrap();

    assert!(matches!(report.outcomes[0].status, TargetStatus::NothingToDo));
    assert_eq!(report.applied_count(), 0);
    assert_eq!(db.state().versions(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_failed_step_keeps_earlier_steps() {
    let dir = TempDir::new().unwrap();
    write_migration(dir.path(), "a", "", "CREATE TABLE a ();", "DROP TABLE a;");
    write_migration(dir.path(), "b", "a", &format!("CREATE TABLE b (\n{}", FAIL_MARKER), "DROP TABLE b;");
    write_migration(dir.path(), "c", "b", "CREATE TABLE c ();", "DROP TABLE c;");

    let db = MemoryDatabase::new();
    let mut connector = MemoryConnector::new();
    let target = connector.add("broken", db.clone());
    let runner = runner(dir.path(), Arc::new(connector));

    let report = runner.apply(&[target]).await.unwrap();

    assert!(report.has_failures());
    match &report.outcomes[0].status {
        TargetStatus::Failed { revision, error, applied } => {
            assert_eq!(revision.as_deref(), Some("b"));
            assert!(matches!(error, MigrateError::StepFailed { revision, .. } if revision == "b"));
            assert_eq!(applied, &vec!["a".to_string()]);
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(report.applied_count(), 1);
    assert_eq!(db.state().versions(), vec!["a"]);
    assert_eq!(db.state().head().as_deref(), Some("a"));
}

#[tokio::test]
async fn test_failure_on_one_target_does_not_stop_the_next() {
    let dir = TempDir::new().unwrap();
    write_abc(dir.path());

    let down = MemoryDatabase::unreachable();
    let unknown = MemoryDatabase::at(&["a", "zzz"]);
    let healthy = MemoryDatabase::new();
    let mut connector = MemoryConnector::new();
    let targets = vec![
        connector.add("down", down.clone()),
        connector.add("unknown", unknown.clone()),
        connector.add("healthy", healthy.clone()),
    ];
    let connector = Arc::new(connector);
    let runner = runner(dir.path(), connector.clone());

    let report = runner.apply(&targets).await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert!(matches!(
        &report.outcomes[0].status,
        TargetStatus::Failed { error: MigrateError::Connection { .. }, revision: None, .. }
    ));
    match &report.outcomes[1].status {
        TargetStatus::Failed { revision, error, .. } => {
            assert_eq!(revision.as_deref(), Some("zzz"));
            assert!(matches!(error, MigrateError::UnknownRevision { revision } if revision == "zzz"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    let (applied, _) = applied_of(&report.outcomes[2].status);
    assert_eq!(applied, vec!["a", "b", "c"]);

    assert_eq!(connector.attempts(), 3);
    assert_eq!(unknown.state().versions(), vec!["a", "zzz"]);
    assert!(report.outcomes[0].target.contains("down"));
    assert!(!report.outcomes[0].target.contains("secret"));
}

#[tokio::test]
async fn test_blank_upgrade_is_skipped_without_ledger_row() {
    let dir = TempDir::new().unwrap();
    write_migration(dir.path(), "a", "", "CREATE TABLE a ();", "DROP TABLE a;");
    write_migration(dir.path(), "b", "a", "   ", "");
    write_migration(dir.path(), "c", "b", "CREATE TABLE c ();", "DROP TABLE c;");

    let db = MemoryDatabase::new();
    let mut connector = MemoryConnector::new();
    let target = connector.add("blank", db.clone());
    let observer = Arc::new(RecordingObserver::default());
    let runner = runner(dir.path(), Arc::new(connector)).with_observer(observer.clone());

    let report = runner.apply(&[target]).await.unwrap();

    let (applied, skipped) = applied_of(&report.outcomes[0].status);
    assert_eq!(applied, vec!["a", "c"]);
    assert_eq!(skipped, vec!["b"]);
    assert_eq!(db.state().versions(), vec!["a", "c"]);
    assert!(observer.events().contains(&"skip b".to_string()));
}

#[tokio::test]
async fn test_branch_conflict_stops_before_any_connection() {
    let dir = TempDir::new().unwrap();
    write_migration(dir.path(), "a", "", "CREATE TABLE a ();", "DROP TABLE a;");
    write_migration(dir.path(), "b", "a", "CREATE TABLE b ();", "DROP TABLE b;");
    write_migration(dir.path(), "c", "a", "CREATE TABLE c ();", "DROP TABLE c;");

    let db = MemoryDatabase::new();
    let mut connector = MemoryConnector::new();
    let target = connector.add("untouched", db.clone());
    let connector = Arc::new(connector);
    let runner = runner(dir.path(), connector.clone());

    let err = runner.apply(&[target]).await.unwrap_err();

    assert!(matches!(err, MigrateError::BranchConflict { .. }));
    assert!(err.is_structural());
    assert_eq!(connector.attempts(), 0);
    assert!(!db.state().ledger_created);
}

#[tokio::test]
async fn test_malformed_file_stops_before_any_connection() {
    let dir = TempDir::new().unwrap();
    write_abc(dir.path());
    std::fs::write(dir.path().join("broken.sql"), "-- upgrade\nSELECT 1;\n").unwrap();

    let mut connector = MemoryConnector::new();
    let target = connector.add("untouched", MemoryDatabase::new());
    let connector = Arc::new(connector);
    let runner = runner(dir.path(), connector.clone());

    let err = runner.apply(&[target]).await.unwrap_err();

    assert!(matches!(err, MigrateError::MalformedMigration { .. }));
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn test_sessions_are_closed_on_every_path() {
    let dir = TempDir::new().unwrap();
    write_migration(dir.path(), "a", "", "CREATE TABLE a ();", "DROP TABLE a;");
    write_migration(dir.path(), "b", "a", FAIL_MARKER, "DROP TABLE b;");

    let ok = MemoryDatabase::at(&["a", "b"]);
    let failing = MemoryDatabase::new();
    let mut connector = MemoryConnector::new();
    let targets = vec![connector.add("ok", ok.clone()), connector.add("failing", failing.clone())];
    let runner = runner(dir.path(), Arc::new(connector));

    runner.apply(&targets).await.unwrap();

    for db in [&ok, &failing] {
        let state = db.state();
        assert_eq!(state.opened, 1);
        assert_eq!(state.closed, 1);
    }
}

#[tokio::test]
async fn test_observer_sees_steps_in_order() {
    let dir = TempDir::new().unwrap();
    write_abc(dir.path());

    let mut connector = MemoryConnector::new();
    let target = connector.add("observed", MemoryDatabase::at(&["a"]));
    let observer = Arc::new(RecordingObserver::default());
    let runner = runner(dir.path(), Arc::new(connector)).with_observer(observer.clone());

    runner.apply(&[target]).await.unwrap();

    assert_eq!(
        observer.events(),
        vec![
            "start Some(Up)",
            "upgrade b",
            "done b",
            "upgrade c",
            "done c",
            "finish failed=false",
        ]
    );
}

#[tokio::test]
async fn test_initialize_creates_ledgers() {
    let dir = TempDir::new().unwrap();

    let first = MemoryDatabase::new();
    let second = MemoryDatabase::new();
    let mut connector = MemoryConnector::new();
    let targets = vec![connector.add("one", first.clone()), connector.add("two", second.clone())];
    let runner = runner(dir.path(), Arc::new(connector));

    let report = runner.initialize(&targets).await.unwrap();

    assert_eq!(report.direction, None);
    assert!(report
        .outcomes
        .iter()
        .all(|outcome| matches!(outcome.status, TargetStatus::Initialized)));
    assert!(first.state().ledger_created);
    assert!(second.state().ledger_created);
    assert!(first.state().ledger.is_empty());
}

#[tokio::test]
async fn test_missing_versions_directory_means_nothing_to_do() {
    let dir = TempDir::new().unwrap();
    let versions = dir.path().join("does-not-exist");

    let db = MemoryDatabase::new();
    let mut connector = MemoryConnector::new();
    let target = connector.add("empty", db.clone());
    let runner = runner(&versions, Arc::new(connector));

    let report = runner.apply(&[target]).await.unwrap();

    assert!(matches!(report.outcomes[0].status, TargetStatus::NothingToDo));
    assert!(db.state().ledger_created);
}

#[tokio::test]
async fn test_blank_tail_is_skipped_on_every_run() {
    let dir = TempDir::new().unwrap();
    write_migration(dir.path(), "a", "", "CREATE TABLE a ();", "DROP TABLE a;");
    write_migration(dir.path(), "b", "a", "", "");

    let db = MemoryDatabase::at(&["a"]);
    let mut connector = MemoryConnector::new();
    let target = connector.add("scaffolded", db.clone());
    let runner = runner(dir.path(), Arc::new(connector));

    for _ in 0..2 {
        let report = runner.apply(std::slice::from_ref(&target)).await.unwrap();
        let (applied, skipped) = applied_of(&report.outcomes[0].status);
        assert!(applied.is_empty());
        assert_eq!(skipped, vec!["b"]);
        assert_eq!(report.applied_count(), 0);
    }
    assert_eq!(db.state().versions(), vec!["a"]);
}
