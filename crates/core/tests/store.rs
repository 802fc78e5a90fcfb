use std::path::PathBuf;

use rusqlite::Connection;
use semdiff_core::model::{ResultKind, Statistics, Symbol, SymbolResult};
use semdiff_core::store::{NewRun, ResultStore, StoreError, CURRENT_SCHEMA_VERSION};
use tempfile::tempdir;

fn new_run() -> NewRun {
    NewRun {
        old_snapshot: PathBuf::from("/snapshots/v1"),
        new_snapshot: PathBuf::from("/snapshots/v2"),
        checker: "ir-text".to_string(),
        patterns: "kernel-prints,dead-code".to_string(),
    }
}

fn results() -> Vec<SymbolResult> {
    let mut changed = SymbolResult::new(Symbol::function("bar"), ResultKind::NotEqual)
        .with_diff("-  ret i32 2\n+  ret i32 3\n");
    changed.artifacts = vec![PathBuf::from("/tmp/bar.old.ll"), PathBuf::from("/tmp/bar.new.ll")];
    vec![
        SymbolResult::new(Symbol::function("foo"), ResultKind::Equal),
        changed,
        SymbolResult::error(Symbol::sysctl("kernel.panic"), "old: entry-lookup failed"),
        SymbolResult::new(
            Symbol::module_param("drivers/block/loop", "max_part"),
            ResultKind::Timeout,
        ),
    ]
}

#[test]
fn runs_and_results_survive_reopening() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("results.db");
    let results = results();
    let stats = Statistics::from_results(&results);

    let run_id = {
        let store = ResultStore::open(&db).expect("open");
        let run_id = store.insert_run(&new_run()).expect("insert run");
        store.insert_results(run_id, &results).expect("insert results");
        store.finish_run(run_id, &stats, false).expect("finish");
        run_id
    };

    let store = ResultStore::open(&db).expect("reopen");
    assert_eq!(store.schema_version().expect("version"), CURRENT_SCHEMA_VERSION);
    let runs = store.list_runs().expect("runs");
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.id, run_id);
    assert_eq!(run.checker, "ir-text");
    assert_eq!(run.patterns, "kernel-prints,dead-code");
    assert_eq!(run.old_snapshot, PathBuf::from("/snapshots/v1"));
    assert!(run.finished_at.is_some());
    assert_eq!(run.statistics, Some(stats));
    assert!(!run.cancelled);

    assert_eq!(store.list_results(run_id).expect("results"), results);
}

#[test]
fn unfinished_runs_have_no_statistics() {
    let store = ResultStore::in_memory().expect("store");
    let first = store.insert_run(&new_run()).expect("first");
    let second = store.insert_run(&new_run()).expect("second");
    store.finish_run(second, &Statistics::default(), true).expect("finish second");

    let runs = store.list_runs().expect("runs");
    assert_eq!(runs.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first, second]);
    assert_eq!(runs[0].statistics, None);
    assert!(runs[1].cancelled);
    assert!(store.list_results(first).expect("empty").is_empty());
}

#[test]
fn unknown_runs_are_reported() {
    let store = ResultStore::in_memory().expect("store");
    assert!(matches!(store.list_results(42), Err(StoreError::UnknownRun(42))));
    assert!(matches!(store.insert_results(7, &results()), Err(StoreError::UnknownRun(7))));
    assert!(matches!(
        store.finish_run(9, &Statistics::default(), false),
        Err(StoreError::UnknownRun(9))
    ));
}

#[test]
fn first_schema_version_is_upgraded_in_place() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("old.db");
    {
        let conn = Connection::open(&db).expect("raw open");
        conn.execute_batch(
            r#"
            CREATE TABLE runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                old_snapshot TEXT NOT NULL, new_snapshot TEXT NOT NULL,
                checker TEXT NOT NULL, patterns TEXT NOT NULL,
                started_at TEXT NOT NULL, finished_at TEXT,
                equal INTEGER, not_equal INTEGER, unknown INTEGER, error INTEGER, timeout INTEGER
            );
            CREATE TABLE results (
                run_id INTEGER NOT NULL REFERENCES runs(id), position INTEGER NOT NULL,
                name TEXT NOT NULL, symbol_kind TEXT NOT NULL, hint TEXT,
                result TEXT NOT NULL, detail TEXT, diff TEXT,
                PRIMARY KEY (run_id, position)
            );
            INSERT INTO runs (old_snapshot, new_snapshot, checker, patterns, started_at)
                VALUES ('a', 'b', 'simpll', '', '2025-01-01T00:00:00+00:00');
            INSERT INTO results (run_id, position, name, symbol_kind, result)
                VALUES (1, 0, 'foo', 'function', 'equal');
            PRAGMA user_version = 1;
            "#,
        )
        .expect("seed v1 schema");
    }

    let store = ResultStore::open(&db).expect("upgrade");
    assert_eq!(store.schema_version().expect("version"), CURRENT_SCHEMA_VERSION);
    let runs = store.list_runs().expect("runs");
    assert_eq!(runs[0].checker, "simpll");
    assert!(!runs[0].cancelled);
    let results = store.list_results(1).expect("results");
    assert_eq!(results, vec![SymbolResult::new(Symbol::function("foo"), ResultKind::Equal)]);
}
