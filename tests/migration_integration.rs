use std::cell::Cell;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, params};
use serde_json::json;
use tempfile::tempdir;

use taskmaster_migrate::commands::migrate::run_all;
use taskmaster_migrate::config::LegacyLayout;
use taskmaster_migrate::error::{MigrateError, Result};
use taskmaster_migrate::migrate::{Migrator, RunStatus, SourceOutcome};
use taskmaster_migrate::model::{NewTask, SourceKind, TaskRecord, TaskStatus, UserRef};
use taskmaster_migrate::store::document::DocumentStore;
use taskmaster_migrate::store::relational::RelationalStore;
use taskmaster_migrate::store::{BackendKind, LegacyRow, Target, TaskBackend};
use taskmaster_migrate::transform::parse_time;

fn run_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

const STAMP: &str = "2024_06_01_12_00_00";

fn legacy_sqlite(dir: &Path) -> PathBuf {
    let path = dir.join("taskmaster.db");
    let conn = Connection::open(&path).unwrap();
    for table in ["due_tasks", "overdue_tasks", "completed_tasks"] {
        conn.execute_batch(&format!(
            "CREATE TABLE {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                task_detail TEXT NOT NULL,
                creation_time TEXT NOT NULL,
                lastedited_time TEXT NOT NULL,
                due_time TEXT NOT NULL
            );"
        ))
        .unwrap();
    }
    path
}

fn insert_legacy(path: &Path, table: &str, user: i64, detail: &str, due: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute(
        &format!(
            "INSERT INTO {table} (user_id, task_detail, creation_time, lastedited_time, due_time)
             VALUES (?1, ?2, '2024-01-01', '2024-01-01', ?3)"
        ),
        params![user, detail, due],
    )
    .unwrap();
}

fn table_names(path: &Path) -> Vec<String> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<std::result::Result<Vec<String>, _>>()
        .unwrap()
}

fn row_count(path: &Path, table: &str) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

fn unified(store: &dyn TaskBackend) -> Vec<NewTask> {
    store
        .load_tasks("tasks")
        .unwrap()
        .into_iter()
        .map(|record: TaskRecord| record.task)
        .collect()
}

/// Relational store whose Nth `insert_tasks` call fails.
struct FailingInsert {
    inner: RelationalStore,
    fail_on_call: usize,
    calls: Cell<usize>,
}

impl TaskBackend for FailingInsert {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }
    fn lock(&self) -> Result<File> {
        self.inner.lock()
    }
    fn list_containers(&self) -> Result<Vec<String>> {
        self.inner.list_containers()
    }
    fn count_records(&self, container: &str) -> Result<usize> {
        self.inner.count_records(container)
    }
    fn read_legacy(&self, container: &str) -> Result<Vec<LegacyRow>> {
        self.inner.read_legacy(container)
    }
    fn ensure_unified(&self, container: &str) -> Result<Vec<String>> {
        self.inner.ensure_unified(container)
    }
    fn insert_tasks(
        &self,
        container: &str,
        tasks: &[NewTask],
        from: Option<&str>,
    ) -> Result<usize> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        if call == self.fail_on_call {
            return Err(MigrateError::Write {
                container: container.to_string(),
                errors: vec!["injected failure".into()],
            });
        }
        self.inner.insert_tasks(container, tasks, from)
    }
    fn written_marker(&self, legacy: &str) -> Result<Option<usize>> {
        self.inner.written_marker(legacy)
    }
    fn rename_container(&self, from: &str, to: &str) -> Result<()> {
        self.inner.rename_container(from, to)
    }
    fn load_tasks(&self, container: &str) -> Result<Vec<TaskRecord>> {
        self.inner.load_tasks(container)
    }
    fn list_indexes(&self, container: &str) -> Result<Vec<String>> {
        self.inner.list_indexes(container)
    }
}

#[test]
fn single_due_record_is_migrated_and_archived() {
    let dir = tempdir().unwrap();
    let db = legacy_sqlite(dir.path());
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch("DROP TABLE overdue_tasks; DROP TABLE completed_tasks;")
        .unwrap();
    conn.execute(
        "INSERT INTO due_tasks (user_id, task_detail, creation_time, lastedited_time, due_time)
         VALUES (1, 'buy milk', '2024-01-01', '2024-01-01', '2024-01-02')",
        [],
    )
    .unwrap();
    drop(conn);

    let store = RelationalStore::connect(&db).unwrap();
    let layout = LegacyLayout::default();
    let report = Migrator::new(&store, &layout).run_at(run_time()).unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let tasks = unified(&store);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].user_id, UserRef::Int(1));
    assert_eq!(tasks[0].task_detail, "buy milk");
    assert_eq!(tasks[0].status, TaskStatus::Pending);
    assert_eq!(tasks[0].completion_time, None);

    let backup = format!("due_tasks_backup_{STAMP}");
    assert_eq!(report.backups, vec![backup.clone()]);
    let tables = table_names(&db);
    assert!(!tables.contains(&"due_tasks".to_string()));
    assert!(tables.contains(&backup));
    assert_eq!(row_count(&db, &backup), 1);
}

#[test]
fn completed_records_take_due_time_as_completion_time() {
    let dir = tempdir().unwrap();
    let db = legacy_sqlite(dir.path());
    insert_legacy(&db, "completed_tasks", 1, "filed taxes", "2024-04-15 17:00:00");
    insert_legacy(&db, "completed_tasks", 2, "renewed passport", "2023-11-02");

    let store = RelationalStore::connect(&db).unwrap();
    let layout = LegacyLayout::default();
    Migrator::new(&store, &layout).run_at(run_time()).unwrap();

    let tasks = unified(&store);
    assert_eq!(tasks.len(), 2);
    let expected = [
        parse_time(&"2024-04-15 17:00:00".into()).unwrap(),
        parse_time(&"2023-11-02".into()).unwrap(),
    ];
    for (task, due) in tasks.iter().zip(expected) {
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.due_time, due);
        assert_eq!(task.completion_time, Some(due));
    }
}

#[test]
fn due_and_overdue_stay_pending_whatever_the_due_time() {
    let dir = tempdir().unwrap();
    let db = legacy_sqlite(dir.path());
    insert_legacy(&db, "due_tasks", 1, "future", "2999-01-01");
    insert_legacy(&db, "due_tasks", 1, "past but still in due", "2001-01-01");
    insert_legacy(&db, "overdue_tasks", 1, "overdue", "2001-01-01");
    insert_legacy(&db, "overdue_tasks", 1, "overdue moved to future", "2999-01-01");

    let store = RelationalStore::connect(&db).unwrap();
    let layout = LegacyLayout::default();
    Migrator::new(&store, &layout).run_at(run_time()).unwrap();

    let tasks = unified(&store);
    assert_eq!(tasks.len(), 4);
    assert!(
        tasks
            .iter()
            .all(|t| t.status == TaskStatus::Pending && t.completion_time.is_none())
    );
}

#[test]
fn write_failure_isolates_the_failing_source() {
    let dir = tempdir().unwrap();
    let db = legacy_sqlite(dir.path());
    insert_legacy(&db, "due_tasks", 1, "due", "2024-07-01");
    insert_legacy(&db, "overdue_tasks", 1, "overdue a", "2024-05-01");
    insert_legacy(&db, "overdue_tasks", 2, "overdue b", "2024-05-02");
    insert_legacy(&db, "completed_tasks", 3, "done", "2024-04-01");

    let layout = LegacyLayout::default();
    let failing = FailingInsert {
        inner: RelationalStore::connect(&db).unwrap(),
        fail_on_call: 2,
        calls: Cell::new(0),
    };
    let report = Migrator::new(&failing, &layout).run_at(run_time()).unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.source(SourceKind::Due).unwrap().archived);
    let overdue = report.source(SourceKind::Overdue).unwrap();
    assert!(!overdue.archived);
    assert_eq!(overdue.read_count, 2);
    assert_eq!(overdue.migrated_count, 0);
    assert!(matches!(overdue.outcome, SourceOutcome::Failed { .. }));
    // Later sources still run.
    assert!(report.source(SourceKind::Completed).unwrap().archived);
    assert_eq!(report.failed_sources(), vec![SourceKind::Overdue]);
    assert!(matches!(
        report.ensure_complete(),
        Err(MigrateError::Incomplete { .. })
    ));

    let tables = table_names(&db);
    assert!(tables.contains(&"overdue_tasks".to_string()));
    assert_eq!(row_count(&db, "overdue_tasks"), 2);
    assert_eq!(row_count(&db, "tasks"), 2);
    drop(failing);

    // Re-running picks up exactly the source that is left.
    let store = RelationalStore::connect(&db).unwrap();
    let retry = Migrator::new(&store, &layout)
        .run_at(run_time() + chrono::Duration::seconds(5))
        .unwrap();
    assert_eq!(retry.status, RunStatus::Completed);
    assert_eq!(
        retry.source(SourceKind::Due).unwrap().outcome,
        SourceOutcome::Skipped
    );
    assert_eq!(retry.source(SourceKind::Overdue).unwrap().migrated_count, 2);
    assert_eq!(row_count(&db, "tasks"), 4);
}

#[test]
fn second_run_is_a_no_op() {
    let dir = tempdir().unwrap();
    let db = legacy_sqlite(dir.path());
    insert_legacy(&db, "due_tasks", 1, "a", "2024-07-01");
    insert_legacy(&db, "completed_tasks", 1, "b", "2024-03-01");

    let store = RelationalStore::connect(&db).unwrap();
    let layout = LegacyLayout::default();
    let first = Migrator::new(&store, &layout).run_at(run_time()).unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    let after_first = unified(&store);

    let second = Migrator::new(&store, &layout).run().unwrap();
    assert_eq!(second.status, RunStatus::Skipped);
    assert!(second.backups.is_empty());
    assert!(second.sources.iter().all(|s| s.migrated_count == 0));
    assert_eq!(unified(&store), after_first);
}

#[test]
fn empty_legacy_tables_skip_without_backups() {
    let dir = tempdir().unwrap();
    let db = legacy_sqlite(dir.path());

    let store = RelationalStore::connect(&db).unwrap();
    let layout = LegacyLayout::default();
    let report = Migrator::new(&store, &layout).run_at(run_time()).unwrap();

    assert_eq!(report.status, RunStatus::Skipped);
    assert!(report.backups.is_empty());
    assert!(report.sources.iter().all(|s| s.read_count == 0 && s.migrated_count == 0));
    assert_eq!(
        table_names(&db),
        vec!["completed_tasks", "due_tasks", "overdue_tasks"]
    );
}

#[test]
fn migrated_count_excludes_parse_errors() {
    let dir = tempdir().unwrap();
    let db = legacy_sqlite(dir.path());
    insert_legacy(&db, "due_tasks", 1, "ok", "2024-07-01");
    insert_legacy(&db, "due_tasks", 1, "bad", "whenever");
    insert_legacy(&db, "due_tasks", 1, "ok too", "2024-07-02");

    let store = RelationalStore::connect(&db).unwrap();
    let layout = LegacyLayout::default();
    let report = Migrator::new(&store, &layout).run_at(run_time()).unwrap();

    let due = report.source(SourceKind::Due).unwrap();
    assert_eq!(due.read_count, 3);
    assert_eq!(due.parse_errors.len(), 1);
    assert_eq!(due.migrated_count, due.read_count - due.parse_errors.len());
    assert_eq!(due.parse_errors[0].error.field, "due_time");
    assert_eq!(due.parse_errors[0].error.legacy_id.as_deref(), Some("2"));
}

#[test]
fn backup_name_collision_is_archived_on_retry_without_reinserting() {
    let dir = tempdir().unwrap();
    let db = legacy_sqlite(dir.path());
    insert_legacy(&db, "due_tasks", 1, "a", "2024-07-01");
    Connection::open(&db)
        .unwrap()
        .execute_batch(&format!(
            "CREATE TABLE due_tasks_backup_{STAMP} (id INTEGER PRIMARY KEY);"
        ))
        .unwrap();

    let store = RelationalStore::connect(&db).unwrap();
    let layout = LegacyLayout::default();
    let report = Migrator::new(&store, &layout).run_at(run_time()).unwrap();

    let due = report.source(SourceKind::Due).unwrap();
    assert_eq!(due.migrated_count, 1);
    assert!(!due.archived);
    assert!(matches!(
        due.outcome,
        SourceOutcome::PartiallyMigratedNotArchived { .. }
    ));
    assert_eq!(report.status, RunStatus::Failed);
    assert!(table_names(&db).contains(&"due_tasks".to_string()));
    drop(store);

    // The retry only archives; the record is not written a second time.
    let store = RelationalStore::connect(&db).unwrap();
    let retry = Migrator::new(&store, &layout)
        .run_at(run_time() + chrono::Duration::seconds(5))
        .unwrap();
    assert_eq!(retry.status, RunStatus::Completed);
    let due = retry.source(SourceKind::Due).unwrap();
    assert!(due.resumed);
    assert!(due.archived);
    assert_eq!(row_count(&db, "tasks"), 1);
    assert!(!table_names(&db).contains(&"due_tasks".to_string()));
}

#[test]
fn document_backup_collision_retry_keeps_one_copy_per_record() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    for name in ["a", "b"] {
        put_doc(
            &docs,
            "due_tasks",
            name,
            json!({
                "user_id": 1,
                "task_detail": name,
                "creation_time": "2024-01-01",
                "lastedited_time": "2024-01-01",
                "due_time": "2024-01-02"
            }),
        );
    }
    fs::create_dir_all(docs.join(format!("due_tasks_backup_{STAMP}"))).unwrap();

    let store = DocumentStore::connect(&docs).unwrap();
    let layout = LegacyLayout::default();
    let first = Migrator::new(&store, &layout).run_at(run_time()).unwrap();
    assert!(matches!(
        first.source(SourceKind::Due).unwrap().outcome,
        SourceOutcome::PartiallyMigratedNotArchived { .. }
    ));

    let retry = Migrator::new(&store, &layout)
        .run_at(run_time() + chrono::Duration::seconds(5))
        .unwrap();
    assert!(retry.source(SourceKind::Due).unwrap().archived);
    assert_eq!(unified(&store).len(), 2);

    let third = Migrator::new(&store, &layout).run().unwrap();
    assert_eq!(third.status, RunStatus::Skipped);
    assert_eq!(unified(&store).len(), 2);
}

fn put_doc(root: &Path, collection: &str, name: &str, doc: serde_json::Value) {
    let dir = root.join(collection);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{name}.json")), doc.to_string()).unwrap();
}

#[test]
fn both_backends_migrate_identically_in_one_invocation() {
    let dir = tempdir().unwrap();
    let db = legacy_sqlite(dir.path());
    insert_legacy(&db, "due_tasks", 1, "buy milk", "2024-01-02");
    insert_legacy(&db, "completed_tasks", 1, "walk dog", "2024-01-03");

    let docs = dir.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    for (collection, detail, due) in [
        ("due_tasks", "buy milk", "2024-01-02"),
        ("completed_tasks", "walk dog", "2024-01-03"),
    ] {
        put_doc(
            &docs,
            collection,
            detail.split(' ').next().unwrap(),
            json!({
                "_id": {"$oid": format!("{collection}-1")},
                "user_id": 1,
                "task_detail": detail,
                "creation_time": "2024-01-01",
                "lastedited_time": "2024-01-01",
                "due_time": due
            }),
        );
    }

    let targets = vec![Target::Document(docs.clone()), Target::Relational(db.clone())];
    let layout = LegacyLayout::default();
    let runs = run_all(&targets, &layout);

    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].0, BackendKind::Document);
    assert_eq!(runs[1].0, BackendKind::Relational);
    for (_, run) in &runs {
        let report = run.as_ref().unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert!(report.source(SourceKind::Due).unwrap().archived);
        assert!(report.source(SourceKind::Completed).unwrap().archived);
    }

    let doc_store = DocumentStore::connect(&docs).unwrap();
    let sql_store = RelationalStore::connect(&db).unwrap();
    let mut from_docs = unified(&doc_store);
    let mut from_sql = unified(&sql_store);
    from_docs.sort_by(|a, b| a.task_detail.cmp(&b.task_detail));
    from_sql.sort_by(|a, b| a.task_detail.cmp(&b.task_detail));
    assert_eq!(from_docs, from_sql);
}

#[test]
fn unreachable_backend_does_not_stop_the_other() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    put_doc(
        &docs,
        "due_tasks",
        "a",
        json!({
            "user_id": "u1",
            "task_detail": "a",
            "creation_time": "2024-01-01",
            "lastedited_time": "2024-01-01",
            "due_time": "2024-01-02"
        }),
    );

    let targets = vec![
        Target::Document(docs),
        Target::Relational(dir.path().join("missing.db")),
    ];
    let runs = run_all(&targets, &LegacyLayout::default());

    assert_eq!(runs[0].1.as_ref().unwrap().status, RunStatus::Completed);
    assert!(matches!(
        runs[1].1,
        Err(MigrateError::Connection { .. })
    ));
}
