//! Integration tests for the schema-keeper-sqlite crate.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use schema_keeper_config::{KeeperConfig, VersionReadPolicy, sql_checksum};
use schema_keeper_core::{ColumnDef, ColumnType, LifecycleState, SchemaVersion, TableDescriptor};
use schema_keeper_sqlite::{
    AccessTier, ConnectionConfig, ConnectionManager, Database, KeeperError, MigrationLock,
    MigrationSet, MigrationStep, OrchestratorOptions, SchemaStatus, TableRegistry, VersionReadKind,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Registry with a `log` table each step appends its version to.
fn registry() -> TableRegistry {
    let users = TableDescriptor::new("users")
        .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .with_column(ColumnDef::new("email", ColumnType::Text).unique());
    let log = TableDescriptor::new("log")
        .with_column(ColumnDef::new("seq", ColumnType::Integer).primary_key())
        .with_column(ColumnDef::new("version", ColumnType::Integer));
    TableRegistry::new("app_", vec![users, log]).unwrap()
}

fn logging_step(version: u32) -> MigrationStep {
    MigrationStep::sql(
        version,
        &format!("step {version}"),
        &format!("INSERT INTO app_log (version) VALUES ({version});"),
    )
}

fn steps(up_to: u32) -> MigrationSet {
    MigrationSet::new((1..=up_to).map(logging_step).collect()).unwrap()
}

fn db_path(dir: &Path) -> PathBuf {
    dir.join("app.db")
}

fn open(path: &Path, migrations: MigrationSet) -> Database {
    Database::new(
        ConnectionConfig::file(path),
        registry(),
        migrations,
        OrchestratorOptions::default(),
    )
    .unwrap()
}

/// Simulates one process start: connect, upgrade, shut down.
fn run(path: &Path, migrations: MigrationSet) -> Result<Vec<u32>, KeeperError> {
    let mut db = open(path, migrations);
    db.connect()?;
    let outcome = db.ensure_latest();
    db.shutdown();
    outcome.map(|report| report.applied.iter().map(|v| v.get()).collect())
}

fn stored_version(path: &Path) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row("SELECT version FROM app_schema_version WHERE id = 1", [], |r| r.get(0))
        .unwrap()
}

fn applied_log(path: &Path) -> Vec<u32> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare("SELECT version FROM app_log ORDER BY seq").unwrap();
    let versions = stmt
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<Vec<u32>, _>>()
        .unwrap();
    versions
}

// ---------------------------------------------------------------------------
// Upgrade scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_empty_database_applies_all_steps_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());

    assert_eq!(run(&path, steps(3)).unwrap(), vec![1, 2, 3]);
    assert_eq!(stored_version(&path), 3);
    assert_eq!(applied_log(&path), vec![1, 2, 3]);
}

#[test]
fn test_database_at_version_two_applies_only_step_three() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());

    run(&path, steps(2)).unwrap();
    assert_eq!(stored_version(&path), 2);

    assert_eq!(run(&path, steps(3)).unwrap(), vec![3]);
    assert_eq!(stored_version(&path), 3);
    assert_eq!(applied_log(&path), vec![1, 2, 3]);
}

#[test]
fn test_database_at_latest_applies_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());

    run(&path, steps(3)).unwrap();
    assert!(run(&path, steps(3)).unwrap().is_empty());
    assert_eq!(stored_version(&path), 3);
    assert_eq!(applied_log(&path), vec![1, 2, 3]);
}

#[test]
fn test_unreachable_database_fails_to_connect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("app.db");
    let mut db = open(&path, steps(3));

    let err = db.connect().unwrap_err();
    assert!(matches!(err, KeeperError::ConnectionError { .. }));
    assert_eq!(db.state(), LifecycleState::Disconnected);
    assert!(!path.exists());
}

#[test]
fn test_version_never_decreases() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());

    let mut last = 0;
    for latest in [1, 1, 3, 3, 4, 6] {
        run(&path, steps(latest)).unwrap();
        let now = stored_version(&path);
        assert!(now >= last, "version went from {last} to {now}");
        last = now;
    }
    assert_eq!(applied_log(&path), vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_partial_failure_resumes_from_last_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());

    let broken = MigrationSet::new(vec![
        logging_step(1),
        logging_step(2),
        MigrationStep::sql(3, "step 3", "INSERT INTO app_log (version) VALUES (3); INSERT INTO nope VALUES (1);"),
        logging_step(4),
    ])
    .unwrap();

    let err = run(&path, broken).unwrap_err();
    match err {
        KeeperError::MigrationError { version, description, .. } => {
            assert_eq!(version, SchemaVersion::new(3));
            assert_eq!(description, "step 3");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stored_version(&path), 2);
    assert_eq!(applied_log(&path), vec![1, 2]);

    // The fixed build resumes at step 3.
    assert_eq!(run(&path, steps(4)).unwrap(), vec![3, 4]);
    assert_eq!(applied_log(&path), vec![1, 2, 3, 4]);
}

#[test]
fn test_ensure_setup_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    let mut db = open(&path, steps(1));
    db.connect().unwrap();
    db.ensure_setup().unwrap();
    let first = db.verify().unwrap();
    db.ensure_setup().unwrap();
    assert_eq!(db.verify().unwrap(), first);
    assert_eq!(db.state(), LifecycleState::StructuresEnsured);
}

// ---------------------------------------------------------------------------
// Version read policy
// ---------------------------------------------------------------------------

fn corrupt_version(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute("UPDATE app_schema_version SET version = 'garbage' WHERE id = 1", [])
        .unwrap();
}

fn idempotent_steps() -> MigrationSet {
    MigrationSet::new(vec![
        MigrationStep::sql(1, "admin", "INSERT OR IGNORE INTO app_users (id, email) VALUES (1, 'admin@example.com');"),
        MigrationStep::sql(2, "index", "CREATE INDEX IF NOT EXISTS app_users_email ON app_users(email);"),
    ])
    .unwrap()
}

#[test]
fn test_lenient_read_failure_falls_back_to_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    run(&path, idempotent_steps()).unwrap();
    corrupt_version(&path);

    // Steps re-run from version 1 and the record is repaired.
    assert_eq!(run(&path, idempotent_steps()).unwrap(), vec![1, 2]);
    assert_eq!(stored_version(&path), 2);
}

#[test]
fn test_strict_read_failure_is_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    run(&path, idempotent_steps()).unwrap();
    corrupt_version(&path);

    let options = OrchestratorOptions {
        version_read: VersionReadPolicy::Strict,
        ..OrchestratorOptions::default()
    };
    let mut db = Database::new(ConnectionConfig::file(&path), registry(), idempotent_steps(), options)
        .unwrap();
    db.connect().unwrap();
    let err = db.ensure_latest().unwrap_err();
    assert!(matches!(
        err,
        KeeperError::VersionReadError { kind: VersionReadKind::Corrupt, .. }
    ));
    assert_eq!(db.state(), LifecycleState::StructuresEnsured);
}

#[test]
fn test_strict_policy_still_bootstraps_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    let options = OrchestratorOptions {
        version_read: VersionReadPolicy::Strict,
        ..OrchestratorOptions::default()
    };
    let db = Database::open_ready(ConnectionConfig::file(&path), registry(), steps(2), options)
        .unwrap();
    assert_eq!(db.state(), LifecycleState::UpToDate);
    assert_eq!(stored_version(&path), 2);
}

#[test]
fn test_database_ahead_of_build() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    run(&path, steps(3)).unwrap();

    // An older build still starts and leaves the newer schema alone.
    let mut db = open(&path, steps(2));
    db.connect().unwrap();
    assert_eq!(db.status().unwrap(), SchemaStatus::DatabaseAhead {
        database: SchemaVersion::new(3),
        latest: SchemaVersion::new(2),
    });
    let report = db.ensure_latest().unwrap();
    assert!(report.is_noop());
    assert_eq!(report.to, SchemaVersion::new(3));
    assert_eq!(db.state(), LifecycleState::UpToDate);
    db.shutdown();
    assert_eq!(stored_version(&path), 3);
    assert_eq!(applied_log(&path), vec![1, 2, 3]);
}

#[test]
fn test_database_ahead_refused_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    run(&path, steps(3)).unwrap();

    let options = OrchestratorOptions {
        refuse_newer: true,
        ..OrchestratorOptions::default()
    };
    let mut db = Database::new(ConnectionConfig::file(&path), registry(), steps(2), options).unwrap();
    db.connect().unwrap();
    assert!(matches!(
        db.ensure_latest().unwrap_err(),
        KeeperError::DatabaseAhead { .. }
    ));
    db.shutdown();
    assert_eq!(stored_version(&path), 3);
}

/// Replaces the version table with one that has no `version` column.
fn break_version_table(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "DROP TABLE app_schema_version;
         CREATE TABLE app_schema_version (id INTEGER PRIMARY KEY, updated_at TEXT);
         INSERT INTO app_schema_version (id, updated_at) VALUES (1, 'never');",
    )
    .unwrap();
}

#[test]
fn test_lenient_unqueryable_version_table_fails_first_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    run(&path, idempotent_steps()).unwrap();
    break_version_table(&path);

    let mut db = open(&path, idempotent_steps());
    db.connect().unwrap();
    let err = db.ensure_latest().unwrap_err();
    match err {
        KeeperError::VersionWriteError { version, message } => {
            assert_eq!(version, SchemaVersion::new(1));
            assert!(message.contains("version"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(db.state(), LifecycleState::VersionKnown);
    db.shutdown();

    // The failed step rolled back: history still holds the original run only.
    let conn = Connection::open(&path).unwrap();
    let history: i64 = conn
        .query_row("SELECT COUNT(*) FROM app_schema_history", [], |r| r.get(0))
        .unwrap();
    assert_eq!(history, 2);
}

#[test]
fn test_strict_unqueryable_version_table_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    run(&path, idempotent_steps()).unwrap();
    break_version_table(&path);

    let options = OrchestratorOptions {
        version_read: VersionReadPolicy::Strict,
        ..OrchestratorOptions::default()
    };
    let mut db = Database::new(ConnectionConfig::file(&path), registry(), idempotent_steps(), options)
        .unwrap();
    db.connect().unwrap();
    assert!(matches!(
        db.ensure_latest().unwrap_err(),
        KeeperError::VersionReadError { kind: VersionReadKind::Query, .. }
    ));
}

// ---------------------------------------------------------------------------
// History, status, lock
// ---------------------------------------------------------------------------

#[test]
fn test_history_records_applied_steps() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    let migrations = MigrationSet::new(vec![
        logging_step(1),
        MigrationStep::from_fn(2, "backfill", |tx| {
            tx.execute("INSERT INTO app_log (version) VALUES (2)", [])?;
            Ok(())
        }),
    ])
    .unwrap();

    let mut db = open(&path, migrations);
    db.connect().unwrap();
    db.ensure_latest().unwrap();

    let history = db.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, SchemaVersion::new(1));
    assert_eq!(
        history[0].checksum.as_deref(),
        Some(sql_checksum("INSERT INTO app_log (version) VALUES (1);").as_str())
    );
    assert_eq!(history[1].description, "backfill");
    assert_eq!(history[1].checksum, None);
}

#[test]
fn test_status_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    let mut db = open(&path, steps(2));
    db.connect().unwrap();
    assert_eq!(db.status().unwrap(), SchemaStatus::NotInitialized);

    db.ensure_latest().unwrap();
    assert_eq!(db.status().unwrap(), SchemaStatus::Current {
        version: SchemaVersion::new(2)
    });

    db.connection().unwrap().execute_batch("DROP TABLE app_users").unwrap();
    assert_eq!(db.status().unwrap(), SchemaStatus::Incomplete {
        missing_tables: vec!["app_users".to_string()],
    });
}

#[test]
fn test_held_lock_blocks_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    run(&path, steps(1)).unwrap();

    let other = Connection::open(&path).unwrap();
    let foreign = MigrationLock::acquire(&other, "app_", "other-instance").unwrap();

    let options = OrchestratorOptions {
        lock: true,
        lock_holder: "this-instance".to_string(),
        ..OrchestratorOptions::default()
    };
    let mut db = Database::new(ConnectionConfig::file(&path), registry(), steps(2), options).unwrap();
    db.connect().unwrap();
    match db.ensure_latest().unwrap_err() {
        KeeperError::LockHeld { holder, .. } => assert_eq!(holder, "other-instance"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stored_version(&path), 1);

    foreign.release(&other).unwrap();
    let report = db.ensure_latest().unwrap();
    assert_eq!(report.applied, vec![SchemaVersion::new(2)]);
    assert!(db.lock_holder().unwrap().is_none());
}

#[test]
fn test_force_unlock_clears_stale_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    run(&path, steps(1)).unwrap();
    {
        let crashed = Connection::open(&path).unwrap();
        // Dropped without release, as after a crash.
        let _ = MigrationLock::acquire(&crashed, "app_", "crashed").unwrap();
    }

    let options = OrchestratorOptions {
        lock: true,
        ..OrchestratorOptions::default()
    };
    let mut db = Database::new(ConnectionConfig::file(&path), registry(), steps(2), options).unwrap();
    db.connect().unwrap();
    let removed = db.force_unlock().unwrap().unwrap();
    assert_eq!(removed.holder, "crashed");
    assert_eq!(db.ensure_latest().unwrap().applied, vec![SchemaVersion::new(2)]);
}

// ---------------------------------------------------------------------------
// Credential tiers and configuration
// ---------------------------------------------------------------------------

#[test]
fn test_application_tier_after_setup() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());

    let mut app = ConnectionManager::new(ConnectionConfig::file(&path));
    assert!(app.connect(AccessTier::Application).is_err());

    run(&path, steps(1)).unwrap();
    app.connect(AccessTier::Application).unwrap();
    let count: i64 = app
        .connection()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM app_log", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_application_session_cannot_run_setup() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(dir.path());
    Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE unrelated (id INTEGER)")
        .unwrap();

    let mut db = open(&path, steps(1));
    db.connect_application().unwrap();
    assert!(matches!(
        db.ensure_setup().unwrap_err(),
        KeeperError::InvalidTransition(_)
    ));
    assert_eq!(db.state(), LifecycleState::Disconnected);
    assert_eq!(db.status().unwrap(), SchemaStatus::NotInitialized);

    // Upgrading the session to privileged makes setup possible.
    db.connect().unwrap();
    db.ensure_setup().unwrap();
    assert_eq!(db.state(), LifecycleState::StructuresEnsured);
}

#[test]
fn test_from_config_with_script_directory() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(
        migrations.join("0001_create_notes.sql"),
        "CREATE TABLE IF NOT EXISTS cv_notes (id INTEGER PRIMARY KEY, body TEXT);",
    )
    .unwrap();
    std::fs::write(
        migrations.join("0002_first_note.sql"),
        "INSERT INTO cv_notes (body) VALUES ('hello');",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("keeper.yml"),
        r#"
database:
  path: data.db
prefix: cv_
migrations_dir: migrations
tables:
  - name: accounts
    columns:
      - { name: id, type: integer, primary_key: true }
"#,
    )
    .unwrap();

    let config = KeeperConfig::load(dir.path().join("keeper.yml")).unwrap();
    let extra = vec![MigrationStep::sql(3, "second note", "INSERT INTO cv_notes (body) VALUES ('again');")];
    let mut db = Database::from_config(&config, extra).unwrap();
    db.connect().unwrap();
    let report = db.ensure_latest().unwrap();
    assert_eq!(report.to, SchemaVersion::new(3));

    let history = db.history().unwrap();
    let descriptions: Vec<&str> = history.iter().map(|h| h.description.as_str()).collect();
    assert_eq!(descriptions, vec!["create notes", "first note", "second note"]);
    db.shutdown();

    assert!(dir.path().join("data.db").exists());
}

#[test]
fn test_from_config_rejects_overlapping_steps() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("migrations")).unwrap();
    std::fs::write(dir.path().join("migrations").join("0001_a.sql"), "SELECT 1;").unwrap();

    let config = KeeperConfig {
        migrations_dir: Some(dir.path().join("migrations")),
        ..KeeperConfig::default()
    };
    let extra = vec![MigrationStep::sql(1, "clash", "SELECT 1;")];
    assert!(matches!(
        Database::from_config(&config, extra),
        Err(KeeperError::InvalidMigrations(_))
    ));
}

#[test]
fn test_from_config_fills_script_gap_with_code_step() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(
        migrations.join("0002_first_tag.sql"),
        "INSERT INTO app_tags (name) VALUES ('rust');",
    )
    .unwrap();

    let config = KeeperConfig {
        migrations_dir: Some(migrations),
        ..KeeperConfig::default()
    };
    let extra = vec![MigrationStep::from_fn(1, "create tags", |tx| {
        tx.execute_batch("CREATE TABLE IF NOT EXISTS app_tags (name TEXT NOT NULL)")
    })];

    let mut db = Database::from_config(&config, extra).unwrap();
    assert_eq!(db.latest_version(), SchemaVersion::new(2));

    db.connect().unwrap();
    let report = db.ensure_latest().unwrap();
    assert_eq!(report.applied, vec![SchemaVersion::new(1), SchemaVersion::new(2)]);

    let tags: i64 = db
        .connection()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM app_tags", [], |r| r.get(0))
        .unwrap();
    assert_eq!(tags, 1);
}
