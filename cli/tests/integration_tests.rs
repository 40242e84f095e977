use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;

use rusqlite::Connection;
use schema_keeper_sqlite::MigrationLock;
use tempfile::TempDir;

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_schema-keeper")
}

/// Writes a config with a `users` table and two migration scripts.
fn write_project(dir: &TempDir, lock: bool) -> PathBuf {
    let migrations = dir.path().join("migrations");
    fs::create_dir_all(&migrations).expect("failed to create migrations dir");
    fs::write(
        migrations.join("0001_seed_admin.sql"),
        "INSERT INTO app_users (id, name) VALUES (1, 'admin');",
    )
    .expect("failed to write script");
    fs::write(
        migrations.join("0002_index_names.sql"),
        "CREATE INDEX IF NOT EXISTS app_users_name ON app_users (name);",
    )
    .expect("failed to write script");

    let yaml = format!(
        r#"database:
  path: app.db
prefix: app_
advisory_lock: {lock}
migrations_dir: migrations
tables:
  - name: users
    columns:
      - {{ name: id, type: integer, primary_key: true }}
      - {{ name: name, type: text }}
"#
    );
    let path = dir.path().join("schema-keeper.yml");
    fs::write(&path, yaml).expect("failed to write config");
    path
}

fn run(args: &[&str], config: &Path) -> Output {
    std::process::Command::new(bin())
        .args(args)
        .args(["--config", config.to_str().unwrap()])
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run schema-keeper")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ---------------------------------------------------------------------------
// up / setup
// ---------------------------------------------------------------------------

#[test]
fn up_applies_scripts_then_is_noop() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, false);

    let first = run(&["up"], &config);
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    assert!(stdout(&first).contains("Upgraded schema from version 0 to 2."));
    assert!(dir.path().join("app.db").exists());

    let second = run(&["up"], &config);
    assert!(second.status.success(), "stderr: {}", stderr(&second));
    assert!(stdout(&second).contains("Schema is up to date at version 2."));

    let conn = Connection::open(dir.path().join("app.db")).unwrap();
    let admins: i64 = conn
        .query_row("SELECT COUNT(*) FROM app_users WHERE name = 'admin'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(admins, 1);
}

#[test]
fn up_json_report() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, false);

    let output = run(&["up", "--format", "json"], &config);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["from"], 0);
    assert_eq!(report["to"], 2);
    assert_eq!(report["applied"], serde_json::json!([1, 2]));
}

#[test]
fn setup_creates_tables_without_migrating() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, false);

    let output = run(&["setup"], &config);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Setup complete."));

    let conn = Connection::open(dir.path().join("app.db")).unwrap();
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM app_users", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 0);
}

#[test]
fn up_fails_on_unreachable_database() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, false);
    let yaml = fs::read_to_string(&config)
        .unwrap()
        .replace("path: app.db", "path: missing/dir/app.db");
    fs::write(&config, yaml).unwrap();

    let output = run(&["up"], &config);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("error: Failed to connect"));
}

#[test]
fn up_blocked_by_lock_until_forced() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, true);
    let db_path = dir.path().join("app.db");

    {
        let conn = Connection::open(&db_path).unwrap();
        let _stale = MigrationLock::acquire(&conn, "app_", "crashed-worker").unwrap();
    }

    let blocked = run(&["up"], &config);
    assert!(!blocked.status.success());
    assert!(stderr(&blocked).contains("crashed-worker"));

    let forced = run(&["up", "--force-unlock"], &config);
    assert!(forced.status.success(), "stderr: {}", stderr(&forced));
    assert!(stderr(&forced).contains("Removed migration lock held by crashed-worker"));
    assert!(stdout(&forced).contains("to 2."));
}

// ---------------------------------------------------------------------------
// status / history
// ---------------------------------------------------------------------------

#[test]
fn status_reports_lifecycle() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, false);

    run(&["setup"], &config);
    let before = run(&["status", "--format", "json"], &config);
    assert!(before.status.success(), "stderr: {}", stderr(&before));
    let value: serde_json::Value = serde_json::from_str(&stdout(&before)).unwrap();
    assert_eq!(value["status"]["status"], "needs_migration");
    assert_eq!(value["latest"], 2);

    run(&["up"], &config);
    let after = run(&["status"], &config);
    assert!(after.status.success(), "stderr: {}", stderr(&after));
    let text = stdout(&after);
    assert!(text.contains("up to date at version 2"));
    assert!(text.contains("app_users"));
}

#[test]
fn status_does_not_create_missing_database() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, false);

    let output = run(&["status"], &config);
    assert!(!output.status.success());
    assert!(stderr(&output).starts_with("error:"));
    assert!(!dir.path().join("app.db").exists());
}

#[test]
fn history_lists_applied_steps() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, false);
    run(&["up"], &config);

    let output = run(&["history", "--format", "json"], &config);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let steps: Vec<serde_json::Value> = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["version"], 1);
    assert_eq!(steps[0]["description"], "seed admin");
    assert_eq!(steps[1]["checksum"].as_str().map(str::len), Some(64));

    let text = run(&["history"], &config);
    assert!(stdout(&text).contains("index names"));
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[test]
fn validate_accepts_project() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, false);

    let output = run(&["validate"], &config);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("1 tables, migrations up to version 2"));
    assert!(!dir.path().join("app.db").exists());
}

#[test]
fn validate_rejects_forward_reference() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.yml");
    fs::write(
        &config,
        r#"tables:
  - name: clips
    columns:
      - { name: id, type: integer, primary_key: true }
      - { name: owner, type: integer }
    foreign_keys:
      - { column: owner, table: users, references: id }
  - name: users
    columns:
      - { name: id, type: integer, primary_key: true }
"#,
    )
    .unwrap();

    let output = run(&["validate"], &config);
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("error: Invalid table registry"));
    assert!(err.contains("users"));
}

#[test]
fn validate_rejects_version_gap() {
    let dir = TempDir::new().unwrap();
    let config = write_project(&dir, false);
    fs::write(
        dir.path().join("migrations").join("0004_gap.sql"),
        "SELECT 1;",
    )
    .unwrap();

    let output = run(&["validate"], &config);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("error: Invalid configuration"));
}

#[test]
fn missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    let output = run(&["validate"], &dir.path().join("nope.yml"));
    assert!(!output.status.success());
    assert!(stderr(&output).contains("error: Failed to load config"));
}
