//! Integration tests for the sqlmigrate-sqlite crate.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use sqlmigrate_core::{
    Driver, DriverError, DriverRegistry, MigrateError, Migrator, MigratorConfig,
};
use sqlmigrate_sqlite::SqliteDriver;
use tempfile::TempDir;

/// Writes a migration file with the given up/down blocks.
fn write_migration(dir: &Path, name: &str, up: &str, down: &str) {
    let body = format!("-- +sqlmigrate Up\n{up}\n\n-- +sqlmigrate Down\n{down}\n");
    fs::write(dir.join(name), body).unwrap();
}

/// Workspace with a database file and a migrations directory.
struct Workspace {
    root: TempDir,
    registry: DriverRegistry,
}

impl Workspace {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("migrations")).unwrap();
        let mut registry = DriverRegistry::new();
        sqlmigrate_sqlite::register(&mut registry);
        Self { root, registry }
    }

    fn db_path(&self) -> PathBuf {
        self.root.path().join("app.db")
    }

    fn dsn(&self) -> String {
        format!("sqlite://{}", self.db_path().display())
    }

    fn migrations(&self) -> PathBuf {
        self.root.path().join("migrations")
    }

    fn migrator(&self) -> Migrator {
        let config = MigratorConfig::new(self.dsn(), self.migrations());
        Migrator::new(&self.registry, &config).unwrap()
    }

    /// Separate driver session on the same database, as another process would
    /// open it.
    fn session(&self) -> SqliteDriver {
        SqliteDriver::open(&self.dsn(), "migrations").unwrap()
    }

    /// Independent connection for inspecting the database.
    fn inspect(&self) -> Connection {
        Connection::open(self.db_path()).unwrap()
    }

    fn table_exists(&self, name: &str) -> bool {
        let count: i64 = self
            .inspect()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    fn column_names(&self, table: &str) -> Vec<String> {
        let conn = self.inspect();
        let mut stmt = conn
            .prepare(&format!("SELECT name FROM pragma_table_info('{table}')"))
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    fn seed_scenario(&self) {
        write_migration(
            &self.migrations(),
            "1_create_users.sql",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
            "DROP TABLE users;",
        );
        write_migration(
            &self.migrations(),
            "2_add_email.sql",
            "ALTER TABLE users ADD COLUMN email TEXT;",
            "ALTER TABLE users DROP COLUMN email;",
        );
        write_migration(
            &self.migrations(),
            "3_create_posts.sql",
            "CREATE TABLE posts (\n    id INTEGER PRIMARY KEY,\n    user_id INTEGER REFERENCES users(id)\n);\nCREATE INDEX posts_user ON posts (user_id);",
            "DROP INDEX posts_user;\nDROP TABLE posts;",
        );
    }
}

// ---------------------------------------------------------------------------
// Lifecycle against a real database file
// ---------------------------------------------------------------------------

#[test]
fn test_up_down_lifecycle() {
    let ws = Workspace::new();
    ws.seed_scenario();
    let mut migrator = ws.migrator();

    assert!(ws.table_exists("migrations"));
    assert!(!ws.table_exists("migrations_lock"));

    migrator.up().unwrap();
    assert!(ws.table_exists("users"));
    assert!(ws.table_exists("posts"));
    assert!(ws.column_names("users").contains(&"email".to_string()));
    assert_eq!(migrator.db_version().unwrap(), 3);

    migrator.down().unwrap();
    assert!(!ws.table_exists("posts"));
    assert_eq!(migrator.db_version().unwrap(), 2);

    migrator.down().unwrap();
    assert!(!ws.column_names("users").contains(&"email".to_string()));
    assert_eq!(migrator.db_version().unwrap(), 1);

    migrator.close().unwrap();
}

#[test]
fn test_up_twice_reports_up_to_date() {
    let ws = Workspace::new();
    ws.seed_scenario();
    let mut migrator = ws.migrator();

    migrator.up().unwrap();
    assert!(matches!(migrator.up(), Err(MigrateError::AlreadyUpToDate)));
}

#[test]
fn test_state_survives_reopen() {
    let ws = Workspace::new();
    ws.seed_scenario();

    let mut first = ws.migrator();
    first.up().unwrap();
    first.close().unwrap();

    let mut second = ws.migrator();
    let status = second.status().unwrap();
    assert_eq!(
        status.iter().map(|m| m.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(status.iter().all(|m| m.applied_at.is_some()));
    assert_eq!(status[0].source, "1_create_users.sql");
}

#[test]
fn test_redo_reapplies_current_version() {
    let ws = Workspace::new();
    ws.seed_scenario();
    let mut migrator = ws.migrator();
    migrator.up().unwrap();

    ws.inspect()
        .execute("INSERT INTO posts (id, user_id) VALUES (1, NULL)", [])
        .unwrap();
    migrator.redo().unwrap();

    let rows: i64 = ws
        .inspect()
        .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(migrator.db_version().unwrap(), 3);
}

#[test]
fn test_custom_table_name() {
    let ws = Workspace::new();
    ws.seed_scenario();
    let config = MigratorConfig::new(ws.dsn(), ws.migrations()).with_table_name("schema_versions");
    let mut migrator = Migrator::new(&ws.registry, &config).unwrap();
    migrator.up().unwrap();

    assert!(ws.table_exists("schema_versions"));
    assert!(ws.root.path().join("app.db.schema_versions.lock").exists());
    assert!(!ws.table_exists("migrations"));
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[test]
fn test_failing_migration_is_rolled_back_and_stops_up() {
    let ws = Workspace::new();
    write_migration(
        &ws.migrations(),
        "1_create_users.sql",
        "CREATE TABLE users (id INTEGER PRIMARY KEY);",
        "DROP TABLE users;",
    );
    write_migration(
        &ws.migrations(),
        "2_broken.sql",
        "CREATE TABLE audit (id INTEGER);\nINSERT INTO missing_table VALUES (1);",
        "DROP TABLE audit;",
    );
    write_migration(
        &ws.migrations(),
        "3_create_posts.sql",
        "CREATE TABLE posts (id INTEGER PRIMARY KEY);",
        "DROP TABLE posts;",
    );
    let mut migrator = ws.migrator();

    let err = migrator.up().unwrap_err();
    assert!(matches!(err, MigrateError::Execution { version: 2, .. }));

    assert!(ws.table_exists("users"));
    assert!(!ws.table_exists("audit"));
    assert!(!ws.table_exists("posts"));
    assert_eq!(migrator.db_version().unwrap(), 1);

    ws.session().lock().unwrap();
}

#[test]
fn test_second_migrator_is_locked_out() {
    let ws = Workspace::new();
    ws.seed_scenario();
    let mut migrator = ws.migrator();

    let mut holder = ws.session();
    holder.lock().unwrap();

    let err = migrator.up().unwrap_err();
    assert!(err.is_locked());
    assert!(!ws.table_exists("users"));

    holder.unlock().unwrap();
    migrator.up().unwrap();
    assert!(ws.table_exists("users"));
}

#[test]
fn test_lock_from_abandoned_session_does_not_block() {
    let ws = Workspace::new();
    ws.seed_scenario();

    let mut abandoned = ws.session();
    abandoned.lock().unwrap();
    drop(abandoned);

    let mut fresh = ws.session();
    assert!(matches!(fresh.unlock(), Err(DriverError::NotLocked)));
    drop(fresh);

    let mut migrator = ws.migrator();
    migrator.up().unwrap();
    assert_eq!(migrator.db_version().unwrap(), 3);
    migrator.close().unwrap();
}

#[test]
fn test_invalid_table_name_is_rejected() {
    let ws = Workspace::new();
    let config = MigratorConfig::new(ws.dsn(), ws.migrations()).with_table_name("bad;name");
    let err = Migrator::new(&ws.registry, &config).err().unwrap();
    assert!(matches!(err, MigrateError::OpenDriver(_)));
}
