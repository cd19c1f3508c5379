//! [`Driver`] implementation over a SQLite connection.
//!
//! Statement blocks run inside a transaction, so a failing block leaves no
//! partial effect.
//!
//! Mutual exclusion uses a lock file next to the database
//! (`<database>.<table>.lock`). Holding the lock means holding an open
//! `BEGIN EXCLUSIVE` transaction on that file through a dedicated
//! connection. The lock lives exactly as long as that connection: it is
//! released by [`unlock`](Driver::unlock), by dropping the driver, or by the
//! operating system when the process dies.
//!
//! # Example
//!
//! ```no_run
//! use sqlmigrate_core::Driver;
//! use sqlmigrate_sqlite::SqliteDriver;
//!
//! let mut driver = SqliteDriver::open("sqlite://app.db", "migrations").unwrap();
//! driver.prepare_table().unwrap();
//!
//! driver.lock().unwrap();
//! driver.run("CREATE TABLE users (id INTEGER PRIMARY KEY);").unwrap();
//! driver.set_version(1).unwrap();
//! driver.unlock().unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode};
use sqlmigrate_core::{AppliedVersion, Driver, DriverError, DriverResult};
use tracing::debug;

use crate::error::{Result, SqliteError};
use crate::schema::{generate_table_sql, validate_table_name};

/// Path that opens a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Extension appended to `<database>.<table>` to name the lock file.
pub const LOCK_FILE_EXTENSION: &str = "lock";

/// An acquired migration lock.
enum LockHandle {
    /// Private in-memory database; no other session can reach it.
    Local,
    /// Connection holding `BEGIN EXCLUSIVE` on the lock file.
    File(Connection),
}

/// Migration driver backed by one SQLite connection.
pub struct SqliteDriver {
    conn: Connection,
    table: String,
    lock_path: Option<PathBuf>,
    lock: Option<LockHandle>,
}

impl SqliteDriver {
    /// Opens the database named by `url` (`sqlite://<path>`,
    /// `sqlite:<path>` or `sqlite://:memory:`).
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::InvalidUrl`] if the URL names no database,
    /// [`SqliteError::InvalidTableName`] for a bad table name, or
    /// [`SqliteError::DatabaseError`] if the file cannot be opened.
    pub fn open(url: &str, table: &str) -> Result<Self> {
        let path = database_path(url)?;
        let conn = if path == MEMORY_PATH {
            Connection::open_in_memory()?
        } else {
            Connection::open(Path::new(path))?
        };
        debug!(path, table, "opened sqlite database");
        Self::from_connection(conn, table)
    }

    /// Wraps an existing connection.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::InvalidTableName`] for a bad table name.
    pub fn from_connection(conn: Connection, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let lock_path = conn
            .path()
            .filter(|path| !path.is_empty())
            .map(|path| lock_file_path(Path::new(path), table));
        Ok(Self {
            conn,
            table: table.to_string(),
            lock_path,
            lock: None,
        })
    }

    /// Path of the lock file, or `None` for an in-memory database.
    pub fn lock_path(&self) -> Option<&Path> {
        self.lock_path.as_deref()
    }

    /// Returns a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Opens the lock file and takes an exclusive transaction on it.
    ///
    /// Contention surfaces as `SQLITE_BUSY` (no busy timeout is set) and is
    /// reported as [`DriverError::Locked`].
    fn acquire_file_lock(path: &Path) -> DriverResult<Connection> {
        let acquire = || -> rusqlite::Result<Connection> {
            let conn = Connection::open(path)?;
            conn.busy_timeout(Duration::ZERO)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS holder (id INTEGER PRIMARY KEY CHECK (id = 1));
                 BEGIN EXCLUSIVE;",
            )?;
            Ok(conn)
        };
        match acquire() {
            Ok(conn) => Ok(conn),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                Err(DriverError::Locked)
            }
            Err(err) => Err(SqliteError::from(err).into()),
        }
    }

    fn applied_rows(&self) -> Result<Vec<AppliedVersion>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT version, applied_at FROM {} ORDER BY version",
            self.table
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(version, value)| {
                let applied_at = DateTime::parse_from_rfc3339(&value)
                    .map_err(|source| SqliteError::InvalidTimestamp {
                        value: value.clone(),
                        source,
                    })?
                    .with_timezone(&Utc);
                Ok(AppliedVersion {
                    version,
                    applied_at,
                })
            })
            .collect()
    }
}

impl Driver for SqliteDriver {
    fn close(self: Box<Self>) -> DriverResult<()> {
        let SqliteDriver { conn, lock, .. } = *self;
        let released = lock.map_or(Ok(()), release);
        conn.close()
            .map_err(|(_, err)| DriverError::from(SqliteError::from(err)))?;
        released
    }

    fn lock(&mut self) -> DriverResult<()> {
        if self.lock.is_some() {
            return Err(DriverError::Locked);
        }
        let handle = match &self.lock_path {
            Some(path) => LockHandle::File(Self::acquire_file_lock(path)?),
            None => LockHandle::Local,
        };
        debug!(table = %self.table, "acquired migration lock");
        self.lock = Some(handle);
        Ok(())
    }

    fn unlock(&mut self) -> DriverResult<()> {
        let handle = self.lock.take().ok_or(DriverError::NotLocked)?;
        release(handle)
    }

    fn run(&mut self, statements: &str) -> DriverResult<()> {
        if statements.trim().is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction().map_err(SqliteError::from)?;
        tx.execute_batch(statements).map_err(SqliteError::from)?;
        tx.commit().map_err(SqliteError::from)?;
        Ok(())
    }

    fn set_version(&mut self, version: i64) -> DriverResult<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (version, applied_at) VALUES (?1, ?2)",
                    self.table
                ),
                rusqlite::params![version, now_rfc3339()],
            )
            .map_err(SqliteError::from)?;
        Ok(())
    }

    fn delete_version(&mut self, version: i64) -> DriverResult<()> {
        self.conn
            .execute(
                &format!("DELETE FROM {} WHERE version = ?1", self.table),
                [version],
            )
            .map_err(SqliteError::from)?;
        Ok(())
    }

    fn version(&mut self) -> DriverResult<i64> {
        let version: Option<i64> = self
            .conn
            .query_row(&format!("SELECT MAX(version) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(SqliteError::from)?;
        Ok(version.unwrap_or(-1))
    }

    fn list(&mut self) -> DriverResult<Vec<AppliedVersion>> {
        Ok(self.applied_rows()?)
    }

    fn prepare_table(&mut self) -> DriverResult<()> {
        let sql = generate_table_sql(&self.table)?;
        self.conn.execute_batch(&sql).map_err(SqliteError::from)?;
        Ok(())
    }
}

/// Ends the exclusive transaction and closes the lock connection.
fn release(handle: LockHandle) -> DriverResult<()> {
    match handle {
        LockHandle::Local => Ok(()),
        LockHandle::File(conn) => {
            conn.execute_batch("ROLLBACK;").map_err(SqliteError::from)?;
            conn.close()
                .map_err(|(_, err)| DriverError::from(SqliteError::from(err)))
        }
    }
}

/// Lock file used for `table` in the database at `db_path`.
fn lock_file_path(db_path: &Path, table: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(format!(".{table}.{LOCK_FILE_EXTENSION}"));
    PathBuf::from(name)
}

/// Extracts the database path from a `sqlite:` URL.
fn database_path(url: &str) -> Result<&str> {
    let rest = url
        .split_once(':')
        .map(|(_, rest)| rest)
        .ok_or_else(|| SqliteError::InvalidUrl(url.to_string()))?;
    let path = rest.strip_prefix("//").unwrap_or(rest);
    if path.is_empty() {
        return Err(SqliteError::InvalidUrl(url.to_string()));
    }
    Ok(path)
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}
