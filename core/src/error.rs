//! Error types for the migration engine.
//!
//! Three families of errors are surfaced:
//!
//! - **informational** conditions ([`MigrateError::NoAvailableMigrations`],
//!   [`MigrateError::AlreadyUpToDate`], [`MigrateError::NoCurrentVersion`])
//!   that a caller usually reports and then exits cleanly on;
//! - **driver** failures ([`DriverError`]), including lock contention;
//! - **structural** failures: unreadable directories, malformed migration
//!   files, version collisions and failed statement blocks.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::parser::ParseError;

/// Direction a migration is executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Applying the up block.
    Up,
    /// Applying the down block.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Errors reported by a [`Driver`](crate::Driver) or the
/// [`DriverRegistry`](crate::DriverRegistry).
#[derive(Debug, Error)]
pub enum DriverError {
    /// The connection string has no `scheme:` prefix.
    #[error("can't get driver from dsn string '{0}'")]
    ParseDsn(String),

    /// No factory is registered for the scheme.
    #[error("unknown driver '{0}'")]
    UnknownDriver(String),

    /// The backend lock is held by someone else.
    #[error("can't acquire lock")]
    Locked,

    /// Unlock was requested while the lock was not held.
    #[error("can't unlock, as not currently locked")]
    NotLocked,

    /// The driver rejected its configuration (URL, table name, ...).
    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl DriverError {
    /// Wraps any backend error (or message) into [`DriverError::Backend`].
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        DriverError::Backend(err.into())
    }
}

/// Convenience alias for driver results.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The migrations directory holds no `.sql` files.
    #[error("no available migrations found")]
    NoAvailableMigrations,

    /// Nothing left to apply (or roll back) in the requested direction.
    #[error("already up to date")]
    AlreadyUpToDate,

    /// No applied version is recorded, or the recorded version has no file.
    #[error("no current version found, please check your database state")]
    NoCurrentVersion,

    /// The driver could not be resolved or opened.
    #[error("can't get driver: {0}")]
    OpenDriver(#[source] DriverError),

    /// The bookkeeping table could not be prepared.
    #[error("can't initialize table '{table}': {source}")]
    PrepareTable {
        table: String,
        #[source]
        source: DriverError,
    },

    /// The backend lock could not be acquired.
    #[error("can't lock database: {0}")]
    Lock(#[source] DriverError),

    /// The backend lock could not be released. Any error raised before the
    /// unlock attempt is kept in `prior`.
    #[error(
        "can't unlock from database driver: {source}{}",
        .prior.as_ref().map(|p| format!("; additional error: {p}")).unwrap_or_default()
    )]
    Unlock {
        #[source]
        source: DriverError,
        prior: Option<Box<MigrateError>>,
    },

    /// A statement block failed against the backend.
    #[error("can't execute {direction} migration with version {version}: {source}")]
    Execution {
        version: i64,
        direction: Direction,
        #[source]
        source: DriverError,
    },

    /// Any other driver call failed (listing, version lookup).
    #[error("{context}: {source}")]
    Driver {
        context: &'static str,
        #[source]
        source: DriverError,
    },

    /// The migrations directory could not be listed.
    #[error("can't read migrations directory '{}': {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A migration file could not be read.
    #[error("error while reading '{}': {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A migration file has invalid markers.
    #[error("error while parsing file {file}: {source}")]
    MalformedMigration {
        file: String,
        #[source]
        source: ParseError,
    },

    /// Two migration files resolve to the same version.
    #[error("duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: i64,
        first: String,
        second: String,
    },

    /// A new migration file could not be created.
    #[error("can't create migration: {0}")]
    Create(String),
}

impl MigrateError {
    /// Returns `true` for conditions a caller should report rather than
    /// treat as an operational failure.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            MigrateError::NoAvailableMigrations
                | MigrateError::AlreadyUpToDate
                | MigrateError::NoCurrentVersion
        )
    }

    /// Returns `true` if the error originates from lock contention.
    pub fn is_locked(&self) -> bool {
        matches!(self, MigrateError::Lock(DriverError::Locked))
    }
}

/// Convenience alias for results with [`MigrateError`].
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_informational_errors() {
        assert!(MigrateError::NoAvailableMigrations.is_informational());
        assert!(MigrateError::AlreadyUpToDate.is_informational());
        assert!(MigrateError::NoCurrentVersion.is_informational());
        assert!(!MigrateError::Lock(DriverError::Locked).is_informational());
    }

    #[test]
    fn test_unlock_error_keeps_prior_error() {
        let err = MigrateError::Unlock {
            source: DriverError::NotLocked,
            prior: Some(Box::new(MigrateError::Execution {
                version: 7,
                direction: Direction::Up,
                source: DriverError::backend("syntax error"),
            })),
        };
        let message = err.to_string();
        assert!(message.contains("not currently locked"));
        assert!(message.contains("version 7"));
        assert!(message.contains("syntax error"));
    }

    #[test]
    fn test_unlock_error_without_prior() {
        let err = MigrateError::Unlock {
            source: DriverError::NotLocked,
            prior: None,
        };
        assert!(!err.to_string().contains("additional error"));
    }

    #[test]
    fn test_is_locked() {
        assert!(MigrateError::Lock(DriverError::Locked).is_locked());
        assert!(!MigrateError::Lock(DriverError::NotLocked).is_locked());
    }
}
