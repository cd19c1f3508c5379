//! Error types for the SQLite driver.

use sqlmigrate_core::DriverError;
use thiserror::Error;

/// Errors that can occur inside the SQLite driver.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database operation failure.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// Table name contains invalid characters.
    #[error("invalid table name '{0}': must contain only alphanumeric characters and underscores")]
    InvalidTableName(String),

    /// Connection URL does not name a database.
    #[error("invalid sqlite url '{0}'")]
    InvalidUrl(String),

    /// A stored `applied_at` value is not RFC 3339.
    #[error("invalid applied_at timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

impl From<SqliteError> for DriverError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::InvalidTableName(_) | SqliteError::InvalidUrl(_) => {
                DriverError::InvalidConfig(err.to_string())
            }
            other => DriverError::backend(other),
        }
    }
}

/// Convenience alias for results with [`SqliteError`].
pub type Result<T> = std::result::Result<T, SqliteError>;
