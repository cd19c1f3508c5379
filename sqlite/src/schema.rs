//! SQL generation for the bookkeeping table.
//!
//! `{table}` holds one row per applied version with its `applied_at`. The
//! migration lock is not stored in the database; see the driver module.
//!
//! Table names are interpolated into SQL, so they must contain only
//! alphanumeric characters and underscores.

use crate::error::{Result, SqliteError};

/// Validates that a table name contains only alphanumeric characters and
/// underscores.
pub(crate) fn validate_table_name(table: &str) -> Result<()> {
    if table.is_empty() {
        return Err(SqliteError::InvalidTableName(table.to_string()));
    }
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SqliteError::InvalidTableName(table.to_string()));
    }
    Ok(())
}

/// Generates the idempotent DDL for the bookkeeping table.
///
/// # Errors
///
/// Returns [`SqliteError::InvalidTableName`] if the name is empty or contains
/// characters other than alphanumerics and underscores.
pub fn generate_table_sql(table: &str) -> Result<String> {
    validate_table_name(table)?;

    let sql = format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER NOT NULL UNIQUE,
    applied_at TEXT NOT NULL
);
"#
    );

    Ok(sql)
}
