//! Migration and applied-version types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File suffix a migration must carry to be discovered.
pub const MIGRATION_SUFFIX: &str = ".sql";

/// One discoverable unit of schema change.
///
/// Built fresh on every discovery scan. Only [`applied_at`](Self::applied_at)
/// changes after construction, during status reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Ordering key taken from the filename prefix.
    pub version: i64,
    /// File name the migration was loaded from.
    pub source: String,
    /// When the migration was applied, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    /// Statements to run when applying.
    #[serde(skip)]
    pub up_statements: String,
    /// Statements to run when rolling back.
    #[serde(skip)]
    pub down_statements: String,
}

impl Migration {
    /// Creates a migration that has not been applied.
    pub fn new(
        version: i64,
        source: impl Into<String>,
        up_statements: impl Into<String>,
        down_statements: impl Into<String>,
    ) -> Self {
        Self {
            version,
            source: source.into(),
            applied_at: None,
            up_statements: up_statements.into(),
            down_statements: down_statements.into(),
        }
    }
}

/// A bookkeeping row persisted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedVersion {
    /// Applied migration version.
    pub version: i64,
    /// When the version was recorded.
    pub applied_at: DateTime<Utc>,
}

/// Extracts the version from a migration file name.
///
/// The version is the text before the first underscore, parsed as an `i64`.
/// Prefixes that do not parse yield `0`; discovery rejects the resulting
/// collisions.
///
/// # Examples
///
/// ```
/// use sqlmigrate_core::version_from_filename;
///
/// assert_eq!(version_from_filename("1234567_qwerty_test_migration.sql"), 1234567);
/// assert_eq!(version_from_filename("init_schema.sql"), 0);
/// ```
pub fn version_from_filename(filename: &str) -> i64 {
    let prefix = filename.split('_').next().unwrap_or_default();
    prefix.parse().unwrap_or(0)
}
