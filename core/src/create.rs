//! Scaffolding of new migration files.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{MigrateError, Result};
use crate::migration::MIGRATION_SUFFIX;
use crate::parser::{DOWN_MARKER, UP_MARKER};

/// Body written into every new migration.
pub fn migration_template() -> String {
    format!("{UP_MARKER}\nSELECT 'up SQL query';\n\n{DOWN_MARKER}\nSELECT 'down SQL query';\n")
}

/// Creates `<unix millis>_<snake name>.sql` in `dir` from the template and
/// returns its path. The directory is created if needed.
///
/// # Errors
///
/// Returns [`MigrateError::Create`] for an empty name, an existing file, or
/// an I/O failure.
pub fn create_migration(dir: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    create_migration_at(dir, name, Utc::now())
}

/// Like [`create_migration`] with an explicit timestamp for the version.
pub fn create_migration_at(
    dir: impl AsRef<Path>,
    name: &str,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let slug = snake_case(name.trim());
    if slug.is_empty() {
        return Err(MigrateError::Create("no migration name was set".into()));
    }

    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| {
        MigrateError::Create(format!(
            "failed to create migration folder '{}': {e}",
            dir.display()
        ))
    })?;

    let filename = format!("{}_{slug}{MIGRATION_SUFFIX}", now.timestamp_millis());
    let path = dir.join(&filename);
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => {
                MigrateError::Create(format!("migration '{}' already exists", path.display()))
            }
            _ => MigrateError::Create(format!(
                "failed to create migration file '{}': {e}",
                path.display()
            )),
        })?;

    file.write_all(migration_template().as_bytes()).map_err(|e| {
        MigrateError::Create(format!("failed to write '{}': {e}", path.display()))
    })?;

    info!("Success create new migration {filename}");
    Ok(path)
}

/// Converts a free-form name to snake_case.
///
/// Separators (`+ - . / , _` and whitespace) become `_`, and an upper-case
/// letter next to a lower-case one starts a new word.
///
/// ```
/// use sqlmigrate_core::snake_case;
///
/// assert_eq!(snake_case("TestMigrationSQL"), "test_migration_sql");
/// assert_eq!(snake_case("Test.migration.SQL"), "test_migration_sql");
/// ```
pub fn snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if matches!(c, '+' | '-' | '.' | '/' | ',' | '_') || c.is_whitespace() {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }

        if c.is_uppercase() {
            let prev_lower = i > 0 && chars[i - 1].is_lowercase();
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if i > 0 && (prev_lower || next_lower) && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out.trim_matches('_').to_string()
}
