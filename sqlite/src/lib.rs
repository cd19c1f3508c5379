//! SQLite storage backend for the migration engine.
//!
//! Provides [`SqliteDriver`], an implementation of
//! [`Driver`](sqlmigrate_core::Driver) that keeps applied versions in a
//! bookkeeping table and serializes migrators through a lock file held for
//! the lifetime of the locking session.
//!
//! # Architecture
//!
//! - **`schema`**: DDL for the bookkeeping table
//! - **`driver`**: the [`Driver`](sqlmigrate_core::Driver) implementation
//!
//! # Quick start
//!
//! ```no_run
//! use sqlmigrate_core::{DriverRegistry, Migrator, MigratorConfig};
//!
//! let mut registry = DriverRegistry::new();
//! sqlmigrate_sqlite::register(&mut registry);
//!
//! let config = MigratorConfig::new("sqlite://app.db", "./migrations");
//! let mut migrator = Migrator::new(&registry, &config).unwrap();
//! migrator.up().unwrap();
//! ```
//!
//! # URLs
//!
//! Both `sqlite` and `sqlite3` schemes are registered. The path follows the
//! scheme, with or without a `//` prefix; `:memory:` opens a private
//! in-memory database.

use std::sync::Arc;

use sqlmigrate_core::{Driver, DriverRegistry, DriverResult};

mod driver;
mod error;
mod schema;

pub use driver::{LOCK_FILE_EXTENSION, MEMORY_PATH, SqliteDriver};
pub use error::{Result, SqliteError};
pub use schema::generate_table_sql;

/// URL schemes served by this backend.
pub const SCHEMES: [&str; 2] = ["sqlite", "sqlite3"];

/// Opens a [`SqliteDriver`] for `url` as a boxed [`Driver`].
///
/// # Errors
///
/// Returns [`DriverError::InvalidConfig`](sqlmigrate_core::DriverError::InvalidConfig)
/// for a malformed URL or table name, and a backend error if the database
/// cannot be opened.
pub fn open(url: &str, table_name: &str) -> DriverResult<Box<dyn Driver>> {
    let driver = SqliteDriver::open(url, table_name)?;
    Ok(Box::new(driver))
}

/// Registers this backend for every scheme in [`SCHEMES`].
///
/// # Panics
///
/// Panics if either scheme is already registered.
pub fn register(registry: &mut DriverRegistry) {
    let factory: Arc<dyn sqlmigrate_core::DriverFactory> = Arc::new(open);
    for scheme in SCHEMES {
        registry.register_shared(scheme, Arc::clone(&factory));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_both_schemes() {
        let mut registry = DriverRegistry::new();
        register(&mut registry);
        assert!(registry.contains("sqlite"));
        assert!(registry.contains("sqlite3"));
    }

    #[test]
    #[should_panic(expected = "driver registered twice")]
    fn test_register_twice_panics() {
        let mut registry = DriverRegistry::new();
        register(&mut registry);
        register(&mut registry);
    }

    #[test]
    fn test_open_via_registry() {
        let mut registry = DriverRegistry::new();
        register(&mut registry);
        let mut driver = registry.open("sqlite3::memory:", "migrations").unwrap();
        driver.prepare_table().unwrap();
        assert_eq!(driver.version().unwrap(), -1);
        driver.close().unwrap();
    }
}
