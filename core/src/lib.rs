//! Versioned SQL migration engine.
//!
//! This crate discovers migration files, splits them into up/down statement
//! blocks, and applies or reverts them against a storage backend while
//! keeping a bookkeeping table of applied versions.
//!
//! - [`Migrator`]: the engine: `up`, `down`, `redo`, `status`,
//!   `db_version`.
//! - [`Driver`]: the contract a storage backend implements; backends are
//!   selected by URL scheme through a [`DriverRegistry`].
//! - [`parse_migration`]: splits a migration source at its
//!   `-- +sqlmigrate Up` / `-- +sqlmigrate Down` markers.
//! - [`memory`]: an in-memory backend for tests.
//!
//! # Migration files
//!
//! Files are named `<version>_<slug>.sql`; the version is the integer before
//! the first underscore.
//!
//! ```text
//! -- +sqlmigrate Up
//! CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
//!
//! -- +sqlmigrate Down
//! DROP TABLE users;
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use sqlmigrate_core::{DriverRegistry, Migrator, MigratorConfig, memory};
//!
//! let mut registry = DriverRegistry::new();
//! memory::register(&mut registry);
//!
//! let config = MigratorConfig::new("memory://app", "./migrations");
//! let mut migrator = Migrator::new(&registry, &config).unwrap();
//! migrator.up().unwrap();
//! println!("current version: {}", migrator.db_version().unwrap());
//! ```

mod config;
mod create;
mod driver;
mod engine;
mod error;
mod migration;
mod parser;
mod status;

pub mod memory;

pub use config::{
    Config, ConfigError, DEFAULT_LOG_LEVEL, DEFAULT_MIGRATIONS_DIR, LoggerConfig, MigratorConfig,
    expand_vars,
};
pub use create::{create_migration, create_migration_at, migration_template, snake_case};
pub use driver::{Driver, DriverFactory, DriverRegistry, scheme_of};
pub use engine::{DEFAULT_TABLE_NAME, Migrator, find_available_migrations};
pub use error::{Direction, DriverError, DriverResult, MigrateError, Result};
pub use migration::{AppliedVersion, MIGRATION_SUFFIX, Migration, version_from_filename};
pub use parser::{DOWN_MARKER, ParseError, ParsedMigration, UP_MARKER, parse_migration, parse_migration_str};
pub use status::reconcile;
