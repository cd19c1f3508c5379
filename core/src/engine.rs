//! The migration engine.
//!
//! [`Migrator`] discovers migration files, compares them against the
//! versions recorded by its [`Driver`], and applies or rolls back statement
//! blocks in version order. Every operation runs between
//! [`Driver::lock`] and [`Driver::unlock`]; an unlock failure is reported
//! together with any earlier error.
//!
//! # Example
//!
//! ```no_run
//! use sqlmigrate_core::{DriverRegistry, Migrator, MigratorConfig, memory};
//!
//! let mut registry = DriverRegistry::new();
//! memory::register(&mut registry);
//!
//! let config = MigratorConfig::new("memory://app", "migrations/");
//! let mut migrator = Migrator::new(&registry, &config).unwrap();
//!
//! match migrator.up() {
//!     Ok(()) => println!("migrated"),
//!     Err(err) if err.is_informational() => println!("{err}"),
//!     Err(err) => eprintln!("error: {err}"),
//! }
//!
//! for migration in migrator.status().unwrap() {
//!     println!("{} {}", migration.version, migration.source);
//! }
//! migrator.close().unwrap();
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::MigratorConfig;
use crate::driver::{Driver, DriverRegistry};
use crate::error::{Direction, MigrateError, Result};
use crate::migration::{MIGRATION_SUFFIX, Migration, version_from_filename};
use crate::parser::parse_migration_str;
use crate::status::{find_by_version, reconcile};

/// Bookkeeping table used when none is configured.
pub const DEFAULT_TABLE_NAME: &str = "migrations";

/// Applies and reverts migrations from one directory against one driver.
pub struct Migrator {
    driver: Box<dyn Driver>,
    table_name: String,
    dir: PathBuf,
}

impl Migrator {
    /// Resolves the driver for `config.dsn` and prepares its bookkeeping
    /// table.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::OpenDriver`] if the driver cannot be resolved
    /// or opened, and [`MigrateError::PrepareTable`] if the table cannot be
    /// created.
    pub fn new(registry: &DriverRegistry, config: &MigratorConfig) -> Result<Self> {
        let table_name = config.table_name().to_string();
        let driver = registry
            .open(&config.dsn, &table_name)
            .map_err(MigrateError::OpenDriver)?;
        Self::with_driver(driver, table_name, &config.dir)
    }

    /// Builds a migrator around an already opened driver.
    ///
    /// An empty `table_name` falls back to [`DEFAULT_TABLE_NAME`].
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::PrepareTable`] if the table cannot be created;
    /// the driver is closed before returning.
    pub fn with_driver(
        mut driver: Box<dyn Driver>,
        table_name: impl Into<String>,
        dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let mut table_name = table_name.into();
        if table_name.is_empty() {
            table_name = DEFAULT_TABLE_NAME.to_string();
        }
        if let Err(source) = driver.prepare_table() {
            if let Err(err) = driver.close() {
                warn!(
                    table = %table_name,
                    error = %err,
                    "can't close driver after failed table preparation"
                );
            }
            return Err(MigrateError::PrepareTable {
                table: table_name,
                source,
            });
        }

        Ok(Self {
            driver,
            table_name,
            dir: dir.as_ref().to_path_buf(),
        })
    }

    /// Name of the bookkeeping table.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Directory migrations are discovered in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Applies every pending migration in ascending version order.
    ///
    /// With nothing applied yet, all available migrations run. Otherwise a
    /// migration runs when it is not applied and its version is greater than
    /// the lowest applied version. A failed block stops the batch; later
    /// migrations are not attempted.
    ///
    /// # Errors
    ///
    /// [`MigrateError::NoAvailableMigrations`] when the directory is empty,
    /// [`MigrateError::AlreadyUpToDate`] when nothing is pending,
    /// [`MigrateError::Execution`] when a block fails.
    pub fn up(&mut self) -> Result<()> {
        self.lock()?;
        let outcome = self.apply_pending();
        self.unlock(outcome)
    }

    /// Rolls back the most recently applied migration.
    ///
    /// # Errors
    ///
    /// [`MigrateError::AlreadyUpToDate`] when nothing is applied,
    /// [`MigrateError::NoCurrentVersion`] when the latest applied version has
    /// no file, [`MigrateError::Execution`] when the block fails.
    pub fn down(&mut self) -> Result<()> {
        self.lock()?;
        let outcome = self.rollback_latest();
        self.unlock(outcome)
    }

    /// Rolls back and immediately re-applies the current migration.
    ///
    /// A database with no applied version is left untouched and the call
    /// succeeds. If the rollback succeeds but the re-apply fails, the
    /// migration stays rolled back and the failure is returned.
    ///
    /// # Errors
    ///
    /// [`MigrateError::NoAvailableMigrations`] when the directory is empty,
    /// [`MigrateError::NoCurrentVersion`] when the applied version has no
    /// file, [`MigrateError::Execution`] when either block fails.
    pub fn redo(&mut self) -> Result<()> {
        self.lock()?;
        let outcome = self.redo_current();
        self.unlock(outcome)
    }

    /// Returns the applied migrations with their `applied_at`, ascending by
    /// version. Applied versions without a file are left out.
    pub fn status(&mut self) -> Result<Vec<Migration>> {
        self.lock()?;
        let outcome = self.reconcile_status();
        self.unlock(outcome)
    }

    /// Returns the current (highest applied) version.
    ///
    /// # Errors
    ///
    /// [`MigrateError::NoCurrentVersion`] when nothing is applied or the
    /// applied version has no file.
    pub fn db_version(&mut self) -> Result<i64> {
        self.lock()?;
        let outcome = self
            .find_available_migrations()
            .and_then(|available| self.current_migration(&available))
            .and_then(|current| current.ok_or(MigrateError::NoCurrentVersion))
            .map(|migration| {
                info!(version = migration.version, "current migration version");
                migration.version
            });
        self.unlock(outcome)
    }

    /// Lists every `.sql` migration in the directory, ascending by version.
    ///
    /// # Errors
    ///
    /// Any I/O or parse error aborts the scan. Two files with the same
    /// version yield [`MigrateError::DuplicateVersion`].
    pub fn find_available_migrations(&self) -> Result<Vec<Migration>> {
        find_available_migrations(&self.dir)
    }

    /// Closes the driver.
    pub fn close(self) -> Result<()> {
        self.driver.close().map_err(|source| MigrateError::Driver {
            context: "can't close driver",
            source,
        })
    }

    fn apply_pending(&mut self) -> Result<()> {
        let available = self.find_available_migrations()?;
        if available.is_empty() {
            return Err(MigrateError::NoAvailableMigrations);
        }

        let applied: BTreeSet<i64> = self.applied_versions()?;
        let targets: Vec<&Migration> = match applied.first() {
            None => available.iter().collect(),
            Some(&oldest) => available
                .iter()
                .filter(|m| !applied.contains(&m.version) && m.version > oldest)
                .collect(),
        };
        if targets.is_empty() {
            return Err(MigrateError::AlreadyUpToDate);
        }

        for migration in targets {
            self.execute(migration, Direction::Up)?;
        }
        Ok(())
    }

    fn rollback_latest(&mut self) -> Result<()> {
        let available = self.find_available_migrations()?;
        if available.is_empty() {
            return Err(MigrateError::NoAvailableMigrations);
        }

        let applied = self.applied_versions()?;
        let Some(&latest) = applied.last() else {
            return Err(MigrateError::AlreadyUpToDate);
        };

        let target = available
            .iter()
            .rev()
            .find(|m| m.version <= latest)
            .ok_or(MigrateError::AlreadyUpToDate)?;
        if target.version != latest {
            warn!(
                version = latest,
                "latest applied migration has no matching file"
            );
            return Err(MigrateError::NoCurrentVersion);
        }

        self.execute(target, Direction::Down)
    }

    fn redo_current(&mut self) -> Result<()> {
        let available = self.find_available_migrations()?;
        if available.is_empty() {
            return Err(MigrateError::NoAvailableMigrations);
        }

        let Some(current) = self.current_migration(&available)? else {
            info!("{}", MigrateError::NoCurrentVersion);
            return Ok(());
        };

        self.execute(&current, Direction::Down)?;
        self.execute(&current, Direction::Up)
    }

    fn reconcile_status(&mut self) -> Result<Vec<Migration>> {
        let applied = self.driver.list().map_err(|source| MigrateError::Driver {
            context: "can't get full list of applied migrations",
            source,
        })?;
        let available = self.find_available_migrations()?;
        Ok(reconcile(&applied, &available))
    }

    /// Resolves the highest applied version to its migration file.
    ///
    /// `Ok(None)` means nothing is applied; a recorded version without a
    /// file is [`MigrateError::NoCurrentVersion`].
    fn current_migration(&mut self, available: &[Migration]) -> Result<Option<Migration>> {
        let version = self.driver.version().map_err(|source| MigrateError::Driver {
            context: "can't get current migration",
            source,
        })?;
        if version < 0 {
            return Ok(None);
        }

        match find_by_version(available, version) {
            Some(migration) => Ok(Some(migration.clone())),
            None => {
                warn!(version, "current migration has no matching file");
                Err(MigrateError::NoCurrentVersion)
            }
        }
    }

    /// Runs one block and updates bookkeeping.
    ///
    /// A bookkeeping failure after a successful run is logged, not returned:
    /// the schema change has already happened.
    fn execute(&mut self, migration: &Migration, direction: Direction) -> Result<()> {
        let statements = match direction {
            Direction::Up => &migration.up_statements,
            Direction::Down => &migration.down_statements,
        };
        self.driver
            .run(statements)
            .map_err(|source| MigrateError::Execution {
                version: migration.version,
                direction,
                source,
            })?;

        let bookkeeping = match direction {
            Direction::Up => self.driver.set_version(migration.version),
            Direction::Down => self.driver.delete_version(migration.version),
        };
        if let Err(err) = bookkeeping {
            warn!(
                version = migration.version,
                %direction,
                error = %err,
                "migration ran but its version record could not be updated"
            );
        }

        match direction {
            Direction::Up => info!("Migration {} successfully applied!", migration.version),
            Direction::Down => info!("Migration {} successfully rolled back!", migration.version),
        }
        Ok(())
    }

    fn applied_versions(&mut self) -> Result<BTreeSet<i64>> {
        let list = self.driver.list().map_err(|source| MigrateError::Driver {
            context: "can't get list of applied migrations",
            source,
        })?;
        Ok(list.into_iter().map(|record| record.version).collect())
    }

    fn lock(&mut self) -> Result<()> {
        self.driver.lock().map_err(MigrateError::Lock)
    }

    fn unlock<T>(&mut self, outcome: Result<T>) -> Result<T> {
        match self.driver.unlock() {
            Ok(()) => outcome,
            Err(source) => Err(MigrateError::Unlock {
                source,
                prior: outcome.err().map(Box::new),
            }),
        }
    }
}

/// Lists every `.sql` migration in `dir`, ascending by version.
///
/// # Errors
///
/// [`MigrateError::ReadDir`]/[`MigrateError::ReadFile`] on I/O failure,
/// [`MigrateError::MalformedMigration`] on a bad file,
/// [`MigrateError::DuplicateVersion`] when two files share a version.
pub fn find_available_migrations(dir: impl AsRef<Path>) -> Result<Vec<Migration>> {
    let dir = dir.as_ref();
    let read_dir_err = |source| MigrateError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_dir_err)? {
        let entry = entry.map_err(read_dir_err)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(MIGRATION_SUFFIX) {
            continue;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        migrations.push(load_migration(&path, name)?);
    }

    migrations.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.source.cmp(&b.source)));
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(MigrateError::DuplicateVersion {
            version: pair[0].version,
            first: pair[0].source.clone(),
            second: pair[1].source.clone(),
        });
    }

    debug!(dir = %dir.display(), count = migrations.len(), "discovered migrations");
    Ok(migrations)
}

fn load_migration(path: &Path, name: String) -> Result<Migration> {
    let text = fs::read_to_string(path).map_err(|source| MigrateError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = parse_migration_str(&text).map_err(|source| MigrateError::MalformedMigration {
        file: name.clone(),
        source,
    })?;
    Ok(Migration::new(
        version_from_filename(&name),
        name,
        parsed.up,
        parsed.down,
    ))
}
