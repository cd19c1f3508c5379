//! In-memory driver backend.
//!
//! Useful for tests and dry runs. Drivers opened through the same
//! [`MemoryDriverFactory`] with the same URL share one [`MemoryDatabase`],
//! so two engine instances pointed at `memory://app` contend for the same
//! lock and see the same bookkeeping rows.
//!
//! ```
//! use sqlmigrate_core::DriverRegistry;
//! use sqlmigrate_core::memory;
//!
//! let mut registry = DriverRegistry::new();
//! let factory = memory::register(&mut registry);
//!
//! let mut driver = registry.open("memory://app", "migrations").unwrap();
//! driver.prepare_table().unwrap();
//! driver.set_version(3).unwrap();
//!
//! assert_eq!(factory.database("memory://app").applied_versions("migrations"), vec![3]);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::driver::{Driver, DriverFactory, DriverRegistry};
use crate::error::{DriverError, DriverResult};
use crate::migration::AppliedVersion;

/// URL scheme served by [`register`].
pub const MEMORY_SCHEME: &str = "memory";

/// Registers a fresh [`MemoryDriverFactory`] under [`MEMORY_SCHEME`] and
/// returns a handle to it for inspection.
pub fn register(registry: &mut DriverRegistry) -> MemoryDriverFactory {
    let factory = MemoryDriverFactory::new();
    registry.register(MEMORY_SCHEME, factory.clone());
    factory
}

#[derive(Debug, Default)]
struct MemoryState {
    locked: bool,
    tables: BTreeMap<String, BTreeMap<i64, DateTime<Utc>>>,
    executed: Vec<String>,
    fail_run_containing: Option<String>,
    fail_bookkeeping: bool,
    fail_unlock: bool,
}

/// Shared state behind every driver opened on one URL.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Versions recorded in `table`, ascending.
    pub fn applied_versions(&self, table: &str) -> Vec<i64> {
        self.state()
            .tables
            .get(table)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Returns `true` once `table` has been prepared.
    pub fn has_table(&self, table: &str) -> bool {
        self.state().tables.contains_key(table)
    }

    /// Every statement block executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Whether some driver currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// Marks the lock as held by an outside party (or releases it).
    pub fn set_locked(&self, locked: bool) {
        self.state().locked = locked;
    }

    /// Makes `run` fail for any block containing `needle`.
    pub fn fail_run_containing(&self, needle: impl Into<String>) {
        self.state().fail_run_containing = Some(needle.into());
    }

    /// Makes `set_version` and `delete_version` fail.
    pub fn fail_bookkeeping(&self, fail: bool) {
        self.state().fail_bookkeeping = fail;
    }

    /// Makes `unlock` fail with a backend error (the lock stays held).
    pub fn fail_unlock(&self, fail: bool) {
        self.state().fail_unlock = fail;
    }
}

/// Factory for [`MemoryDriver`]s, one [`MemoryDatabase`] per URL.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriverFactory {
    databases: Arc<Mutex<HashMap<String, MemoryDatabase>>>,
}

impl MemoryDriverFactory {
    /// Creates a factory with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the database behind `url`, creating it if needed.
    pub fn database(&self, url: &str) -> MemoryDatabase {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .clone()
    }
}

impl DriverFactory for MemoryDriverFactory {
    fn open(&self, url: &str, table_name: &str) -> DriverResult<Box<dyn Driver>> {
        if table_name.is_empty() {
            return Err(DriverError::InvalidConfig("table name must not be empty".into()));
        }
        Ok(Box::new(MemoryDriver {
            db: self.database(url),
            table: table_name.to_string(),
            holds_lock: false,
        }))
    }
}

/// Driver over a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryDriver {
    db: MemoryDatabase,
    table: String,
    holds_lock: bool,
}

impl MemoryDriver {
    fn rows<'a>(
        &self,
        state: &'a mut MemoryState,
    ) -> DriverResult<&'a mut BTreeMap<i64, DateTime<Utc>>> {
        state.tables.get_mut(&self.table).ok_or_else(|| {
            DriverError::backend(format!("table '{}' does not exist", self.table))
        })
    }
}

impl Driver for MemoryDriver {
    fn close(mut self: Box<Self>) -> DriverResult<()> {
        if self.holds_lock {
            self.db.state().locked = false;
            self.holds_lock = false;
        }
        Ok(())
    }

    fn lock(&mut self) -> DriverResult<()> {
        let mut state = self.db.state();
        if state.locked {
            return Err(DriverError::Locked);
        }
        state.locked = true;
        self.holds_lock = true;
        Ok(())
    }

    fn unlock(&mut self) -> DriverResult<()> {
        if !self.holds_lock {
            return Err(DriverError::NotLocked);
        }
        let mut state = self.db.state();
        if state.fail_unlock {
            return Err(DriverError::backend("unlock failed"));
        }
        state.locked = false;
        self.holds_lock = false;
        Ok(())
    }

    fn run(&mut self, statements: &str) -> DriverResult<()> {
        let mut state = self.db.state();
        if let Some(needle) = &state.fail_run_containing {
            if statements.contains(needle.as_str()) {
                return Err(DriverError::backend(format!(
                    "statement rejected: contains '{needle}'"
                )));
            }
        }
        state.executed.push(statements.to_string());
        Ok(())
    }

    fn set_version(&mut self, version: i64) -> DriverResult<()> {
        let mut state = self.db.state();
        if state.fail_bookkeeping {
            return Err(DriverError::backend("bookkeeping write failed"));
        }
        let rows = self.rows(&mut state)?;
        if rows.contains_key(&version) {
            return Err(DriverError::backend(format!(
                "version {version} is already recorded"
            )));
        }
        rows.insert(version, Utc::now());
        Ok(())
    }

    fn delete_version(&mut self, version: i64) -> DriverResult<()> {
        let mut state = self.db.state();
        if state.fail_bookkeeping {
            return Err(DriverError::backend("bookkeeping write failed"));
        }
        self.rows(&mut state)?.remove(&version);
        Ok(())
    }

    fn version(&mut self) -> DriverResult<i64> {
        let mut state = self.db.state();
        let rows = self.rows(&mut state)?;
        Ok(rows.keys().next_back().copied().unwrap_or(-1))
    }

    fn list(&mut self) -> DriverResult<Vec<AppliedVersion>> {
        let mut state = self.db.state();
        let rows = self.rows(&mut state)?;
        Ok(rows
            .iter()
            .map(|(&version, &applied_at)| AppliedVersion { version, applied_at })
            .collect())
    }

    fn prepare_table(&mut self) -> DriverResult<()> {
        self.db
            .state()
            .tables
            .entry(self.table.clone())
            .or_default();
        Ok(())
    }
}
