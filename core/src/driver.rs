//! Storage backend contract and the scheme-keyed driver registry.
//!
//! A backend implements [`Driver`] and exposes a [`DriverFactory`] that opens
//! new driver instances from a connection URL. Factories are collected in a
//! [`DriverRegistry`], which resolves a URL to a driver by its scheme (the
//! text before the first `:`).
//!
//! # Example
//!
//! ```
//! use sqlmigrate_core::{DriverRegistry, memory::MemoryDriverFactory};
//!
//! let mut registry = DriverRegistry::new();
//! registry.register("memory", MemoryDriverFactory::new());
//!
//! let mut driver = registry.open("memory://app", "migrations").unwrap();
//! driver.prepare_table().unwrap();
//! assert_eq!(driver.version().unwrap(), -1);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DriverError, DriverResult};
use crate::migration::AppliedVersion;

/// Capability set a storage backend must provide to the migration engine.
///
/// The engine calls [`lock`](Self::lock) before and [`unlock`](Self::unlock)
/// after every logical operation. All other calls happen while the lock is
/// held.
pub trait Driver {
    /// Releases the underlying connection. Called at most once.
    fn close(self: Box<Self>) -> DriverResult<()>;

    /// Acquires a backend-scoped exclusive lock.
    ///
    /// Returns [`DriverError::Locked`] if another instance holds it. A
    /// backend that cannot provide exclusion returns `Ok(())`.
    fn lock(&mut self) -> DriverResult<()>;

    /// Releases the lock. Returns [`DriverError::NotLocked`] if it was not
    /// held.
    fn unlock(&mut self) -> DriverResult<()>;

    /// Executes an opaque block of statements, atomically where the backend
    /// supports it.
    fn run(&mut self, statements: &str) -> DriverResult<()>;

    /// Records `version` as applied, stamped with the current time.
    fn set_version(&mut self, version: i64) -> DriverResult<()>;

    /// Removes the bookkeeping record for `version`.
    fn delete_version(&mut self, version: i64) -> DriverResult<()>;

    /// Returns the highest applied version, or `-1` when none is applied.
    fn version(&mut self) -> DriverResult<i64>;

    /// Returns every applied record, ascending by version.
    fn list(&mut self) -> DriverResult<Vec<AppliedVersion>>;

    /// Creates the bookkeeping table if it does not exist.
    fn prepare_table(&mut self) -> DriverResult<()>;
}

/// Opens driver instances for one URL scheme.
pub trait DriverFactory: Send + Sync {
    /// Opens a new driver for `url`, keeping bookkeeping in `table_name`.
    fn open(&self, url: &str, table_name: &str) -> DriverResult<Box<dyn Driver>>;
}

impl<F> DriverFactory for F
where
    F: Fn(&str, &str) -> DriverResult<Box<dyn Driver>> + Send + Sync,
{
    fn open(&self, url: &str, table_name: &str) -> DriverResult<Box<dyn Driver>> {
        self(url, table_name)
    }
}

/// Mapping from URL scheme to [`DriverFactory`].
///
/// Built once at process start and passed by reference to
/// [`Migrator::new`](crate::Migrator::new).
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `scheme`.
    ///
    /// # Panics
    ///
    /// Panics if `scheme` is already registered; double registration is a
    /// programming error.
    pub fn register(&mut self, scheme: impl Into<String>, factory: impl DriverFactory + 'static) {
        self.register_shared(scheme, Arc::new(factory));
    }

    /// Registers an already shared factory, allowing one factory to serve
    /// several schemes.
    ///
    /// # Panics
    ///
    /// Panics if `scheme` is already registered.
    pub fn register_shared(&mut self, scheme: impl Into<String>, factory: Arc<dyn DriverFactory>) {
        let scheme = scheme.into();
        if self.factories.contains_key(&scheme) {
            panic!("driver registered twice for scheme '{scheme}'");
        }
        self.factories.insert(scheme, factory);
    }

    /// Returns `true` if a factory is registered for `scheme`.
    pub fn contains(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }

    /// Registered schemes in sorted order.
    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Resolves `url` to a driver through its scheme.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::ParseDsn`] if `url` has no `:`,
    /// [`DriverError::UnknownDriver`] if the scheme is not registered, or
    /// whatever the factory returns.
    pub fn open(&self, url: &str, table_name: &str) -> DriverResult<Box<dyn Driver>> {
        let scheme = scheme_of(url)?;
        let factory = self
            .factories
            .get(scheme)
            .ok_or_else(|| DriverError::UnknownDriver(scheme.to_string()))?;
        factory.open(url, table_name)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("schemes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Returns the scheme of a connection URL (text before the first `:`).
///
/// # Errors
///
/// Returns [`DriverError::ParseDsn`] if the URL contains no `:`.
pub fn scheme_of(url: &str) -> DriverResult<&str> {
    url.split_once(':')
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| DriverError::ParseDsn(url.to_string()))
}
