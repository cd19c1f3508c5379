//! Migrator configuration.
//!
//! A configuration file is YAML with two sections:
//!
//! ```yaml
//! logger:
//!   level: info
//! migrator:
//!   dsn: "${DB_DSN}"
//!   dir: ./migrations
//!   table_name: migrations
//! ```
//!
//! String values may reference environment variables as `${NAME}`; they are
//! substituted when the file is loaded (unset variables become empty).

use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::DEFAULT_TABLE_NAME;

/// Directory migrations are read from when none is configured.
pub const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";

/// Log level used when none is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("can't read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid YAML for [`Config`].
    #[error("can't parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Connection string, bookkeeping table and migrations directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Driver URL; its scheme selects the driver.
    #[serde(default)]
    pub dsn: String,
    /// Bookkeeping table; `None` or empty means [`DEFAULT_TABLE_NAME`].
    #[serde(default)]
    pub table_name: Option<String>,
    /// Directory holding the `.sql` migration files.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
}

fn default_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MIGRATIONS_DIR)
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            table_name: None,
            dir: default_dir(),
        }
    }
}

impl MigratorConfig {
    /// Creates a configuration using the default table name.
    pub fn new(dsn: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            dsn: dsn.into(),
            table_name: None,
            dir: dir.into(),
        }
    }

    /// Sets the bookkeeping table name.
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Effective bookkeeping table name.
    pub fn table_name(&self) -> &str {
        match self.table_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_TABLE_NAME,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Level filter directive (`error`, `warn`, `info`, `debug`, `trace`).
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings.
    #[serde(default)]
    pub logger: LoggerConfig,
    /// Migrator settings.
    #[serde(default)]
    pub migrator: MigratorConfig,
}

impl Config {
    /// Loads configuration from a YAML file, expanding `${NAME}` references
    /// from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Config = serde_yaml::from_reader(BufReader::new(file))?;
        Ok(config.expand_env(|name| std::env::var(name).ok()))
    }

    /// Parses configuration from YAML text without environment expansion.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if parsing fails.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Replaces `${NAME}` references in every string value using `lookup`.
    pub fn expand_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        self.logger.level = expand_vars(&self.logger.level, &lookup);
        self.migrator.dsn = expand_vars(&self.migrator.dsn, &lookup);
        self.migrator.table_name = self
            .migrator
            .table_name
            .map(|name| expand_vars(&name, &lookup));
        if let Some(dir) = self.migrator.dir.to_str() {
            self.migrator.dir = PathBuf::from(expand_vars(dir, &lookup));
        }
        self
    }
}

/// Substitutes `${NAME}` references in `value`. An unterminated `${` is
/// kept as is.
pub fn expand_vars<F>(value: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&lookup(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
