//! Configuration for a managed schema.
//!
//! Defines the YAML-serializable configuration that names the database,
//! the table prefix, the declared table registry, where SQL migration
//! scripts live, and how version-read failures are treated.
//!
//! # Example YAML
//!
//! ```yaml
//! database:
//!   path: app.db
//!   busy_timeout_ms: 5000
//!   foreign_keys: true
//! prefix: app_
//! version_read: lenient
//! advisory_lock: false
//! refuse_newer_database: false
//! migrations_dir: migrations
//! tables:
//!   - name: users
//!     columns:
//!       - { name: id, type: integer, primary_key: true }
//!       - { name: email, type: text, unique: true }
//! ```
//!
//! Relative `database.path` and `migrations_dir` values are resolved against
//! the directory containing the configuration file.

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use schema_keeper_core::{TableDescriptor, ValidationError, validate_registry};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default table prefix.
pub const DEFAULT_PREFIX: &str = "app_";

/// Default SQLite busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// How a failed version read is handled during an upgrade.
///
/// # Examples
///
/// ```
/// # use schema_keeper_config::VersionReadPolicy;
/// assert_eq!(VersionReadPolicy::default(), VersionReadPolicy::Lenient);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersionReadPolicy {
    /// Any read failure is logged and treated as version 0.
    #[default]
    Lenient,
    /// Only a missing version record is treated as version 0; other read
    /// failures abort the upgrade.
    Strict,
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. `None` opens a private in-memory database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// How long to wait on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Whether to enforce foreign keys on every connection.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
}

impl DatabaseSettings {
    /// Returns the busy timeout as a [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

/// Top-level schema-keeper configuration.
///
/// Loaded from a YAML file (typically `schema-keeper.yml` next to the
/// application) to describe the managed database.
///
/// # Examples
///
/// ```no_run
/// use schema_keeper_config::KeeperConfig;
///
/// let config = KeeperConfig::load("schema-keeper.yml").unwrap();
/// println!("{} tables declared", config.tables.len());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Connection settings.
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Prefix prepended to every managed table name.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Version-read failure policy.
    #[serde(default)]
    pub version_read: VersionReadPolicy,
    /// Whether upgrades take the cross-process advisory lock.
    #[serde(default)]
    pub advisory_lock: bool,
    /// Whether an upgrade fails when the database is at a version newer
    /// than any known step. By default it is left untouched.
    #[serde(default)]
    pub refuse_newer_database: bool,
    /// Directory of `NNNN_description.sql` migration scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrations_dir: Option<PathBuf>,
    /// Table registry in dependency (declaration) order.
    #[serde(default)]
    pub tables: Vec<TableDescriptor>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            prefix: default_prefix(),
            version_read: VersionReadPolicy::default(),
            advisory_lock: false,
            refuse_newer_database: false,
            migrations_dir: None,
            tables: Vec::new(),
        }
    }
}

impl KeeperConfig {
    /// Loads configuration from a YAML file.
    ///
    /// Relative paths inside the file are resolved against the file's
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](crate::ConfigError::IoError) if the file cannot
    /// be read, or [`YamlError`](crate::ConfigError::YamlError) if parsing
    /// fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut config: KeeperConfig = serde_yaml::from_reader(reader)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Parses configuration from a YAML string without resolving paths.
    ///
    /// # Errors
    ///
    /// Returns [`YamlError`](crate::ConfigError::YamlError) if parsing fails.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Saves the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](crate::ConfigError::IoError) if the file cannot
    /// be written, or [`YamlError`](crate::ConfigError::YamlError) if
    /// serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Rewrites relative database and migrations paths to be under `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.database.path = self.database.path.take().map(resolve);
        self.migrations_dir = self.migrations_dir.take().map(resolve);
    }

    /// Validates the declared table registry.
    ///
    /// Returns an empty list when the registry is well-formed.
    pub fn validate(&self) -> Vec<ValidationError> {
        validate_registry(&self.tables)
    }
}
