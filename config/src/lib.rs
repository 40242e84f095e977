//! Configuration and migration script loading for schema-keeper.
//!
//! This crate turns files on disk into the inputs the orchestrator needs:
//! a [`KeeperConfig`] parsed from YAML (connection settings, table prefix,
//! declared table registry, version-read policy) and a [`ScriptSet`] of
//! versioned SQL migration scripts with SHA-256 checksums.
//!
//! # Quick start
//!
//! ```no_run
//! use schema_keeper_config::{KeeperConfig, ScriptSet};
//!
//! let config = KeeperConfig::load("schema-keeper.yml").unwrap();
//! assert!(config.validate().is_empty());
//!
//! if let Some(dir) = &config.migrations_dir {
//!     let scripts = ScriptSet::from_dir(dir).unwrap();
//!     println!("latest script version: {}", scripts.latest());
//! }
//! ```

mod config;
mod error;
mod loader;

pub use config::{
    DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_PREFIX, DatabaseSettings, KeeperConfig, VersionReadPolicy,
};
pub use error::{ConfigError, Result};
pub use loader::{MigrationScript, ScriptSet, sql_checksum};
