//! SQLite schema orchestration for schema-keeper.
//!
//! Brings a SQLite database from any prior state (missing file, empty,
//! partially initialized, or at any historical version) to the version the
//! running build expects, and is safe to run on every process start.
//!
//! # Architecture
//!
//! - **`connection`**: the single session, opened at a credential tier
//! - **`schema`** / **`registry`**: declared tables, verified or created in
//!   dependency order
//! - **`version`**: the persisted version row and applied-step history
//! - **`migration`**: versioned steps forming a gap-free `1..=N` sequence
//! - **`lock`**: optional cross-process advisory lock
//! - **`orchestrator`**: the setup / upgrade state machine
//! - **`database`**: the facade that owns all of the above
//!
//! # Quick start
//!
//! ```no_run
//! use schema_keeper_config::KeeperConfig;
//! use schema_keeper_sqlite::Database;
//!
//! let config = KeeperConfig::load("schema-keeper.yml").unwrap();
//! let mut db = Database::from_config(&config, Vec::new()).unwrap();
//!
//! db.connect().unwrap();
//! let report = db.ensure_latest().unwrap();
//! println!("schema at version {} ({} steps applied)", report.to, report.applied.len());
//!
//! // ... serve traffic using db.connection() ...
//!
//! db.shutdown();
//! ```
//!
//! # Table prefix customization
//!
//! Every managed table, including the version and history tables, is
//! prefixed, allowing several isolated applications within one SQLite file.
//! Prefixes must contain only alphanumeric characters and underscores.

mod connection;
mod database;
mod error;
mod lock;
mod migration;
mod orchestrator;
mod registry;
mod schema;
mod version;

pub use connection::{AccessTier, ConnectionConfig, ConnectionManager, DatabaseTarget};
pub use database::Database;
pub use error::{KeeperError, Result, VersionReadKind};
pub use lock::{LOCK_TABLE, LockInfo, MigrationLock, default_holder};
pub use migration::{MigrationSet, MigrationStep};
pub use orchestrator::{OrchestratorOptions, SchemaOrchestrator, SchemaStatus, UpgradeReport};
pub use registry::{TableCheck, TableRegistry};
pub use schema::{EnsureExists, create_table_sql, missing_columns, table_exists, validate_prefix};
pub use version::{AppliedStep, HISTORY_TABLE, VERSION_TABLE, VersionStore};
