//! Top-level facade owning every part of a managed database.
//!
//! # Example
//!
//! ```
//! use schema_keeper_core::{ColumnDef, ColumnType, LifecycleState, TableDescriptor};
//! use schema_keeper_sqlite::{
//!     ConnectionConfig, Database, MigrationSet, MigrationStep, OrchestratorOptions, TableRegistry,
//! };
//!
//! let users = TableDescriptor::new("users")
//!     .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
//!     .with_column(ColumnDef::new("name", ColumnType::Text));
//! let registry = TableRegistry::new("app_", vec![users]).unwrap();
//! let migrations = MigrationSet::new(vec![MigrationStep::sql(
//!     1,
//!     "seed admin",
//!     "INSERT INTO app_users (id, name) VALUES (1, 'admin');",
//! )])
//! .unwrap();
//!
//! let mut db = Database::open_ready(
//!     ConnectionConfig::in_memory(),
//!     registry,
//!     migrations,
//!     OrchestratorOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(db.state(), LifecycleState::UpToDate);
//!
//! let name: String = db
//!     .connection()
//!     .unwrap()
//!     .query_row("SELECT name FROM app_users WHERE id = 1", [], |r| r.get(0))
//!     .unwrap();
//! assert_eq!(name, "admin");
//!
//! db.shutdown();
//! ```

use rusqlite::Connection;
use schema_keeper_config::{KeeperConfig, ScriptSet};
use schema_keeper_core::{LifecycleState, SchemaVersion};
use tracing::info;

use crate::connection::{AccessTier, ConnectionConfig, ConnectionManager};
use crate::error::Result;
use crate::lock::{LockInfo, MigrationLock};
use crate::migration::{MigrationSet, MigrationStep};
use crate::orchestrator::{OrchestratorOptions, SchemaOrchestrator, SchemaStatus, UpgradeReport};
use crate::registry::{TableCheck, TableRegistry};
use crate::version::{AppliedStep, VersionStore};

/// A managed database: connection, table registry, version store,
/// migration steps, and lifecycle state.
pub struct Database {
    connection: ConnectionManager,
    registry: TableRegistry,
    versions: VersionStore,
    migrations: MigrationSet,
    options: OrchestratorOptions,
    state: LifecycleState,
}

impl Database {
    /// Assembles a database from its parts. Nothing is opened yet.
    pub fn new(
        config: ConnectionConfig,
        registry: TableRegistry,
        migrations: MigrationSet,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let versions = VersionStore::new(registry.prefix())?;
        Ok(Self {
            connection: ConnectionManager::new(config),
            registry,
            versions,
            migrations,
            options,
            state: LifecycleState::default(),
        })
    }

    /// Builds a database from configuration.
    ///
    /// Scripts in `migrations_dir` (if set) and `extra_steps` are merged into
    /// one set, which must still form `1..=N`.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::ConfigError`](crate::KeeperError::ConfigError)
    /// if the scripts cannot be loaded, or a registry / migration validation
    /// error.
    pub fn from_config(config: &KeeperConfig, extra_steps: Vec<MigrationStep>) -> Result<Self> {
        let registry = TableRegistry::new(config.prefix.clone(), config.tables.clone())?;

        let mut steps = match &config.migrations_dir {
            Some(dir) => MigrationSet::script_steps(&ScriptSet::load_dir(dir)?),
            None => Vec::new(),
        };
        steps.extend(extra_steps);
        let migrations = MigrationSet::new(steps)?;

        let options = OrchestratorOptions {
            version_read: config.version_read,
            lock: config.advisory_lock,
            refuse_newer: config.refuse_newer_database,
            ..OrchestratorOptions::default()
        };

        Self::new(
            ConnectionConfig::from(&config.database),
            registry,
            migrations,
            options,
        )
    }

    /// Connects and upgrades in one call: the application startup contract.
    ///
    /// # Errors
    ///
    /// Any error from [`connect`](Self::connect) or
    /// [`ensure_latest`](Self::ensure_latest).
    pub fn open_ready(
        config: ConnectionConfig,
        registry: TableRegistry,
        migrations: MigrationSet,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let mut db = Self::new(config, registry, migrations, options)?;
        db.connect()?;
        let report = db.ensure_latest()?;
        info!(version = %report.to, applied = report.applied.len(), "Database ready");
        Ok(db)
    }

    fn orchestrator(&mut self) -> SchemaOrchestrator<'_> {
        SchemaOrchestrator::new(
            &mut self.connection,
            &self.registry,
            &self.versions,
            &self.migrations,
            &self.options,
            &mut self.state,
        )
    }

    /// Opens a privileged session.
    pub fn connect(&mut self) -> Result<()> {
        self.orchestrator().ensure_connection()
    }

    /// Opens an application-tier session for read-only inspection.
    ///
    /// Fails if the database does not exist yet. The lifecycle state is not
    /// advanced; [`connect`](Self::connect) upgrades the session when setup
    /// or migration is needed.
    pub fn connect_application(&mut self) -> Result<()> {
        self.connection.connect(AccessTier::Application)
    }

    /// Verifies or creates every registered table.
    pub fn ensure_setup(&mut self) -> Result<()> {
        self.orchestrator().ensure_setup()
    }

    /// Brings the database to the latest known version.
    pub fn ensure_latest(&mut self) -> Result<UpgradeReport> {
        self.orchestrator().ensure_latest()
    }

    /// Reports where the database stands without changing it.
    pub fn status(&mut self) -> Result<SchemaStatus> {
        self.orchestrator().status()
    }

    /// Per-table existence and column checks.
    pub fn verify(&self) -> Result<Vec<TableCheck>> {
        self.registry.verify(self.connection.connection()?)
    }

    /// Applied steps in version order.
    pub fn history(&self) -> Result<Vec<AppliedStep>> {
        self.versions.history(self.connection.connection()?)
    }

    /// Current holder of the advisory lock, if any.
    pub fn lock_holder(&self) -> Result<Option<LockInfo>> {
        MigrationLock::current(self.connection.connection()?, self.registry.prefix())
    }

    /// Clears a stale advisory lock. Returns the removed holder.
    pub fn force_unlock(&self) -> Result<Option<LockInfo>> {
        MigrationLock::force_release(self.connection.connection()?, self.registry.prefix())
    }

    /// Closes the session. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.orchestrator().end_connection();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Latest version known to this build.
    pub fn latest_version(&self) -> SchemaVersion {
        self.migrations.latest()
    }

    /// Table registry.
    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Borrows the session for application queries.
    pub fn connection(&self) -> Result<&Connection> {
        self.connection.connection()
    }
}
