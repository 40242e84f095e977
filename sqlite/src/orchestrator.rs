//! Schema version orchestration.
//!
//! [`SchemaOrchestrator`] drives a database through
//! `Disconnected → Connected → StructuresEnsured → VersionKnown → UpToDate`.
//! It is a short-lived context: it borrows the connection, registry, version
//! store, and migration steps owned by [`Database`](crate::Database) for the
//! duration of one operation.
//!
//! # Upgrade sequence
//!
//! [`ensure_latest`](SchemaOrchestrator::ensure_latest) runs, in order:
//!
//! 1. `ensure_setup`: create any missing registered table.
//! 2. Take the advisory lock, if enabled.
//! 3. Read the stored version. A missing record means version 0. Other read
//!    failures also mean version 0 under [`VersionReadPolicy::Lenient`] and
//!    abort the upgrade under [`VersionReadPolicy::Strict`].
//! 4. If the database is ahead of the latest known step, leave it alone
//!    (or fail, when [`OrchestratorOptions::refuse_newer`] is set).
//! 5. Apply every step above the stored version, ascending. Each step runs
//!    in its own transaction together with its history row and version bump.
//! 6. Release the lock, on success and on failure.
//!
//! A failed step rolls back alone; earlier steps stay committed and the next
//! run resumes from the persisted version.

use schema_keeper_config::VersionReadPolicy;
use schema_keeper_core::{LifecycleState, SchemaVersion};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::connection::{AccessTier, ConnectionManager};
use crate::error::{KeeperError, Result};
use crate::lock::{MigrationLock, default_holder};
use crate::migration::{MigrationSet, MigrationStep};
use crate::registry::TableRegistry;
use crate::version::VersionStore;

/// Tunables for the upgrade sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// How version read failures are handled.
    pub version_read: VersionReadPolicy,
    /// Whether upgrades take the advisory migration lock.
    pub lock: bool,
    /// Identifier written into the lock row.
    pub lock_holder: String,
    /// Fail with [`KeeperError::DatabaseAhead`] instead of starting on a
    /// database migrated by a newer build.
    pub refuse_newer: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            version_read: VersionReadPolicy::default(),
            lock: false,
            lock_holder: default_holder(),
            refuse_newer: false,
        }
    }
}

/// Outcome of [`SchemaOrchestrator::ensure_latest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    /// Version the database was at (0 if unreadable).
    pub from: SchemaVersion,
    /// Version the database is at now.
    pub to: SchemaVersion,
    /// Steps applied by this run, ascending.
    pub applied: Vec<SchemaVersion>,
}

impl UpgradeReport {
    /// Returns `true` if no step had to run.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Read-only view of where a database stands relative to this build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchemaStatus {
    /// None of the registered tables exist.
    NotInitialized,
    /// Every table exists and every known step has been applied.
    Current { version: SchemaVersion },
    /// Steps `from + 1 ..= to` are pending.
    NeedsMigration { from: SchemaVersion, to: SchemaVersion },
    /// The database was migrated by a newer build.
    DatabaseAhead {
        database: SchemaVersion,
        latest: SchemaVersion,
    },
    /// Up to date, but some registered tables or columns are missing.
    Incomplete { missing_tables: Vec<String> },
}

/// Borrowing context that runs the setup and upgrade sequence.
pub struct SchemaOrchestrator<'a> {
    connection: &'a mut ConnectionManager,
    registry: &'a TableRegistry,
    versions: &'a VersionStore,
    migrations: &'a MigrationSet,
    options: &'a OrchestratorOptions,
    state: &'a mut LifecycleState,
}

impl<'a> SchemaOrchestrator<'a> {
    /// Creates a context over borrowed parts.
    pub fn new(
        connection: &'a mut ConnectionManager,
        registry: &'a TableRegistry,
        versions: &'a VersionStore,
        migrations: &'a MigrationSet,
        options: &'a OrchestratorOptions,
        state: &'a mut LifecycleState,
    ) -> Self {
        Self {
            connection,
            registry,
            versions,
            migrations,
            options,
            state,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state
    }

    /// Opens a privileged session.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::ConnectionError`] if the database cannot be
    /// reached. Nothing else runs in that case.
    pub fn ensure_connection(&mut self) -> Result<()> {
        self.connection.connect(AccessTier::Privileged)?;
        self.state.advance(LifecycleState::Connected)?;
        Ok(())
    }

    /// Verifies or creates every registered table, in registry order.
    ///
    /// Idempotent. Stops at the first failing table and does not retry.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::NotConnected`] without a session,
    /// [`KeeperError::InvalidTransition`] before a privileged connect (nothing
    /// is created then), or [`KeeperError::SchemaError`] naming the failing
    /// table.
    pub fn ensure_setup(&mut self) -> Result<()> {
        let conn = self.connection.connection()?;
        self.state.check_advance(LifecycleState::StructuresEnsured)?;
        self.registry.ensure_all(conn)?;
        self.state.advance(LifecycleState::StructuresEnsured)?;
        debug!(tables = self.registry.tables().len(), "Structures ensured");
        Ok(())
    }

    /// Brings the database up to the latest known version.
    ///
    /// Safe to run on every start: an up-to-date database applies nothing.
    ///
    /// # Errors
    ///
    /// Any error from [`ensure_setup`](Self::ensure_setup), plus
    /// [`KeeperError::LockHeld`], [`KeeperError::MigrationError`],
    /// [`KeeperError::VersionWriteError`], [`KeeperError::DatabaseAhead`]
    /// when `refuse_newer` is set, and, under the strict policy,
    /// [`KeeperError::VersionReadError`].
    ///
    /// Under the lenient policy a version table that cannot be queried at
    /// all (as opposed to a missing or corrupt record) still starts from
    /// version 0, but the first step then fails with
    /// [`KeeperError::VersionWriteError`] carrying the read failure, since the
    /// new version cannot be stored safely. That step is rolled back.
    pub fn ensure_latest(&mut self) -> Result<UpgradeReport> {
        self.ensure_setup()?;

        let lock = if self.options.lock {
            Some(MigrationLock::acquire(
                self.connection.connection()?,
                self.registry.prefix(),
                &self.options.lock_holder,
            )?)
        } else {
            None
        };

        let outcome = self.upgrade_to_latest();

        if let Some(lock) = lock {
            let released = self
                .connection
                .connection()
                .and_then(|conn| lock.release(conn));
            match (&outcome, released) {
                (_, Ok(())) => {}
                (Ok(_), Err(e)) => return Err(e),
                (Err(_), Err(e)) => {
                    warn!(error = %e, "Failed to release migration lock after failed upgrade")
                }
            }
        }

        outcome
    }

    fn upgrade_to_latest(&mut self) -> Result<UpgradeReport> {
        self.state.check_advance(LifecycleState::VersionKnown)?;
        let from = self.read_version()?;
        self.state.advance(LifecycleState::VersionKnown)?;

        let latest = self.migrations.latest();
        if from > latest {
            if self.options.refuse_newer {
                error!(database = %from, latest = %latest, "Database is newer than this build");
                return Err(KeeperError::DatabaseAhead {
                    database: from,
                    latest,
                });
            }
            warn!(database = %from, latest = %latest, "Database is newer than this build, applying nothing");
            self.state.advance(LifecycleState::UpToDate)?;
            return Ok(UpgradeReport {
                from,
                to: from,
                applied: Vec::new(),
            });
        }

        let applied = self.upgrade(from)?;
        self.state.advance(LifecycleState::UpToDate)?;

        if applied.is_empty() {
            info!(version = %from, "Schema is up to date");
        } else {
            info!(from = %from, to = %latest, steps = applied.len(), "Schema upgraded");
        }

        Ok(UpgradeReport {
            from,
            to: latest,
            applied,
        })
    }

    fn read_version(&self) -> Result<SchemaVersion> {
        let conn = self.connection.connection()?;
        match self.versions.current_version(conn) {
            Ok(version) => Ok(version),
            Err(e) if e.is_missing_version() => {
                warn!(error = %e, "No stored schema version, starting from 0");
                Ok(SchemaVersion::ZERO)
            }
            Err(e) => match self.options.version_read {
                VersionReadPolicy::Lenient => {
                    error!(error = %e, "Cannot read schema version, starting from 0");
                    Ok(SchemaVersion::ZERO)
                }
                VersionReadPolicy::Strict => Err(e),
            },
        }
    }

    fn upgrade(&mut self, from: SchemaVersion) -> Result<Vec<SchemaVersion>> {
        let migrations = self.migrations;
        let mut applied = Vec::new();

        for step in migrations.pending(from) {
            info!(version = %step.version(), description = step.description(), "Applying migration step");
            if let Err(e) = self.apply_step(step) {
                error!(version = %step.version(), error = %e, "Migration step failed and was rolled back");
                return Err(e);
            }
            applied.push(step.version());
        }

        Ok(applied)
    }

    fn apply_step(&mut self, step: &MigrationStep) -> Result<()> {
        let as_step_error = |e: KeeperError| match e {
            KeeperError::DatabaseError(source) => KeeperError::MigrationError {
                version: step.version(),
                description: step.description().to_string(),
                source,
            },
            other => other,
        };

        let versions = self.versions;
        let conn = self.connection.connection_mut()?;
        let tx = conn.transaction().map_err(KeeperError::from).map_err(as_step_error)?;

        step.apply(&tx)?;
        versions
            .record_step(&tx, step.version(), step.description(), step.checksum())
            .map_err(as_step_error)?;
        versions.set_version(&tx, step.version())?;

        tx.commit().map_err(KeeperError::from).map_err(as_step_error)?;
        Ok(())
    }

    /// Reports where the database stands without changing anything.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::NotConnected`] without a session, or a query
    /// error. Version read failures other than a missing record are
    /// returned as-is.
    pub fn status(&self) -> Result<SchemaStatus> {
        let conn = self.connection.connection()?;
        let checks = self.registry.verify(conn)?;
        if checks.iter().all(|c| !c.exists) {
            return Ok(SchemaStatus::NotInitialized);
        }

        let version = match self.versions.current_version(conn) {
            Ok(version) => version,
            Err(e) if e.is_missing_version() => SchemaVersion::ZERO,
            Err(e) => return Err(e),
        };

        let latest = self.migrations.latest();
        if version > latest {
            return Ok(SchemaStatus::DatabaseAhead {
                database: version,
                latest,
            });
        }
        if version < latest {
            return Ok(SchemaStatus::NeedsMigration {
                from: version,
                to: latest,
            });
        }

        let missing_tables: Vec<String> = checks
            .into_iter()
            .filter(|c| !c.is_complete())
            .map(|c| c.table)
            .collect();
        if !missing_tables.is_empty() {
            return Ok(SchemaStatus::Incomplete { missing_tables });
        }

        Ok(SchemaStatus::Current { version })
    }

    /// Closes the session. Safe to call repeatedly.
    pub fn end_connection(&mut self) {
        self.connection.disconnect();
        self.state.reset();
    }
}
