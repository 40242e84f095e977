//! Versioned migration steps.
//!
//! A [`MigrationStep`] moves a database from version `v - 1` to `v`. Its body
//! is either a SQL batch or a closure, and it always runs inside the
//! transaction the orchestrator opens for that step, so the step's changes
//! and the version bump commit together.
//!
//! Steps must tolerate tables that [`TableRegistry::ensure_all`] has just
//! created in their latest shape, e.g. by using `IF NOT EXISTS` or by
//! checking for a column before adding it.
//!
//! # Example
//!
//! ```
//! use schema_keeper_core::SchemaVersion;
//! use schema_keeper_sqlite::{MigrationSet, MigrationStep};
//!
//! let steps = MigrationSet::new(vec![
//!     MigrationStep::sql(1, "create users", "CREATE TABLE IF NOT EXISTS users (id INTEGER);"),
//!     MigrationStep::from_fn(2, "seed admin", |tx| {
//!         tx.execute("INSERT INTO users (id) VALUES (1)", [])?;
//!         Ok(())
//!     }),
//! ])
//! .unwrap();
//!
//! assert_eq!(steps.latest().get(), 2);
//! assert_eq!(steps.pending(SchemaVersion::new(1)).count(), 1);
//! ```
//!
//! [`TableRegistry::ensure_all`]: crate::TableRegistry::ensure_all

use std::fmt;

use rusqlite::Transaction;
use schema_keeper_config::{MigrationScript, ScriptSet, sql_checksum};
use schema_keeper_core::{SchemaVersion, validate_versions};

use crate::error::{KeeperError, Result};

type StepFn = dyn Fn(&Transaction<'_>) -> rusqlite::Result<()> + Send + Sync;

enum StepBody {
    Sql(String),
    Func(Box<StepFn>),
}

/// One migration step: the changes that take a database to `version`.
pub struct MigrationStep {
    version: SchemaVersion,
    description: String,
    checksum: Option<String>,
    body: StepBody,
}

impl MigrationStep {
    /// Creates a step whose body is a SQL batch.
    pub fn sql(version: u32, description: &str, sql: &str) -> Self {
        Self {
            version: SchemaVersion::new(version),
            description: description.to_string(),
            checksum: Some(sql_checksum(sql)),
            body: StepBody::Sql(sql.to_string()),
        }
    }

    /// Creates a step whose body is a closure.
    pub fn from_fn<F>(version: u32, description: &str, f: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> rusqlite::Result<()> + Send + Sync + 'static,
    {
        Self {
            version: SchemaVersion::new(version),
            description: description.to_string(),
            checksum: None,
            body: StepBody::Func(Box::new(f)),
        }
    }

    /// Version this step migrates to.
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// SHA-256 of the SQL body; `None` for closure steps.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Runs the step body inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::MigrationError`] naming this step.
    pub fn apply(&self, tx: &Transaction<'_>) -> Result<()> {
        let outcome = match &self.body {
            StepBody::Sql(sql) => tx.execute_batch(sql),
            StepBody::Func(f) => f(tx),
        };
        outcome.map_err(|source| KeeperError::MigrationError {
            version: self.version,
            description: self.description.clone(),
            source,
        })
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.body {
            StepBody::Sql(_) => "sql",
            StepBody::Func(_) => "fn",
        };
        f.debug_struct("MigrationStep")
            .field("version", &self.version)
            .field("description", &self.description)
            .field("kind", &kind)
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// Gap-free, ascending sequence of migration steps `1..=N`.
#[derive(Debug, Default)]
pub struct MigrationSet {
    steps: Vec<MigrationStep>,
}

impl MigrationSet {
    /// Sorts and validates a set of steps.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::InvalidMigrations`] if the versions are not
    /// exactly `1..=N` (version 0, duplicates, or gaps).
    pub fn new(mut steps: Vec<MigrationStep>) -> Result<Self> {
        steps.sort_by_key(|s| s.version);
        let versions: Vec<SchemaVersion> = steps.iter().map(|s| s.version).collect();
        let errors = validate_versions(&versions);
        if !errors.is_empty() {
            return Err(KeeperError::InvalidMigrations(errors));
        }
        Ok(Self { steps })
    }

    /// Builds SQL steps from a loaded script directory.
    pub fn from_scripts(scripts: &ScriptSet) -> Result<Self> {
        Self::new(Self::script_steps(scripts.iter()))
    }

    /// Converts scripts to steps without validating the resulting set.
    pub(crate) fn script_steps<'s>(
        scripts: impl IntoIterator<Item = &'s MigrationScript>,
    ) -> Vec<MigrationStep> {
        scripts
            .into_iter()
            .map(|s| MigrationStep::sql(s.version.get(), &s.description, &s.sql))
            .collect()
    }

    /// Highest step version, or [`SchemaVersion::ZERO`] when empty.
    pub fn latest(&self) -> SchemaVersion {
        self.steps
            .last()
            .map(|s| s.version)
            .unwrap_or(SchemaVersion::ZERO)
    }

    /// Steps with a version above `from`, ascending.
    pub fn pending(&self, from: SchemaVersion) -> impl Iterator<Item = &MigrationStep> {
        self.steps.iter().filter(move |s| s.version > from)
    }

    /// Iterates every step in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationStep> {
        self.steps.iter()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
