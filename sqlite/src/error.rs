//! Error types for schema orchestration.
//!
//! Provides a unified error type covering connection, structure, version,
//! and migration failures. Every variant carries enough context (target,
//! table, step) for an operator to diagnose a failed startup without
//! inspecting the database by hand.

use std::fmt;

use schema_keeper_core::{SchemaVersion, TransitionError, ValidationError};
use thiserror::Error;

/// Why the stored schema version could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionReadKind {
    /// The version table or its single row does not exist yet.
    Missing,
    /// The stored value is not a valid version.
    Corrupt,
    /// Any other query failure (I/O, locking, permissions).
    Query,
}

impl fmt::Display for VersionReadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionReadKind::Missing => "missing",
            VersionReadKind::Corrupt => "corrupt",
            VersionReadKind::Query => "query failed",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while managing a schema.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// The database could not be opened or configured.
    #[error("cannot connect to {target}: {source}")]
    ConnectionError {
        target: String,
        #[source]
        source: rusqlite::Error,
    },

    /// An operation needed a session but none is open.
    #[error("not connected: call connect() first")]
    NotConnected,

    /// A registered table could not be verified or created.
    #[error("cannot ensure table {table}: {source}")]
    SchemaError {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The stored schema version could not be read.
    #[error("cannot read schema version ({kind}): {message}")]
    VersionReadError {
        kind: VersionReadKind,
        message: String,
    },

    /// The new schema version could not be persisted.
    #[error("cannot write schema version {version}: {message}")]
    VersionWriteError {
        version: SchemaVersion,
        message: String,
    },

    /// A migration step failed; the database stays at the previous version.
    #[error("migration step {version} ({description}) failed: {source}")]
    MigrationError {
        version: SchemaVersion,
        description: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The database was migrated by a newer build than this one.
    #[error("database is at version {database}, newer than the latest known step {latest}")]
    DatabaseAhead {
        database: SchemaVersion,
        latest: SchemaVersion,
    },

    /// Another process holds the migration lock.
    #[error("migration lock is held by {holder} since {acquired_at}")]
    LockHeld { holder: String, acquired_at: String },

    /// The table registry failed validation.
    #[error("invalid table registry: {}", join_errors(.0))]
    InvalidRegistry(Vec<ValidationError>),

    /// The migration steps do not form `1..=N`.
    #[error("invalid migration set: {}", join_errors(.0))]
    InvalidMigrations(Vec<ValidationError>),

    /// Table prefix contains invalid characters.
    #[error("invalid prefix '{0}': must contain only alphanumeric characters and underscores")]
    InvalidPrefix(String),

    /// Configuration or script loading failure.
    #[error("configuration error: {0}")]
    ConfigError(#[from] schema_keeper_config::ConfigError),

    /// Lifecycle state machine violation.
    #[error("invalid lifecycle transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    /// SQLite operation failure outside the categories above.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

impl KeeperError {
    /// Returns `true` if this is a read failure caused by an absent version
    /// record, the expected state of a brand-new database.
    pub fn is_missing_version(&self) -> bool {
        matches!(
            self,
            KeeperError::VersionReadError {
                kind: VersionReadKind::Missing,
                ..
            }
        )
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias for results with [`KeeperError`].
pub type Result<T> = std::result::Result<T, KeeperError>;
