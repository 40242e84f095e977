//! Persisted schema version and migration history.
//!
//! The version lives in a single-row table guarded by `CHECK (id = 1)`:
//!
//! ```text
//! {prefix}schema_version (id = 1, version, updated_at)
//! {prefix}schema_history (version, description, checksum, applied_at)
//! ```
//!
//! Both tables are declared as ordinary [`TableDescriptor`]s and created by
//! the registry together with the application's own tables.
//!
//! The store never invents a version: a missing table or row is reported as
//! [`VersionReadKind::Missing`] and it is up to the orchestrator to decide
//! that this means version 0.

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use schema_keeper_core::{ColumnDef, ColumnType, SchemaVersion, TableDescriptor};
use serde::Serialize;
use tracing::debug;

use crate::error::{KeeperError, Result, VersionReadKind};
use crate::schema::{table_exists, validate_prefix};

/// Logical name of the single-row version table.
pub const VERSION_TABLE: &str = "schema_version";

/// Logical name of the applied-step history table.
pub const HISTORY_TABLE: &str = "schema_history";

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One applied migration step, as recorded in the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedStep {
    /// Version the step migrated to.
    pub version: SchemaVersion,
    /// Step description.
    pub description: String,
    /// SHA-256 of the SQL body, for SQL steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// When the step committed (RFC 3339, UTC).
    pub applied_at: String,
}

/// Reads and writes the persisted schema version.
#[derive(Debug, Clone)]
pub struct VersionStore {
    version_table: String,
    history_table: String,
}

impl VersionStore {
    /// Creates a store for tables under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::InvalidPrefix`] if the prefix is invalid.
    pub fn new(prefix: &str) -> Result<Self> {
        validate_prefix(prefix)?;
        Ok(Self {
            version_table: format!("{prefix}{VERSION_TABLE}"),
            history_table: format!("{prefix}{HISTORY_TABLE}"),
        })
    }

    /// Descriptors of the tables this store needs.
    pub fn table_descriptors() -> Vec<TableDescriptor> {
        vec![
            TableDescriptor::new(VERSION_TABLE)
                .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
                .with_column(ColumnDef::new("version", ColumnType::Integer))
                .with_column(ColumnDef::new("updated_at", ColumnType::Timestamp))
                .with_check("id = 1")
                .with_check("version >= 0"),
            TableDescriptor::new(HISTORY_TABLE)
                .with_column(ColumnDef::new("version", ColumnType::Integer).primary_key())
                .with_column(ColumnDef::new("description", ColumnType::Text))
                .with_column(ColumnDef::new("checksum", ColumnType::Text).nullable())
                .with_column(ColumnDef::new("applied_at", ColumnType::Timestamp)),
        ]
    }

    /// Physical name of the version table.
    pub fn version_table(&self) -> &str {
        &self.version_table
    }

    /// Physical name of the history table.
    pub fn history_table(&self) -> &str {
        &self.history_table
    }

    /// Returns the stored version.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::VersionReadError`] with kind
    /// [`Missing`](VersionReadKind::Missing) if the table or its row does not
    /// exist, [`Corrupt`](VersionReadKind::Corrupt) if the stored value is not
    /// a valid version, or [`Query`](VersionReadKind::Query) for any other
    /// failure.
    pub fn current_version(&self, conn: &Connection) -> Result<SchemaVersion> {
        let read_error = |kind, message: String| KeeperError::VersionReadError { kind, message };

        let exists = table_exists(conn, &self.version_table)
            .map_err(|e| read_error(VersionReadKind::Query, e.to_string()))?;
        if !exists {
            return Err(read_error(
                VersionReadKind::Missing,
                format!("table {} does not exist", self.version_table),
            ));
        }

        let sql = format!("SELECT version FROM {} WHERE id = 1", self.version_table);
        let stored: Option<i64> = conn
            .query_row(&sql, [], |row| row.get(0))
            .optional()
            .map_err(|e| match e {
                rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::FromSqlConversionFailure(..) => {
                    read_error(VersionReadKind::Corrupt, e.to_string())
                }
                other => read_error(VersionReadKind::Query, other.to_string()),
            })?;

        let stored = stored.ok_or_else(|| {
            read_error(
                VersionReadKind::Missing,
                format!("table {} has no version row", self.version_table),
            )
        })?;

        u32::try_from(stored).map(SchemaVersion::new).map_err(|_| {
            read_error(
                VersionReadKind::Corrupt,
                format!("stored version {stored} is out of range"),
            )
        })
    }

    /// Persists `version` as the current version.
    ///
    /// Writing the stored value again is a no-op. A missing or corrupt record
    /// is overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::VersionWriteError`] if `version` is lower than
    /// the stored version or the write fails.
    pub fn set_version(&self, conn: &Connection, version: SchemaVersion) -> Result<()> {
        let write_error = |message: String| KeeperError::VersionWriteError { version, message };

        match self.current_version(conn) {
            Ok(current) if version < current => {
                return Err(write_error(format!(
                    "refusing to move back from version {current}"
                )));
            }
            Ok(current) if version == current => return Ok(()),
            Ok(_) => {}
            Err(KeeperError::VersionReadError {
                kind: VersionReadKind::Missing | VersionReadKind::Corrupt,
                ..
            }) => {}
            Err(e) => return Err(write_error(e.to_string())),
        }

        let sql = format!(
            "INSERT INTO {} (id, version, updated_at) VALUES (1, ?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET version = excluded.version, updated_at = excluded.updated_at",
            self.version_table
        );
        conn.execute(&sql, params![version.get(), now_rfc3339()])
            .map_err(|e| write_error(e.to_string()))?;

        debug!(version = %version, "Stored schema version");
        Ok(())
    }

    /// Appends a history row for an applied step.
    ///
    /// Re-applying a version after its record was lost replaces the old row.
    pub fn record_step(
        &self,
        conn: &Connection,
        version: SchemaVersion,
        description: &str,
        checksum: Option<&str>,
    ) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (version, description, checksum, applied_at) \
             VALUES (?1, ?2, ?3, ?4)",
            self.history_table
        );
        conn.execute(
            &sql,
            params![version.get(), description, checksum, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Lists applied steps in version order.
    ///
    /// Returns an empty list if the history table does not exist yet.
    pub fn history(&self, conn: &Connection) -> Result<Vec<AppliedStep>> {
        if !table_exists(conn, &self.history_table)? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT version, description, checksum, applied_at FROM {} ORDER BY version",
            self.history_table
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(AppliedStep {
                version: SchemaVersion::new(row.get(0)?),
                description: row.get(1)?,
                checksum: row.get(2)?,
                applied_at: row.get(3)?,
            })
        })?;

        let steps = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(steps)
    }
}
