//! Ordered registry of the tables an application needs.

use rusqlite::Connection;
use schema_keeper_core::{TableDescriptor, validate_registry};
use serde::Serialize;

use crate::error::{KeeperError, Result};
use crate::schema::{EnsureExists, missing_columns, table_exists, validate_prefix};
use crate::version::VersionStore;

/// Result of checking one registered table against the live database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCheck {
    /// Physical table name.
    pub table: String,
    /// Whether the table exists.
    pub exists: bool,
    /// Declared columns the live table lacks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_columns: Vec<String>,
}

impl TableCheck {
    /// Returns `true` if the table exists with every declared column.
    pub fn is_complete(&self) -> bool {
        self.exists && self.missing_columns.is_empty()
    }
}

/// Statically declared, dependency-ordered table set.
///
/// Declaration order is the creation order: a table may only reference
/// tables declared before it. The version store's own tables are appended
/// last, so they are created by [`ensure_all`](Self::ensure_all) like any
/// other table.
///
/// # Examples
///
/// ```
/// use rusqlite::Connection;
/// use schema_keeper_core::{ColumnDef, ColumnType, TableDescriptor};
/// use schema_keeper_sqlite::TableRegistry;
///
/// let users = TableDescriptor::new("users")
///     .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key());
/// let registry = TableRegistry::new("app_", vec![users]).unwrap();
///
/// let conn = Connection::open_in_memory().unwrap();
/// registry.ensure_all(&conn).unwrap();
/// assert!(registry.verify(&conn).unwrap().iter().all(|c| c.is_complete()));
/// ```
#[derive(Debug, Clone)]
pub struct TableRegistry {
    prefix: String,
    tables: Vec<TableDescriptor>,
}

impl TableRegistry {
    /// Builds and validates a registry.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::InvalidPrefix`] for a bad prefix, or
    /// [`KeeperError::InvalidRegistry`] if the descriptors are malformed,
    /// misordered, or collide with the version store's tables.
    pub fn new(prefix: impl Into<String>, descriptors: Vec<TableDescriptor>) -> Result<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;

        let mut tables = descriptors;
        tables.extend(VersionStore::table_descriptors());

        let errors = validate_registry(&tables);
        if !errors.is_empty() {
            return Err(KeeperError::InvalidRegistry(errors));
        }

        Ok(Self { prefix, tables })
    }

    /// Table name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registered descriptors in declaration order, version tables last.
    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    /// Physical name of a logical table.
    pub fn physical_name(&self, table: &str) -> String {
        format!("{}{table}", self.prefix)
    }

    /// Verifies or creates every table in declaration order.
    ///
    /// Stops at the first failure; tables before it stay created.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::SchemaError`] naming the failing table.
    pub fn ensure_all(&self, conn: &Connection) -> Result<()> {
        for table in &self.tables {
            table.ensure_exists(conn, &self.prefix)?;
        }
        Ok(())
    }

    /// Reports, per table, whether it exists and which declared columns are
    /// missing. Never creates anything.
    pub fn verify(&self, conn: &Connection) -> Result<Vec<TableCheck>> {
        let mut checks = Vec::with_capacity(self.tables.len());

        for table in &self.tables {
            let physical = self.physical_name(&table.name);
            if !table_exists(conn, &physical)? {
                checks.push(TableCheck {
                    table: physical,
                    exists: false,
                    missing_columns: Vec::new(),
                });
                continue;
            }

            let missing_columns = missing_columns(conn, table, &physical)?;

            checks.push(TableCheck {
                table: physical,
                exists: true,
                missing_columns,
            });
        }

        Ok(checks)
    }
}
