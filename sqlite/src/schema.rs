//! SQL generation for registered tables, with customizable table prefixes.
//!
//! Every physical table name is the logical [`TableDescriptor::name`] with a
//! configurable prefix prepended, so several isolated applications can share
//! one SQLite file (e.g. `prod_`, `test_`).
//!
//! Foreign keys are rendered against the *prefixed* name of the referenced
//! table, so a registry declared once works under any prefix.
//!
//! # Custom prefix
//!
//! Prefixes must contain only alphanumeric characters and underscores and
//! cannot be empty.

use rusqlite::Connection;
use schema_keeper_core::{ColumnDef, ColumnType, TableDescriptor};
use tracing::{debug, info, warn};

use crate::error::{KeeperError, Result};

/// Validates that a table prefix contains only alphanumeric characters and underscores.
///
/// # Errors
///
/// Returns [`KeeperError::InvalidPrefix`] if the prefix is empty or contains
/// any other character.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(KeeperError::InvalidPrefix(prefix.to_string()));
    }
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(KeeperError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

/// SQLite type name for a column storage class.
pub(crate) fn column_type_sql(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer | ColumnType::Boolean => "INTEGER",
        ColumnType::Text | ColumnType::Timestamp => "TEXT",
        ColumnType::Real => "REAL",
        ColumnType::Blob => "BLOB",
    }
}

fn column_sql(column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", column.name, column_type_sql(column.column_type));
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
    } else if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

/// Generates the `CREATE TABLE IF NOT EXISTS` statement for one descriptor.
///
/// The descriptor is assumed to have passed registry validation.
///
/// # Examples
///
/// ```
/// use schema_keeper_core::{ColumnDef, ColumnType, TableDescriptor};
/// use schema_keeper_sqlite::create_table_sql;
///
/// let clips = TableDescriptor::new("clips")
///     .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
///     .with_column(ColumnDef::new("owner", ColumnType::Integer))
///     .with_foreign_key("owner", "users", "id");
///
/// let sql = create_table_sql("app_", &clips);
/// assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS app_clips"));
/// assert!(sql.contains("REFERENCES app_users(id)"));
/// ```
pub fn create_table_sql(prefix: &str, table: &TableDescriptor) -> String {
    let mut lines: Vec<String> = table.columns.iter().map(column_sql).collect();

    if !table.primary_key.is_empty() {
        lines.push(format!("PRIMARY KEY ({})", table.primary_key.join(", ")));
    }
    for check in &table.checks {
        lines.push(format!("CHECK ({check})"));
    }
    for fk in &table.foreign_keys {
        let mut line = format!(
            "FOREIGN KEY ({}) REFERENCES {prefix}{}({})",
            fk.column, fk.table, fk.references
        );
        if fk.on_delete_cascade {
            line.push_str(" ON DELETE CASCADE");
        }
        lines.push(line);
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {prefix}{} (\n    {}\n)",
        table.name,
        lines.join(",\n    ")
    )
}

/// Returns `true` if a table with this physical name exists.
pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let mut stmt =
        conn.prepare_cached("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    let count: i64 = stmt.query_row([name], |row| row.get(0))?;
    Ok(count > 0)
}

/// Returns the column names of an existing table, in table order.
pub fn table_columns(conn: &Connection, name: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([name], |row| row.get::<_, String>(0))?;
    rows.collect()
}

/// Declared columns of `table` that the live table `physical` lacks.
///
/// Column names compare case-insensitively, as SQLite does.
pub fn missing_columns(
    conn: &Connection,
    table: &TableDescriptor,
    physical: &str,
) -> rusqlite::Result<Vec<String>> {
    let live = table_columns(conn, physical)?;
    Ok(table
        .columns
        .iter()
        .filter(|c| !live.iter().any(|l| l.eq_ignore_ascii_case(&c.name)))
        .map(|c| c.name.clone())
        .collect())
}

/// A structure that can verify its own presence and create itself if absent.
pub trait EnsureExists {
    /// Creates the structure unless it already exists.
    ///
    /// Idempotent: a second call is a no-op and does not fail.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::SchemaError`] naming the table if the check or
    /// the creation fails.
    fn ensure_exists(&self, conn: &Connection, prefix: &str) -> Result<()>;
}

impl EnsureExists for TableDescriptor {
    fn ensure_exists(&self, conn: &Connection, prefix: &str) -> Result<()> {
        let physical = format!("{prefix}{}", self.name);
        let to_error = |source| KeeperError::SchemaError {
            table: physical.clone(),
            source,
        };

        if table_exists(conn, &physical).map_err(to_error)? {
            let missing = missing_columns(conn, self, &physical).map_err(to_error)?;
            if missing.is_empty() {
                debug!(table = %physical, "Table already exists");
            } else {
                // Existing tables are never altered; migration steps own that.
                warn!(table = %physical, missing = ?missing, "Table exists but lacks declared columns");
            }
            return Ok(());
        }

        conn.execute_batch(&create_table_sql(prefix, self))
            .map_err(to_error)?;
        info!(table = %physical, "Created table");
        Ok(())
    }
}
