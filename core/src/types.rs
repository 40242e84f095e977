//! Schema type definitions for versioned relational databases.
//!
//! This module defines the data model shared by every storage backend:
//! the persisted [`SchemaVersion`], and the [`TableDescriptor`] family used
//! to declare the target shape of each table. The types are designed for
//! serialization with [`serde`] so registries can be declared in YAML.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Persisted schema version.
///
/// Version `0` means "unset": the database has not had any migration step
/// applied. Applying step `v` moves a database from `v - 1` to `v`.
///
/// # Examples
///
/// ```
/// use schema_keeper_core::SchemaVersion;
///
/// let v = SchemaVersion::ZERO;
/// assert!(v.is_unset());
/// assert_eq!(v.next(), SchemaVersion::new(1));
/// assert_eq!(SchemaVersion::new(3).to_string(), "3");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SchemaVersion(u32);

impl SchemaVersion {
    /// The version of a database no step has been applied to.
    pub const ZERO: SchemaVersion = SchemaVersion(0);

    /// Creates a version from its numeric value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` for version `0`.
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Returns the version immediately after this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SchemaVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Storage class of a column.
///
/// Backends render these to their own type names; SQLite maps them onto
/// its type affinities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Signed integer.
    Integer,
    /// UTF-8 text (the default).
    #[default]
    Text,
    /// Floating point.
    Real,
    /// Raw bytes.
    Blob,
    /// Boolean stored as `0`/`1`.
    Boolean,
    /// RFC 3339 timestamp stored as text.
    Timestamp,
}

/// Definition of a single column.
///
/// # Examples
///
/// ```
/// use schema_keeper_core::{ColumnDef, ColumnType};
///
/// let id = ColumnDef::new("id", ColumnType::Integer).primary_key();
/// assert!(id.primary_key);
/// assert!(!id.nullable);
///
/// let note = ColumnDef::new("note", ColumnType::Text).nullable();
/// assert!(note.nullable);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Storage class.
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    /// Whether `NULL` is allowed.
    #[serde(default)]
    pub nullable: bool,
    /// Whether this column alone is the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether values must be unique.
    #[serde(default)]
    pub unique: bool,
    /// Default value as a SQL expression (e.g. `0`, `'pending'`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnDef {
    /// Creates a `NOT NULL` column with no constraints.
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: false,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    /// Marks the column as the single-column primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Allows `NULL` values.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Adds a `UNIQUE` constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the default value expression.
    pub fn with_default(mut self, expr: &str) -> Self {
        self.default = Some(expr.to_string());
        self
    }
}

/// A foreign-key reference from one column to a column of another table.
///
/// `table` is the *logical* table name, i.e. without any backend prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Local column holding the reference.
    pub column: String,
    /// Referenced logical table.
    pub table: String,
    /// Referenced column.
    pub references: String,
    /// Whether deleting the parent row deletes this row.
    #[serde(default)]
    pub on_delete_cascade: bool,
}

/// Target definition of one logical table.
///
/// Descriptors are immutable once built for a given application build and
/// are used to verify-or-create the physical table.
///
/// # Examples
///
/// ```
/// use schema_keeper_core::{ColumnDef, ColumnType, TableDescriptor};
///
/// let users = TableDescriptor::new("users")
///     .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
///     .with_column(ColumnDef::new("email", ColumnType::Text).unique());
///
/// let clips = TableDescriptor::new("clips")
///     .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
///     .with_column(ColumnDef::new("owner", ColumnType::Integer))
///     .with_foreign_key("owner", "users", "id");
///
/// assert_eq!(clips.references().collect::<Vec<_>>(), vec!["users"]);
/// assert!(users.column("email").is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Logical table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Composite primary key, when no single column is marked primary.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    /// Foreign-key references to earlier tables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
    /// Table-level `CHECK` expressions, e.g. `id = 1`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<String>,
}

impl TableDescriptor {
    /// Creates an empty descriptor.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Appends a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets a composite primary key.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Adds a foreign key from `column` to `table(references)`.
    pub fn with_foreign_key(mut self, column: &str, table: &str, references: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            table: table.to_string(),
            references: references.to_string(),
            on_delete_cascade: false,
        });
        self
    }

    /// Adds a cascading foreign key from `column` to `table(references)`.
    pub fn with_cascading_foreign_key(mut self, column: &str, table: &str, references: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            table: table.to_string(),
            references: references.to_string(),
            on_delete_cascade: true,
        });
        self
    }

    /// Adds a table-level `CHECK` constraint.
    pub fn with_check(mut self, expr: &str) -> Self {
        self.checks.push(expr.to_string());
        self
    }

    /// Finds a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Logical tables this table depends on, excluding self-references.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.table.as_str())
            .filter(move |t| *t != self.name)
    }
}
