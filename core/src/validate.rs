//! Registry and migration-sequence validation.
//!
//! Validates the structural invariants a schema declaration must hold before
//! anything touches a database: unique, well-formed table and column names,
//! foreign keys that only point at tables declared earlier, and migration
//! versions that form the gap-free sequence `1..=N`.
//!
//! # Examples
//!
//! ```
//! use schema_keeper_core::*;
//!
//! let users = TableDescriptor::new("users")
//!     .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key());
//! let clips = TableDescriptor::new("clips")
//!     .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
//!     .with_column(ColumnDef::new("owner", ColumnType::Integer))
//!     .with_foreign_key("owner", "users", "id");
//!
//! assert!(validate_registry(&[users.clone(), clips.clone()]).is_empty());
//!
//! // Declared in the wrong order: clips depends on users.
//! let errors = validate_registry(&[clips, users]);
//! assert!(matches!(errors[0], ValidationError::ForwardReference { .. }));
//! ```

use std::collections::HashSet;

use thiserror::Error;

use crate::{SchemaVersion, TableDescriptor};

/// Registry / migration-sequence validation errors.
///
/// Each variant describes a specific structural problem found during
/// validation. The `Display` impl provides a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Table name is empty or whitespace-only.
    #[error("table name cannot be empty")]
    EmptyTableName,
    /// A name contains characters other than ASCII alphanumerics and `_`.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    /// Two descriptors share a table name.
    #[error("duplicate table in registry: {0}")]
    DuplicateTable(String),
    /// A descriptor declares no columns.
    #[error("table {0} has no columns")]
    EmptyTable(String),
    /// Two columns of one table share a name.
    #[error("duplicate column {column} in table {table}")]
    DuplicateColumn { table: String, column: String },
    /// A table declares its primary key more than once, either on several
    /// columns or on a column and as a composite key.
    #[error("table {0} declares more than one primary key")]
    MultiplePrimaryKeys(String),
    /// A key refers to a column the table (or referenced table) does not have.
    #[error("table {table} refers to unknown column {column}")]
    UnknownColumn { table: String, column: String },
    /// A foreign key points at a table that is declared later or not at all.
    #[error("table {table} references {references}, which is not declared before it")]
    ForwardReference { table: String, references: String },
    /// Migration version `0` is reserved for "unset".
    #[error("migration version 0 is reserved")]
    ZeroVersion,
    /// Two migration steps share a version number.
    #[error("duplicate migration version: {0}")]
    DuplicateVersion(SchemaVersion),
    /// The migration sequence skips a version.
    #[error("migration sequence has a gap: expected version {expected}, found {found}")]
    VersionGap {
        expected: SchemaVersion,
        found: SchemaVersion,
    },
}

/// Returns `true` if `name` is a plain SQL identifier.
///
/// Identifiers start with an ASCII letter or underscore and continue with
/// ASCII alphanumerics or underscores, so they never need quoting.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates an ordered table registry.
///
/// Declaration order is the dependency order: a foreign key may only point at
/// the table itself or at a table declared before it. Validation stops at the
/// first problem found.
pub fn validate_registry(tables: &[TableDescriptor]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut declared: Vec<&TableDescriptor> = Vec::new();

    for table in tables {
        if table.name.trim().is_empty() {
            errors.push(ValidationError::EmptyTableName);
            return errors;
        }
        // Names are used verbatim in DDL, so surrounding whitespace is invalid.
        let name = table.name.as_str();
        if !is_valid_identifier(name) {
            errors.push(ValidationError::InvalidIdentifier(name.to_string()));
            return errors;
        }
        if declared.iter().any(|t| t.name == name) {
            errors.push(ValidationError::DuplicateTable(name.to_string()));
            return errors;
        }

        errors.extend(validate_columns(table));
        if !errors.is_empty() {
            return errors;
        }

        errors.extend(validate_foreign_keys(table, &declared));
        if !errors.is_empty() {
            return errors;
        }

        declared.push(table);
    }

    errors
}

fn validate_columns(table: &TableDescriptor) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if table.columns.is_empty() {
        errors.push(ValidationError::EmptyTable(table.name.clone()));
        return errors;
    }

    let mut seen = HashSet::new();
    for column in &table.columns {
        if !is_valid_identifier(&column.name) {
            errors.push(ValidationError::InvalidIdentifier(column.name.clone()));
            return errors;
        }
        if !seen.insert(column.name.as_str()) {
            errors.push(ValidationError::DuplicateColumn {
                table: table.name.clone(),
                column: column.name.clone(),
            });
            return errors;
        }
    }

    for key_column in &table.primary_key {
        if !seen.contains(key_column.as_str()) {
            errors.push(ValidationError::UnknownColumn {
                table: table.name.clone(),
                column: key_column.clone(),
            });
            return errors;
        }
    }

    let column_keys = table.columns.iter().filter(|c| c.primary_key).count();
    let composite_keys = usize::from(!table.primary_key.is_empty());
    if column_keys + composite_keys > 1 {
        errors.push(ValidationError::MultiplePrimaryKeys(table.name.clone()));
    }

    errors
}

fn validate_foreign_keys(
    table: &TableDescriptor,
    declared: &[&TableDescriptor],
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for fk in &table.foreign_keys {
        if table.column(&fk.column).is_none() {
            errors.push(ValidationError::UnknownColumn {
                table: table.name.clone(),
                column: fk.column.clone(),
            });
            return errors;
        }

        let target = if fk.table == table.name {
            Some(table)
        } else {
            declared.iter().copied().find(|t| t.name == fk.table)
        };

        match target {
            None => {
                errors.push(ValidationError::ForwardReference {
                    table: table.name.clone(),
                    references: fk.table.clone(),
                });
                return errors;
            }
            Some(target) if target.column(&fk.references).is_none() => {
                errors.push(ValidationError::UnknownColumn {
                    table: target.name.clone(),
                    column: fk.references.clone(),
                });
                return errors;
            }
            Some(_) => {}
        }
    }

    errors
}

/// Validates that migration versions form exactly `1..=N`.
///
/// The input may be in any order. Version `0`, duplicates, and gaps are
/// rejected; an empty set is valid.
///
/// # Examples
///
/// ```
/// use schema_keeper_core::{SchemaVersion, ValidationError, validate_versions};
///
/// let ok: Vec<SchemaVersion> = [2, 1, 3].into_iter().map(SchemaVersion::new).collect();
/// assert!(validate_versions(&ok).is_empty());
///
/// let gap: Vec<SchemaVersion> = [1, 3].into_iter().map(SchemaVersion::new).collect();
/// assert_eq!(
///     validate_versions(&gap),
///     vec![ValidationError::VersionGap {
///         expected: SchemaVersion::new(2),
///         found: SchemaVersion::new(3),
///     }]
/// );
/// ```
pub fn validate_versions(versions: &[SchemaVersion]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut sorted = versions.to_vec();
    sorted.sort();

    let mut expected = SchemaVersion::new(1);
    for (i, version) in sorted.iter().copied().enumerate() {
        if version.is_unset() {
            errors.push(ValidationError::ZeroVersion);
            return errors;
        }
        if i > 0 && sorted[i - 1] == version {
            errors.push(ValidationError::DuplicateVersion(version));
            return errors;
        }
        if version != expected {
            errors.push(ValidationError::VersionGap {
                expected,
                found: version,
            });
            return errors;
        }
        expected = expected.next();
    }

    errors
}
