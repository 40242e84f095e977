//! Core types for versioned relational schemas.
//!
//! This crate defines the backend-independent pieces of schema lifecycle
//! management:
//!
//! - [`SchemaVersion`]: the single persisted integer that tracks which
//!   migration steps have been applied.
//! - [`TableDescriptor`], [`ColumnDef`], [`ForeignKey`]: the declared target
//!   shape of each table.
//! - [`LifecycleState`]: the forward-only startup state machine
//!   (`Disconnected → Connected → StructuresEnsured → VersionKnown → UpToDate`).
//!
//! Validation ([`validate_registry`], [`validate_versions`]) catches
//! structural errors such as duplicate tables, foreign keys that point at
//! tables declared later, and gaps in the migration sequence.
//!
//! # Example
//!
//! ```
//! use schema_keeper_core::*;
//!
//! let registry = vec![
//!     TableDescriptor::new("users")
//!         .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
//!         .with_column(ColumnDef::new("email", ColumnType::Text).unique()),
//!     TableDescriptor::new("clips")
//!         .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
//!         .with_column(ColumnDef::new("owner", ColumnType::Integer))
//!         .with_cascading_foreign_key("owner", "users", "id"),
//! ];
//! assert!(validate_registry(&registry).is_empty());
//!
//! let steps: Vec<SchemaVersion> = (1..=3).map(SchemaVersion::new).collect();
//! assert!(validate_versions(&steps).is_empty());
//! ```

mod state;
mod types;
mod validate;

pub use state::{LifecycleState, TransitionError};
pub use types::*;
pub use validate::{ValidationError, is_valid_identifier, validate_registry, validate_versions};
