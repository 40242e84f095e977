//! Error types for configuration and script loading.
//!
//! Provides a unified error type covering I/O, YAML parsing, and migration
//! script naming or sequencing problems.

use schema_keeper_core::ValidationError;
use thiserror::Error;

/// Errors that can occur while loading configuration or migration scripts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A `.sql` file in the migrations directory does not follow
    /// `NNNN_description.sql`.
    #[error("invalid migration script name '{0}': expected NNNN_description.sql")]
    InvalidScriptName(String),

    /// Loaded scripts do not form a gap-free version sequence.
    #[error("invalid migration scripts in {dir}: {}", join_errors(.errors))]
    InvalidScripts {
        dir: String,
        errors: Vec<ValidationError>,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias for results with [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;
