//! Migration script loading from a directory.
//!
//! Scripts are plain SQL files named `NNNN_description.sql`, where `NNNN` is
//! the version the script migrates *to*. Leading zeros are optional. Files
//! without a `.sql` extension are ignored, so a `README.md` can live next to
//! the scripts.
//!
//! ```text
//! migrations/
//! ├── 0001_create_users.sql
//! ├── 0002_add_email_index.sql
//! └── 0003_clip_votes.sql
//! ```
//!
//! # Example
//!
//! ```no_run
//! use schema_keeper_config::ScriptSet;
//!
//! let scripts = ScriptSet::from_dir("migrations/").unwrap();
//! for script in scripts.iter() {
//!     println!("{} {} ({})", script.version, script.description, script.checksum);
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use schema_keeper_core::{SchemaVersion, validate_versions};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ConfigError, Result};

static SCRIPT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_([A-Za-z0-9][A-Za-z0-9_\-]*)\.sql$").expect("static regex must compile")
});

/// Returns the lowercase hex SHA-256 of a SQL script body.
///
/// # Examples
///
/// ```
/// use schema_keeper_config::sql_checksum;
///
/// let a = sql_checksum("CREATE TABLE t (id INTEGER);");
/// assert_eq!(a.len(), 64);
/// assert_ne!(a, sql_checksum("CREATE TABLE u (id INTEGER);"));
/// ```
pub fn sql_checksum(sql: &str) -> String {
    let hash = Sha256::digest(sql.as_bytes());
    format!("{:x}", hash)
}

/// One SQL migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    /// Version this script migrates to.
    pub version: SchemaVersion,
    /// Human-readable description derived from the file name.
    pub description: String,
    /// Script body.
    pub sql: String,
    /// SHA-256 of `sql`.
    pub checksum: String,
    /// Source file.
    pub path: PathBuf,
}

impl MigrationScript {
    /// Builds a script from a file name and body.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidScriptName`] if `file_name` does not
    /// match `NNNN_description.sql`.
    pub fn parse(path: impl Into<PathBuf>, sql: String) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let caps = SCRIPT_NAME_RE
            .captures(&file_name)
            .ok_or_else(|| ConfigError::InvalidScriptName(file_name.clone()))?;
        let version: u32 = caps[1]
            .parse()
            .map_err(|_| ConfigError::InvalidScriptName(file_name.clone()))?;
        let description = caps[2].replace(['_', '-'], " ");

        Ok(Self {
            version: SchemaVersion::new(version),
            description,
            checksum: sql_checksum(&sql),
            sql,
            path,
        })
    }
}

/// Ordered, gap-free collection of migration scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptSet {
    scripts: Vec<MigrationScript>,
}

impl ScriptSet {
    /// Loads every `*.sql` file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the directory or a file cannot be
    /// read, [`ConfigError::InvalidScriptName`] for a badly named `.sql`
    /// file, or [`ConfigError::InvalidScripts`] if versions are not exactly
    /// `1..=N`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_scripts(Self::load_dir(dir)?).map_err(|err| match err {
            ConfigError::InvalidScripts { errors, .. } => ConfigError::InvalidScripts {
                dir: dir.display().to_string(),
                errors,
            },
            other => other,
        })
    }

    /// Parses every `*.sql` file in `dir`, sorted by version, without
    /// checking that the versions form `1..=N`.
    ///
    /// Used when scripts are combined with steps defined elsewhere and only
    /// the combined sequence has to be gap-free.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the directory or a file cannot be
    /// read, or [`ConfigError::InvalidScriptName`] for a badly named `.sql`
    /// file.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<MigrationScript>> {
        let mut scripts = Vec::new();

        for entry in std::fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            let file_path = entry.path();
            if !file_path.is_file()
                || file_path.extension().and_then(|e| e.to_str()) != Some("sql")
            {
                continue;
            }
            let sql = std::fs::read_to_string(&file_path)?;
            let script = MigrationScript::parse(file_path, sql)?;
            debug!(version = %script.version, path = %script.path.display(), "Loaded migration script");
            scripts.push(script);
        }

        scripts.sort_by_key(|s| s.version);
        Ok(scripts)
    }

    /// Builds a set from already-parsed scripts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidScripts`] if versions are not exactly
    /// `1..=N`.
    pub fn from_scripts(mut scripts: Vec<MigrationScript>) -> Result<Self> {
        let versions: Vec<SchemaVersion> = scripts.iter().map(|s| s.version).collect();
        let errors = validate_versions(&versions);
        if !errors.is_empty() {
            return Err(ConfigError::InvalidScripts {
                dir: "<memory>".to_string(),
                errors,
            });
        }
        scripts.sort_by_key(|s| s.version);
        Ok(Self { scripts })
    }

    /// Iterates scripts in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationScript> {
        self.scripts.iter()
    }

    /// Highest script version, or [`SchemaVersion::ZERO`] when empty.
    pub fn latest(&self) -> SchemaVersion {
        self.scripts
            .last()
            .map(|s| s.version)
            .unwrap_or(SchemaVersion::ZERO)
    }

    /// Number of scripts.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Returns `true` if no scripts were loaded.
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl IntoIterator for ScriptSet {
    type Item = MigrationScript;
    type IntoIter = std::vec::IntoIter<MigrationScript>;

    fn into_iter(self) -> Self::IntoIter {
        self.scripts.into_iter()
    }
}
