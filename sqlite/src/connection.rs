//! Database connection management.
//!
//! [`ConnectionManager`] owns the single SQLite session used for schema
//! work. Other components borrow the handle for the duration of a call and
//! never keep it.
//!
//! SQLite has no user accounts, so the two credential tiers map onto open
//! modes: [`AccessTier::Privileged`] may create the database file, while
//! [`AccessTier::Application`] can only open a database that already exists.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use schema_keeper_config::{DEFAULT_BUSY_TIMEOUT_MS, DatabaseSettings};
use tracing::{debug, info, warn};

use crate::error::{KeeperError, Result};

/// Credential tier requested when connecting.
///
/// Ordered by strength: a privileged session also satisfies an application
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessTier {
    /// Runtime access to an existing database.
    Application,
    /// Schema-owner access: may create the database and its structures.
    Privileged,
}

impl AccessTier {
    fn open_flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            AccessTier::Privileged => base | OpenFlags::SQLITE_OPEN_CREATE,
            AccessTier::Application => base,
        }
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessTier::Application => f.write_str("application"),
            AccessTier::Privileged => f.write_str("privileged"),
        }
    }
}

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// A database file.
    File(PathBuf),
    /// A private in-memory database, lost on disconnect.
    Memory,
}

impl fmt::Display for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseTarget::File(path) => write!(f, "'{}'", path.display()),
            DatabaseTarget::Memory => f.write_str(":memory:"),
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Database location.
    pub target: DatabaseTarget,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Whether `PRAGMA foreign_keys` is enabled.
    pub foreign_keys: bool,
}

impl ConnectionConfig {
    /// Settings for a database file.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            target: DatabaseTarget::File(path.as_ref().to_path_buf()),
            ..Self::in_memory()
        }
    }

    /// Settings for a private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            target: DatabaseTarget::Memory,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            foreign_keys: true,
        }
    }

    /// Overrides the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Enables or disables foreign-key enforcement.
    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

impl From<&DatabaseSettings> for ConnectionConfig {
    fn from(settings: &DatabaseSettings) -> Self {
        let base = match &settings.path {
            Some(path) => ConnectionConfig::file(path),
            None => ConnectionConfig::in_memory(),
        };
        base.with_busy_timeout(settings.busy_timeout())
            .with_foreign_keys(settings.foreign_keys)
    }
}

/// Owner of the single schema-management session.
///
/// # Examples
///
/// ```
/// use schema_keeper_sqlite::{AccessTier, ConnectionConfig, ConnectionManager};
///
/// let mut manager = ConnectionManager::new(ConnectionConfig::in_memory());
/// manager.connect(AccessTier::Privileged).unwrap();
/// manager.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
///
/// manager.disconnect();
/// manager.disconnect(); // safe to repeat
/// assert!(!manager.is_connected());
/// ```
pub struct ConnectionManager {
    config: ConnectionConfig,
    conn: Option<Connection>,
    tier: Option<AccessTier>,
}

impl ConnectionManager {
    /// Creates a manager; no session is opened until [`connect`](Self::connect).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            conn: None,
            tier: None,
        }
    }

    /// Opens a session at the requested tier.
    ///
    /// A no-op when already connected at the same or a stronger tier. A
    /// privileged request on an application session reopens the file with
    /// the stronger mode. In-memory databases are never reopened.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::ConnectionError`] if the database cannot be
    /// opened or configured.
    pub fn connect(&mut self, tier: AccessTier) -> Result<()> {
        if let Some(current) = self.tier {
            if current >= tier || self.config.target == DatabaseTarget::Memory {
                debug!(target_db = %self.config.target, tier = %current, "Already connected");
                return Ok(());
            }
            debug!(from = %current, to = %tier, "Reopening with stronger access tier");
            self.disconnect();
        }

        let conn = self.open(tier)?;
        self.configure(&conn)?;
        info!(target_db = %self.config.target, tier = %tier, "Connected to database");

        self.conn = Some(conn);
        self.tier = Some(tier);
        Ok(())
    }

    fn open(&self, tier: AccessTier) -> Result<Connection> {
        let opened = match &self.config.target {
            DatabaseTarget::File(path) => Connection::open_with_flags(path, tier.open_flags()),
            DatabaseTarget::Memory => Connection::open_in_memory(),
        };
        opened.map_err(|source| KeeperError::ConnectionError {
            target: self.config.target.to_string(),
            source,
        })
    }

    fn configure(&self, conn: &Connection) -> Result<()> {
        let to_error = |source| KeeperError::ConnectionError {
            target: self.config.target.to_string(),
            source,
        };

        conn.busy_timeout(self.config.busy_timeout)
            .map_err(to_error)?;
        conn.pragma_update(None, "foreign_keys", self.config.foreign_keys)
            .map_err(to_error)?;

        // Force SQLite to read the header so a non-database file fails here
        // rather than on the first schema statement.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(to_error)?;

        Ok(())
    }

    /// Runs a single statement with no implicit transaction.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::NotConnected`] without a session, or
    /// [`KeeperError::DatabaseError`] if the statement fails.
    pub fn execute(&self, sql: &str) -> Result<usize> {
        Ok(self.connection()?.execute(sql, [])?)
    }

    /// Runs a batch of statements with no implicit transaction.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.connection()?.execute_batch(sql)?)
    }

    /// Borrows the open session.
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(KeeperError::NotConnected)
    }

    /// Mutably borrows the open session, e.g. to start a transaction.
    pub fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(KeeperError::NotConnected)
    }

    /// Closes the session. Safe to call when never connected, and repeatedly.
    pub fn disconnect(&mut self) {
        self.tier = None;
        if let Some(conn) = self.conn.take() {
            match conn.close() {
                Ok(()) => debug!(target_db = %self.config.target, "Disconnected"),
                Err((_, e)) => {
                    warn!(target_db = %self.config.target, error = %e, "Error while closing connection")
                }
            }
        }
    }

    /// Returns `true` while a session is open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Tier of the open session, if any.
    pub fn tier(&self) -> Option<AccessTier> {
        self.tier
    }

    /// Connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
