//! Cooperative cross-process migration lock.
//!
//! A single-row `{prefix}migration_lock` table. Whoever inserts the row owns
//! the upgrade window; everyone else fails fast with
//! [`KeeperError::LockHeld`] instead of racing the owner. The lock is
//! advisory: processes that do not check it are not stopped.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{KeeperError, Result};
use crate::schema::{table_exists, validate_prefix};
use crate::version::now_rfc3339;

/// Logical name of the lock table.
pub const LOCK_TABLE: &str = "migration_lock";

/// Current owner of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    /// Holder identifier.
    pub holder: String,
    /// When the lock was taken (RFC 3339, UTC).
    pub acquired_at: String,
}

/// A held migration lock. Release it with [`release`](Self::release).
#[derive(Debug)]
pub struct MigrationLock {
    table: String,
    holder: String,
}

impl MigrationLock {
    /// Takes the lock for `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperError::LockHeld`] if any holder (including this one)
    /// already has the lock.
    pub fn acquire(conn: &Connection, prefix: &str, holder: &str) -> Result<Self> {
        let table = lock_table(conn, prefix)?;

        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {table} (id, holder, acquired_at) VALUES (1, ?1, ?2)"
            ),
            params![holder, now_rfc3339()],
        )?;

        if inserted == 0 {
            let current = read(conn, &table)?;
            let (holder, acquired_at) = current
                .map(|info| (info.holder, info.acquired_at))
                .unwrap_or_else(|| ("<unknown>".to_string(), "<unknown>".to_string()));
            return Err(KeeperError::LockHeld {
                holder,
                acquired_at,
            });
        }

        info!(holder, "Acquired migration lock");
        Ok(Self {
            table,
            holder: holder.to_string(),
        })
    }

    /// Holder identifier.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Releases the lock if it is still held by this holder.
    pub fn release(self, conn: &Connection) -> Result<()> {
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE id = 1 AND holder = ?1", self.table),
            [&self.holder],
        )?;
        if removed == 0 {
            warn!(holder = %self.holder, "Migration lock was already released");
        } else {
            info!(holder = %self.holder, "Released migration lock");
        }
        Ok(())
    }

    /// Returns the current holder, if any.
    pub fn current(conn: &Connection, prefix: &str) -> Result<Option<LockInfo>> {
        validate_prefix(prefix)?;
        let table = format!("{prefix}{LOCK_TABLE}");
        if !table_exists(conn, &table)? {
            return Ok(None);
        }
        read(conn, &table)
    }

    /// Clears a lock regardless of holder, e.g. one left by a crashed process.
    ///
    /// Returns the holder that was removed.
    pub fn force_release(conn: &Connection, prefix: &str) -> Result<Option<LockInfo>> {
        let previous = Self::current(conn, prefix)?;
        if let Some(info) = &previous {
            conn.execute(&format!("DELETE FROM {prefix}{LOCK_TABLE}"), [])?;
            warn!(holder = %info.holder, acquired_at = %info.acquired_at, "Force-released migration lock");
        }
        Ok(previous)
    }
}

fn lock_table(conn: &Connection, prefix: &str) -> Result<String> {
    validate_prefix(prefix)?;
    let table = format!("{prefix}{LOCK_TABLE}");
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL
        )"
    ))?;
    Ok(table)
}

fn read(conn: &Connection, table: &str) -> Result<Option<LockInfo>> {
    let info = conn
        .query_row(
            &format!("SELECT holder, acquired_at FROM {table} WHERE id = 1"),
            [],
            |row| {
                Ok(LockInfo {
                    holder: row.get(0)?,
                    acquired_at: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(info)
}

/// Default holder identifier for this process.
pub fn default_holder() -> String {
    format!("pid-{}", std::process::id())
}
