//! Lifecycle of a managed database session.
//!
//! A session moves strictly forward through
//! `Disconnected → Connected → StructuresEnsured → VersionKnown → UpToDate`.
//! Re-entering a state that was already reached is a no-op, so idempotent
//! operations can be repeated; skipping ahead is rejected. The only way back
//! is [`LifecycleState::reset`], performed when the connection is closed.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a managed database currently stands in its startup sequence.
///
/// # Examples
///
/// ```
/// use schema_keeper_core::LifecycleState;
///
/// let mut state = LifecycleState::default();
/// state.advance(LifecycleState::Connected).unwrap();
/// state.advance(LifecycleState::StructuresEnsured).unwrap();
///
/// // Repeating an earlier step keeps the furthest state.
/// state.advance(LifecycleState::Connected).unwrap();
/// assert_eq!(state, LifecycleState::StructuresEnsured);
///
/// // Skipping ahead is not allowed.
/// assert!(state.advance(LifecycleState::UpToDate).is_err());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum LifecycleState {
    /// No session is open.
    #[default]
    Disconnected,
    /// A privileged session is open.
    Connected,
    /// Every registered table has been verified or created.
    StructuresEnsured,
    /// The stored version has been read (or defaulted).
    VersionKnown,
    /// Every known migration step has been applied.
    UpToDate,
}

/// Rejected attempt to skip one or more lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move from {from} to {to}")]
pub struct TransitionError {
    /// State at the time of the attempt.
    pub from: LifecycleState,
    /// Requested state.
    pub to: LifecycleState,
}

impl LifecycleState {
    fn rank(self) -> u8 {
        match self {
            LifecycleState::Disconnected => 0,
            LifecycleState::Connected => 1,
            LifecycleState::StructuresEnsured => 2,
            LifecycleState::VersionKnown => 3,
            LifecycleState::UpToDate => 4,
        }
    }

    /// Moves to `to` if it is the next state; does nothing if `to` was
    /// already reached.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if `to` is more than one step ahead.
    pub fn advance(&mut self, to: LifecycleState) -> Result<(), TransitionError> {
        self.check_advance(to)?;
        if to.rank() > self.rank() {
            *self = to;
        }
        Ok(())
    }

    /// Checks that [`advance`](Self::advance) to `to` would succeed, without
    /// moving.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if `to` is more than one step ahead.
    pub fn check_advance(self, to: LifecycleState) -> Result<(), TransitionError> {
        if to.rank() > self.rank() + 1 {
            return Err(TransitionError { from: self, to });
        }
        Ok(())
    }

    /// Returns to [`Disconnected`](LifecycleState::Disconnected).
    pub fn reset(&mut self) {
        *self = LifecycleState::Disconnected;
    }

    /// Returns `true` once the database is ready for application traffic.
    pub fn is_ready(self) -> bool {
        self == LifecycleState::UpToDate
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Connected => "connected",
            LifecycleState::StructuresEnsured => "structures-ensured",
            LifecycleState::VersionKnown => "version-known",
            LifecycleState::UpToDate => "up-to-date",
        };
        f.write_str(name)
    }
}
