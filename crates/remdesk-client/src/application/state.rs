//! SessionStateMachine: legal lifecycle transitions for one session.
//!
//! ```text
//! Idle ──► Connecting ──► Connected ──► Disconnecting ──► Disconnected
//!              │                              │
//!              └──────────► Failed ◄──────────┘
//! ```
//!
//! - `Idle → Connecting` when `open()` starts the attempt.
//! - `Connecting → Connected` when the driver reports success.
//! - `Connecting → Failed` on driver error, timeout, or cancellation.
//! - `Connected → Disconnecting` on `close()` or a fatal transport error.
//! - `Disconnecting → Disconnected` after a requested teardown completes.
//! - `Disconnecting → Failed` after a teardown caused by a transport error.
//!
//! `Disconnected` and `Failed` are terminal.  A later `open()` builds a new
//! session (and a new state machine); it never revives an old one.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::error::SessionError;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Failed,
}

impl SessionState {
    /// `true` for `Disconnected` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }

    /// `true` while a session holds (or is acquiring) driver resources.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Disconnecting
        )
    }

    /// Whether the graph has an edge from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Disconnecting)
                | (Disconnecting, Disconnected)
                | (Disconnecting, Failed)
        )
    }
}

#[derive(Debug)]
struct Inner {
    current: SessionState,
    history: Vec<SessionState>,
}

/// Thread-safe state holder that rejects transitions missing from the graph.
///
/// The lock is a `std::sync::Mutex`: it is held only for a compare-and-set,
/// never across an `.await`.
#[derive(Debug)]
pub struct SessionStateMachine {
    inner: Mutex<Inner>,
}

impl SessionStateMachine {
    /// Creates a machine in `Idle`.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: SessionState::Idle,
                history: vec![SessionState::Idle],
            }),
        }
    }

    /// Current state.
    pub fn current(&self) -> SessionState {
        self.lock().current
    }

    /// Every state visited so far, oldest first.
    pub fn history(&self) -> Vec<SessionState> {
        self.lock().history.clone()
    }

    /// Moves to `next` if the graph allows it and returns the previous state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IllegalTransition`] and leaves the state
    /// unchanged when there is no edge to `next`.
    pub fn transition(&self, next: SessionState) -> Result<SessionState, SessionError> {
        let mut inner = self.lock();
        let from = inner.current;
        if !from.can_transition_to(next) {
            return Err(SessionError::IllegalTransition { from, to: next });
        }
        inner.current = next;
        inner.history.push(next);
        tracing::trace!(?from, to = ?next, "session state transition");
        Ok(from)
    }

    /// Starts a connect attempt (`Idle → Connecting`).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyConnecting`] or
    /// [`SessionError::AlreadyConnected`] when an attempt is already under
    /// way or has succeeded, and [`SessionError::IllegalTransition`] from any
    /// other non-idle state.
    pub fn begin_connect(&self) -> Result<(), SessionError> {
        match self.current() {
            SessionState::Connecting => Err(SessionError::AlreadyConnecting),
            SessionState::Connected => Err(SessionError::AlreadyConnected),
            _ => self.transition(SessionState::Connecting).map(|_| ()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
