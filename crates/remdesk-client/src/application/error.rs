//! Error taxonomy for the session core.
//!
//! Errors are `Clone` so the same value can be returned to the caller of
//! [`ConnectionManager::open`](super::connection_manager::ConnectionManager::open)
//! and delivered to the event sink.  Detail that would normally live in a
//! non-cloneable source (an `io::Error`, say) is carried as text inside
//! [`DriverError`].
//!
//! There is no "not connected" error.  Sending input to, or capturing output
//! from, a session that is not `Connected` is a no-op.

use std::time::Duration;

use remdesk_core::{ConfigIssue, ProtocolKind};
use thiserror::Error;

use super::driver::DriverError;
use super::state::SessionState;

/// Why a connect attempt did not reach `Connected`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The driver did not finish connecting within the configured timeout.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    /// `close()` (or a newer `open()`) abandoned the attempt.
    #[error("connect attempt cancelled")]
    Cancelled,
    /// The driver reported a failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Errors surfaced by the connection manager and the session state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Precondition check failed; no driver was created.
    #[error("invalid connection config: {0}")]
    InvalidConfig(#[from] ConfigIssue),
    /// No driver factory is registered for the requested protocol.
    #[error("no driver registered for protocol {0}")]
    UnsupportedProtocol(ProtocolKind),
    /// Connection establishment failed.
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    /// The transport failed while the session was connected.
    #[error("session transport failed: {0}")]
    Transport(DriverError),
    #[error("session is already connecting")]
    AlreadyConnecting,
    #[error("session is already connected")]
    AlreadyConnected,
    #[error("illegal session state transition {from:?} -> {to:?}")]
    IllegalTransition { from: SessionState, to: SessionState },
}
