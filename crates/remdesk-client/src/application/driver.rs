//! ProtocolDriver: the capability set every remote-protocol client provides.
//!
//! RDP, VNC, and SSH differ in everything below this trait: transport,
//! authentication, and how output is encoded.  The session core only ever
//! talks to a `dyn ProtocolDriver`, selected per [`ProtocolKind`] through a
//! [`DriverRegistry`] that is injected when the
//! [`ConnectionManager`](super::connection_manager::ConnectionManager) is built.
//!
//! # Contract
//!
//! - `connect` may suspend on network I/O.  The core races it against a
//!   timeout and a stop signal and simply drops the future to cancel it, so
//!   implementations must be cancel-safe (no half-registered resources that
//!   only a completed `connect` would clean up; `disconnect` must cope).
//! - `disconnect` is idempotent and must release everything the driver owns
//!   (sockets, background tasks) before it returns.
//! - `capture_output` is a fast poll.  It returns an empty buffer when not
//!   connected; a driver whose capture can block applies its own timeout.
//! - `send_input` is best-effort and silently ignores input while not
//!   connected.
//! - `fatal_error` resolves once the transport fails while connected.  The
//!   default never resolves, for drivers that cannot detect a drop.
//!
//! One driver instance belongs to exactly one session and is never reused.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use remdesk_core::{ConnectionConfig, InputEvent, ProtocolKind};
use thiserror::Error;

/// Failure reported by a protocol driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The endpoint could not be reached (DNS, refused, unroutable).
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// The remote side rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The remote side spoke something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// An established transport dropped.
    #[error("transport lost: {0}")]
    TransportLost(String),
}

/// Protocol-specific remote-session client.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    /// Protocol this driver speaks.
    fn kind(&self) -> ProtocolKind;

    /// Establishes the remote session described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the endpoint is unreachable, rejects the
    /// credentials, or violates the protocol.
    async fn connect(&self, config: &ConnectionConfig) -> Result<(), DriverError>;

    /// Tears the session down.  Safe to call at any time, any number of times.
    async fn disconnect(&self);

    /// Latest output snapshot, or an empty buffer when not connected.
    fn capture_output(&self) -> Vec<u8>;

    /// Forwards one input event; ignored when not connected.
    fn send_input(&self, event: &InputEvent);

    /// Resolves with the cause once the connected transport fails.
    async fn fatal_error(&self) -> DriverError {
        std::future::pending().await
    }
}

/// Builds a fresh driver for one session.
pub type DriverFactory = Arc<dyn Fn() -> Arc<dyn ProtocolDriver> + Send + Sync>;

/// Maps each protocol kind to the factory that builds its driver.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<ProtocolKind, DriverFactory>,
}

impl DriverRegistry {
    /// Creates an empty registry; every kind is unsupported until registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `kind`.
    pub fn register<F>(&mut self, kind: ProtocolKind, factory: F)
    where
        F: Fn() -> Arc<dyn ProtocolDriver> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, kind: ProtocolKind, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn ProtocolDriver> + Send + Sync + 'static,
    {
        self.register(kind, factory);
        self
    }

    /// Returns `true` if a driver can be built for `kind`.
    pub fn supports(&self, kind: ProtocolKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds in display order.
    pub fn kinds(&self) -> Vec<ProtocolKind> {
        ProtocolKind::ALL
            .into_iter()
            .filter(|k| self.supports(*k))
            .collect()
    }

    /// Builds a new driver for `kind`, or `None` if none is registered.
    pub fn create(&self, kind: ProtocolKind) -> Option<Arc<dyn ProtocolDriver>> {
        self.factories.get(&kind).map(|factory| factory())
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
