//! remdesk-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does remdesk-client do?
//!
//! It opens an interactive session against one saved remote-access profile
//! and keeps it running:
//!
//! 1. Validates the profile and builds the protocol driver registered for its
//!    `ProtocolKind`.
//! 2. Drives the session through `Idle → Connecting → Connected`, racing the
//!    driver's connect against a timeout and against `close()`.
//! 3. Polls the driver for output once per frame interval and streams
//!    numbered frames to a `SessionEventSink`.
//! 4. Forwards keyboard, pointer, and terminal input to the driver.
//! 5. Tears everything down (frame loop, driver, event queue) on `close()` or
//!    when the transport drops, and reports the outcome to the sink.

/// Application layer: the session connection core.
pub mod application;

/// Infrastructure layer: protocol drivers and config storage.
pub mod infrastructure;

pub use application::connection_manager::{
    ConnectionManager, SessionHandle, SessionSettings, SessionSnapshot,
};
pub use application::driver::{DriverError, DriverRegistry, ProtocolDriver};
pub use application::error::{ConnectError, SessionError};
pub use application::events::{ChannelSink, SessionEvent, SessionEventSink, SessionId};
pub use application::state::SessionState;
