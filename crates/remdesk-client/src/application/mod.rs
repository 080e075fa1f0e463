//! Application layer: the session connection core.
//!
//! # What does the core do?
//!
//! - **`driver`** – The `ProtocolDriver` trait every RDP/VNC/SSH client
//!   implements, and the `DriverRegistry` that maps a `ProtocolKind` to the
//!   factory building its driver.  Concrete drivers live in
//!   `infrastructure::drivers` and are injected at construction time.
//!
//! - **`state`** – `SessionStateMachine`, which rejects any lifecycle
//!   transition that is not an edge of the session graph.
//!
//! - **`frame_loop`** – The cancellable periodic task that polls the driver
//!   for output while a session is `Connected`.
//!
//! - **`events`** – The `SessionEventSink` contract and the per-session queue
//!   that delivers notifications to it in FIFO order.
//!
//! - **`connection_manager`** – `ConnectionManager`, which ties the pieces
//!   above together and owns at most one session at a time.
//!
//! - **`error`** – `ConnectError` and `SessionError`.

pub mod connection_manager;
pub mod driver;
pub mod error;
pub mod events;
pub mod frame_loop;
pub mod state;
