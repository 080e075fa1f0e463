//! # remdesk-core
//!
//! Shared domain types for RemDesk: connection profiles, the input events a
//! user can push into a remote session, and the frames a session streams back.
//!
//! This crate has no dependencies on sockets, async runtimes, or the file
//! system.  Everything here can be constructed and tested in isolation.
//!
//! # Architecture overview
//!
//! RemDesk lets a user keep a list of named remote-access profiles (RDP, VNC,
//! SSH) and open an interactive session against one of them.  The session
//! orchestration lives in `remdesk-client`; this crate only defines the values
//! that cross its boundary:
//!
//! - **`domain::profile`** – `ConnectionConfig` and `ProtocolKind`, together
//!   with the pure validation and default-port rules.
//! - **`domain::input`** – `InputEvent`, the keyboard / pointer / terminal
//!   input forwarded to a connected driver.
//! - **`domain::frame`** – `FrameEvent` and the `FrameSequence` counter that
//!   numbers delivered frames 1, 2, 3, … without gaps.

pub mod domain;

pub use domain::frame::{FrameEvent, FrameSequence};
pub use domain::input::{InputEvent, PointerButton};
pub use domain::profile::{
    default_port, validate, ConfigIssue, ConnectionConfig, ProfileId, ProtocolKind,
};
