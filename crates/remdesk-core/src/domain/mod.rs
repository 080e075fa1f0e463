//! Domain entities for RemDesk.
//!
//! Pure values and rules with no infrastructure dependencies.  The session
//! core in `remdesk-client` depends on these types; they never depend on it.

/// Connection profiles and the protocol kinds they target.
pub mod profile;

/// Input events forwarded to a remote session.
pub mod input;

/// Frames streamed back from a remote session.
pub mod frame;
