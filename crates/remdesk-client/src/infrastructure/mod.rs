//! Infrastructure layer for the client.
//!
//! Contains the adapters that touch the outside world: protocol drivers that
//! open sockets, and the TOML store that holds connection profiles.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `remdesk_core`, but MUST NOT be imported by the `application` layer
//! outside of tests.
//!
//! # Sub-modules
//!
//! - **`drivers`** – `ProtocolDriver` implementations (`TcpProbeDriver`,
//!   `MockDriver`) and ready-made registries.
//!
//! - **`storage`** – loads and saves `AppConfig` (session tuning plus the
//!   saved profiles) from the platform config directory.

pub mod drivers;
pub mod storage;
