//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file from the platform-appropriate directory.
//! - Writing changes back (new profiles, `last_connected` stamps).
//! - Providing defaults when the file does not exist yet (first run).
//!
//! The session core never calls into this module; the binary reads a profile
//! here and hands the resulting `ConnectionConfig` to the manager.

pub mod config;
