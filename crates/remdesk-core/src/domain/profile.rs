//! Connection profiles: the immutable description of a remote endpoint.
//!
//! A [`ConnectionConfig`] is owned by the caller (the profile store) and is
//! passed by value into the session core.  Once a session starts it is never
//! mutated; editing a profile produces a new value for the next session.
//!
//! # Ports
//!
//! `port` is stored as a signed 32-bit integer rather than `u16` so that an
//! out-of-range value coming from a form field or a hand-edited config file
//! (`0`, `-1`, `70000`) can be represented and rejected by [`validate`]
//! instead of failing deserialization with an opaque error.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Stable identifier of a stored profile.
pub type ProfileId = Uuid;

/// The remote-access protocol a profile targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Microsoft Remote Desktop Protocol.
    Rdp,
    /// Virtual Network Computing (RFB).
    Vnc,
    /// Secure Shell terminal session.
    Ssh,
}

impl ProtocolKind {
    /// Every supported kind, in display order.
    pub const ALL: [ProtocolKind; 3] = [ProtocolKind::Rdp, ProtocolKind::Vnc, ProtocolKind::Ssh];

    /// Human-readable label shown next to a profile.
    pub fn label(self) -> &'static str {
        match self {
            ProtocolKind::Rdp => "Remote Desktop",
            ProtocolKind::Vnc => "VNC",
            ProtocolKind::Ssh => "SSH",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolKind::Rdp => "rdp",
            ProtocolKind::Vnc => "vnc",
            ProtocolKind::Ssh => "ssh",
        };
        f.write_str(s)
    }
}

impl FromStr for ProtocolKind {
    type Err = ConfigIssue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rdp" => Ok(ProtocolKind::Rdp),
            "vnc" => Ok(ProtocolKind::Vnc),
            "ssh" => Ok(ProtocolKind::Ssh),
            _ => Err(ConfigIssue::UnknownProtocol(s.to_string())),
        }
    }
}

/// Returns the well-known port for `kind`: RDP 3389, VNC 5900, SSH 22.
pub fn default_port(kind: ProtocolKind) -> u16 {
    match kind {
        ProtocolKind::Rdp => 3389,
        ProtocolKind::Vnc => 5900,
        ProtocolKind::Ssh => 22,
    }
}

/// Reasons a [`ConnectionConfig`] is rejected before any driver is created.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigIssue {
    #[error("hostname must not be empty")]
    EmptyHostname,
    #[error("port {0} is outside 1..=65535")]
    PortOutOfRange(i32),
    #[error("unknown protocol {0:?}; expected rdp, vnc or ssh")]
    UnknownProtocol(String),
}

/// Parameters describing one remote endpoint.
///
/// `Debug` output redacts `secret`; log the config freely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Profile identifier assigned by the profile store.
    #[serde(default = "Uuid::new_v4")]
    pub id: ProfileId,
    /// Name shown in the profile list.
    pub display_name: String,
    /// DNS name or IP literal of the remote host.
    pub hostname: String,
    /// TCP port; must be within `1..=65535` to be valid.
    pub port: i32,
    /// Account name presented during authentication.
    #[serde(default)]
    pub username: String,
    /// Password or passphrase handed to the driver.  Never read from or
    /// written to a profile file.
    #[serde(skip)]
    pub secret: String,
    /// Which protocol driver handles this profile.
    pub protocol: ProtocolKind,
    /// Creation time, seconds since the Unix epoch.
    #[serde(default = "unix_now")]
    pub created_at: u64,
    /// Time of the last successful connect, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<u64>,
}

impl ConnectionConfig {
    /// Builds a new profile.  When `port` is `None` the protocol's default
    /// port is used.
    pub fn new(
        display_name: impl Into<String>,
        hostname: impl Into<String>,
        port: Option<i32>,
        username: impl Into<String>,
        secret: impl Into<String>,
        protocol: ProtocolKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            hostname: hostname.into(),
            port: port.unwrap_or_else(|| i32::from(default_port(protocol))),
            username: username.into(),
            secret: secret.into(),
            protocol,
            created_at: unix_now(),
            last_connected: None,
        }
    }

    /// Returns the port as `u16` when it is in range.
    pub fn port_u16(&self) -> Option<u16> {
        u16::try_from(self.port).ok().filter(|p| *p != 0)
    }

    /// `host:port` as typed by the user.  IPv6 literals are bracketed.
    pub fn endpoint(&self) -> String {
        if self.hostname.contains(':') && !self.hostname.starts_with('[') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    /// `true` when [`validate`] accepts this config.
    pub fn is_valid(&self) -> bool {
        validate(self).is_ok()
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("created_at", &self.created_at)
            .field("last_connected", &self.last_connected)
            .finish()
    }
}

/// Checks the preconditions for opening a session.  Performs no network I/O.
///
/// # Errors
///
/// Returns [`ConfigIssue::EmptyHostname`] when the hostname is blank and
/// [`ConfigIssue::PortOutOfRange`] when the port is not in `1..=65535`.
pub fn validate(config: &ConnectionConfig) -> Result<(), ConfigIssue> {
    if config.hostname.trim().is_empty() {
        return Err(ConfigIssue::EmptyHostname);
    }
    if !(1..=65535).contains(&config.port) {
        return Err(ConfigIssue::PortOutOfRange(config.port));
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
