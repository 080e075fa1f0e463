//! RemDesk headless client entry point.
//!
//! Opens one saved (or ad-hoc) profile through the [`ConnectionManager`] and
//! logs lifecycle and frame events until Ctrl-C, stdin EOF, or the session
//! ends on its own.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()              -- profiles + session tuning
//!  └─ ConnectionManager::new()   -- TcpProbeDriver (or MockDriver with --simulate)
//!  └─ manager.open(profile)
//!  └─ event loop
//!       ├─ SessionEvent::Frame         -> log it
//!       ├─ SessionEvent::Failed        -> log, exit non-zero
//!       ├─ stdin line                  -> manager.send_input()
//!       └─ Ctrl-C / EOF / --frames N   -> manager.close()
//! ```
//!
//! # Usage
//!
//! ```text
//! remdesk --list
//! remdesk office
//! remdesk --host 10.0.0.5 --protocol vnc --user alice --save
//! remdesk --simulate --frames 3 office
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use remdesk_client::application::{
    connection_manager::ConnectionManager,
    events::{ChannelSink, SessionEvent},
};
use remdesk_client::infrastructure::{
    drivers::{default_registry, mock::MockBehavior, simulated_registry},
    storage::config::{self as store, AppConfig},
};
use remdesk_core::{ConnectionConfig, InputEvent, ProtocolKind};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Headless remote-session client.
#[derive(Debug, Parser)]
#[command(name = "remdesk", about = "Open a saved RDP/VNC/SSH profile and stream its session", version)]
struct Cli {
    /// Profile to open, by display name or id.
    #[arg(conflicts_with = "host")]
    profile: Option<String>,

    /// Config file to use instead of the platform default.
    #[arg(long, env = "REMDESK_CONFIG")]
    config: Option<PathBuf>,

    /// List saved profiles and exit.
    #[arg(long)]
    list: bool,

    /// Connect to this host instead of a saved profile.
    #[arg(long)]
    host: Option<String>,

    /// Port for `--host`; defaults to the protocol's well-known port.
    #[arg(long, requires = "host")]
    port: Option<i32>,

    /// Protocol for `--host`: rdp, vnc or ssh.
    #[arg(long, default_value = "ssh")]
    protocol: ProtocolKind,

    /// Account name for `--host`.
    #[arg(long, env = "REMDESK_USER", default_value = "")]
    user: String,

    /// Password for the session.  Only read from the environment; profiles
    /// in the config file carry no secret.
    #[arg(skip = std::env::var("REMDESK_SECRET").unwrap_or_default())]
    secret: String,

    /// Store the `--host` profile in the config file.
    #[arg(long, requires = "host")]
    save: bool,

    /// Use offline simulated drivers instead of the network.
    #[arg(long)]
    simulate: bool,

    /// Close the session after this many frames.
    #[arg(long)]
    frames: Option<u64>,
}

impl Cli {
    /// Picks the profile to open: a saved one, or one built from `--host`.
    ///
    /// Returns the profile and whether it belongs in the config file.
    fn resolve_profile(&self, config: &AppConfig) -> anyhow::Result<(ConnectionConfig, bool)> {
        if let Some(host) = &self.host {
            let profile = ConnectionConfig::new(
                host.clone(),
                host.clone(),
                self.port,
                self.user.clone(),
                self.secret.clone(),
                self.protocol,
            );
            return Ok((profile, self.save));
        }
        let Some(key) = &self.profile else {
            bail!("no profile given; pass a profile name, --host, or --list");
        };
        let mut profile = config
            .find_profile(key)
            .cloned()
            .with_context(|| format!("no saved profile named {key:?}"))?;
        profile.secret = self.secret.clone();
        Ok((profile, true))
    }
}

fn print_profiles(config: &AppConfig) {
    if config.profiles.is_empty() {
        println!("no saved profiles");
        return;
    }
    for profile in &config.profiles {
        println!(
            "{id}  {name:<20} {label:<15} {user}@{endpoint}",
            id = profile.id,
            name = profile.display_name,
            label = profile.protocol.label(),
            user = profile.username,
            endpoint = profile.endpoint(),
        );
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => store::config_file_path().context("locating config file")?,
    };
    let mut config = store::load_config_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    if cli.list {
        print_profiles(&config);
        return Ok(());
    }

    let (profile, persist) = cli.resolve_profile(&config)?;
    if !ConnectionManager::validate(&profile) {
        bail!("profile {:?} has an empty hostname or invalid port", profile.display_name);
    }

    let registry = if cli.simulate {
        simulated_registry(MockBehavior::succeed_after(Duration::from_millis(200)))
    } else {
        default_registry()
    };
    let (sink, mut events) = ChannelSink::new();
    let manager = ConnectionManager::new(registry, Arc::new(sink), config.session.into());

    info!(
        profile = %profile.display_name,
        protocol = %profile.protocol,
        endpoint = %profile.endpoint(),
        "RemDesk client starting"
    );
    let handle = manager
        .open(profile.clone())
        .await
        .with_context(|| format!("opening {}", profile.display_name))?;
    info!(session_id = %handle.session_id, "session open; type a line to send it as input, Ctrl-D or Ctrl-C to quit");

    if persist {
        config.upsert_profile(profile.clone());
        config.mark_connected(handle.profile_id, handle.connected_at);
        if let Err(e) = store::save_config_to(&config_path, &config) {
            warn!("could not save config: {e}");
        }
    }

    // ── Main event loop ───────────────────────────────────────────────────────
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut frames_seen = 0u64;
    let mut failure = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => manager.send_input(input_for(profile.protocol, line)).await,
                Ok(None) => {
                    debug!("stdin closed");
                    stdin_open = false;
                    if cli.frames.is_none() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("stdin read error: {e}");
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Some(SessionEvent::Frame { frame, .. }) => {
                    frames_seen += 1;
                    let text = String::from_utf8_lossy(&frame.payload);
                    info!(seq = frame.sequence, bytes = frame.payload.len(), "frame");
                    for line in text.lines() {
                        debug!("  {line}");
                    }
                    if cli.frames.is_some_and(|limit| frames_seen >= limit) {
                        break;
                    }
                }
                Some(SessionEvent::Connected { session_id }) => info!(%session_id, "connected"),
                Some(SessionEvent::Disconnected { session_id }) => {
                    info!(%session_id, "disconnected");
                    break;
                }
                Some(SessionEvent::Failed { session_id, error }) => {
                    error!(%session_id, "session failed: {error}");
                    failure = Some(error);
                    break;
                }
                None => break,
            },
        }
    }

    manager.close().await;
    while let Ok(event) = events.try_recv() {
        debug!(?event, "late session event");
    }
    if let Some(snapshot) = manager.snapshot().await {
        info!(
            state = ?snapshot.state,
            frames = snapshot.frames_delivered,
            "RemDesk client stopped"
        );
    }

    match failure {
        Some(error) => Err(error).context("session ended with an error"),
        None => Ok(()),
    }
}

/// SSH sessions get raw terminal bytes; graphical sessions get typed text.
fn input_for(protocol: ProtocolKind, line: String) -> InputEvent {
    match protocol {
        ProtocolKind::Ssh => InputEvent::TerminalBytes(format!("{line}\n").into_bytes()),
        ProtocolKind::Rdp | ProtocolKind::Vnc => InputEvent::KeyboardText(line),
    }
}
