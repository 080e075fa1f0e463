//! Integration tests for the remdesk-core public API.
//!
//! These tests exercise profile validation, default ports, protocol parsing,
//! and the frame counter together, the way the session core consumes them.

use remdesk_core::{
    default_port, validate, ConfigIssue, ConnectionConfig, FrameEvent, FrameSequence,
    ProtocolKind,
};

fn profile(hostname: &str, port: i32) -> ConnectionConfig {
    ConnectionConfig::new("test", hostname, Some(port), "user", "secret", ProtocolKind::Vnc)
}

#[test]
fn test_validate_accepts_full_port_range() {
    for port in [1, 22, 3389, 5900, 65_535] {
        assert_eq!(validate(&profile("host", port)), Ok(()), "port {port}");
    }
}

#[test]
fn test_validate_rejects_out_of_range_ports() {
    for port in [i32::MIN, -1, 0, 65_536, i32::MAX] {
        assert_eq!(
            validate(&profile("host", port)),
            Err(ConfigIssue::PortOutOfRange(port)),
            "port {port}"
        );
    }
}

#[test]
fn test_validate_rejects_blank_hostnames() {
    for host in ["", " ", "\t"] {
        assert_eq!(validate(&profile(host, 22)), Err(ConfigIssue::EmptyHostname));
    }
}

#[test]
fn test_new_profile_without_port_uses_protocol_default() {
    for kind in ProtocolKind::ALL {
        let cfg = ConnectionConfig::new("n", "h", None, "u", "", kind);
        assert_eq!(cfg.port_u16(), Some(default_port(kind)));
        assert!(cfg.is_valid());
    }
}

#[test]
fn test_protocol_round_trips_through_text() {
    for kind in ProtocolKind::ALL {
        let parsed: ProtocolKind = kind.to_string().parse().expect("parse display form");
        assert_eq!(parsed, kind);
    }
    assert_eq!("  VNC ".parse::<ProtocolKind>(), Ok(ProtocolKind::Vnc));
    assert!(matches!(
        "telnet".parse::<ProtocolKind>(),
        Err(ConfigIssue::UnknownProtocol(s)) if s == "telnet"
    ));
}

#[test]
fn test_debug_output_never_contains_secret() {
    let cfg = ConnectionConfig::new("n", "h", None, "u", "hunter2", ProtocolKind::Rdp);
    let printed = format!("{cfg:?}");
    assert!(!printed.contains("hunter2"));
    assert!(printed.contains("<redacted>"));
}

#[test]
fn test_frame_sequence_skips_nothing_when_offers_fail() {
    // Arrange: every third hand-over fails
    let seq = FrameSequence::new();
    let mut delivered = Vec::new();

    // Act
    for attempt in 1..=9 {
        let frame = FrameEvent::new(seq.peek(), vec![attempt]);
        if attempt % 3 != 0 {
            seq.commit();
            delivered.push(frame.sequence);
        }
    }

    // Assert
    assert_eq!(delivered, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(seq.delivered(), 6);
}
