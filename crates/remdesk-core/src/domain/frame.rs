//! Frames streamed from a connected session.
//!
//! # Sequence numbers
//!
//! Every delivered [`FrameEvent`] carries a sequence number.  Within one
//! session the numbers start at 1 and increase by exactly 1 per *delivered*
//! frame.  A frame that is dropped because the consumer is too slow does not
//! consume a number, so a consumer can rely on "no gaps" as a correctness
//! check rather than as a loss indicator.
//!
//! The counter is split into [`FrameSequence::peek`] and
//! [`FrameSequence::commit`] for exactly that reason: the producer stamps a
//! frame with the peeked value, tries to hand it over, and commits only when
//! the hand-over succeeded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One polled snapshot of a session's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEvent {
    /// 1-based, gap-free within a session.
    pub sequence: u64,
    /// Capture time in microseconds since the Unix epoch.
    pub timestamp_us: u64,
    /// Raw output bytes as produced by the driver (image data or terminal text).
    pub payload: Vec<u8>,
}

impl FrameEvent {
    /// Stamps `payload` with `sequence` and the current wall-clock time.
    pub fn new(sequence: u64, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            timestamp_us: current_timestamp_us(),
            payload,
        }
    }

    /// `true` when the driver had nothing to report.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Per-session frame counter.
///
/// Only the frame loop advances it; other tasks may read
/// [`FrameSequence::delivered`] for diagnostics.
#[derive(Debug, Default)]
pub struct FrameSequence {
    delivered: AtomicU64,
}

impl FrameSequence {
    /// Creates a counter with no frames delivered yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next delivered frame will carry.
    pub fn peek(&self) -> u64 {
        self.delivered.load(Ordering::Acquire) + 1
    }

    /// Records one delivered frame and returns its sequence number.
    pub fn commit(&self) -> u64 {
        self.delivered.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of frames delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }
}

fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
