//! Channel diagnostics
//!
//! Counters for one session channel. Malformed frames are dropped silently
//! as far as subscribers are concerned; this is where they show up.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ChannelMetrics {
    /// Transport opens, including reconnects
    pub connections_opened: AtomicU64,
    /// Reconnects scheduled after a transport close
    pub reconnect_attempts: AtomicU64,
    /// Text frames received
    pub frames_received: AtomicU64,
    /// Frames written to the transport
    pub frames_sent: AtomicU64,
    /// Inbound frames that failed to decode
    pub malformed_frames: AtomicU64,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_scheduled(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ChannelMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub reconnect_attempts: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub malformed_frames: u64,
}
