//! Mock Realtime Servers
//!
//! Simulates the realtime WebSocket endpoint so client behavior can be
//! exercised without network access:
//! - Subprotocol handshake with API key capture
//! - Scripted server events (sessions, items, deltas, tool calls)
//! - Recording of every client frame
//! - Server-initiated close

// Allow dead code in test infrastructure - not every test file uses every helper
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics collector for mock server
#[derive(Debug, Default)]
pub struct MockStats {
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
}

impl MockStats {
    pub fn record_open(&self) -> u64 {
        self.connections_opened.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_close(&self) {
        self.connections_closed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn opened(&self) -> u64 {
        self.connections_opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.connections_closed.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> String {
        format!(
            "Opened: {}, Closed: {}, Received: {}, Sent: {}",
            self.opened(),
            self.closed(),
            self.frames_received.load(Ordering::Relaxed),
            self.frames_sent.load(Ordering::Relaxed),
        )
    }
}

pub mod realtime_mock;

pub use realtime_mock::{Handshake, MockRealtimeServer};
