//! Per-session streaming statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by a session and read by the status endpoint
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_encoded: AtomicU64,
    packets_muxed: AtomicU64,
    bytes_delivered: AtomicU64,
    pending_cycles: AtomicU64,
    output_growths: AtomicU64,
    output_capacity: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_frame(&self, packets: usize) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.packets_muxed.fetch_add(packets as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, bytes: usize) {
        self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_pending(&self) {
        self.pending_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_output(&self, growths: u64, capacity: usize) {
        self.output_growths.store(growths, Ordering::Relaxed);
        self.output_capacity.store(capacity as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            packets_muxed: self.packets_muxed.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            pending_cycles: self.pending_cycles.load(Ordering::Relaxed),
            output_growths: self.output_growths.load(Ordering::Relaxed),
            output_capacity: self.output_capacity.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Frames submitted to the encoder
    pub frames_encoded: u64,

    /// Compressed packets written to the muxer
    pub packets_muxed: u64,

    /// Bytes handed to the HTTP body
    pub bytes_delivered: u64,

    /// Frame cycles that produced no output
    pub pending_cycles: u64,

    /// Times the output buffer was grown
    pub output_growths: u64,

    /// Current output buffer capacity
    pub output_capacity: u64,
}

impl StatsSnapshot {
    /// Calculates frame rate based on delta
    pub fn calculate_fps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let frames_delta = self.frames_encoded.saturating_sub(previous.frames_encoded);
        frames_delta as f64 / elapsed_secs
    }

    /// Calculates bitrate in kbps based on delta
    pub fn calculate_bitrate_kbps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let bytes_delta = self.bytes_delivered.saturating_sub(previous.bytes_delivered);
        (bytes_delta as f64 * 8.0) / elapsed_secs / 1000.0
    }
}
