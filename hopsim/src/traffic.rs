//! Deterministic application traffic sources.

use serde::{Deserialize, Serialize};

use hoplink::Timestamp;

/// Traffic parameters from the scenario surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrafficSpec {
    /// Payload rate in kilobits per second. Zero disables the source.
    pub rate_kbps: f64,
    /// Fixed payload size in bytes (1..=251).
    pub packet_len: usize,
}

impl Default for TrafficSpec {
    fn default() -> Self {
        Self {
            rate_kbps: 0.0,
            packet_len: 50,
        }
    }
}

/// A lazy byte-stream generator: bytes accrue at the configured rate and a
/// packet is emitted whenever a full payload's worth has accumulated, with
/// the timestamp at which the payload became complete.
#[derive(Clone, Debug)]
pub struct TrafficSource {
    /// Bits per second.
    rate_bps: u64,
    packet_len: usize,
    /// Payloads emitted so far.
    emitted: u64,
    /// Rolling counter stamped into the payload for end-to-end checks.
    next_marker: u8,
}

impl TrafficSource {
    pub fn new(spec: &TrafficSpec) -> Self {
        Self {
            rate_bps: (spec.rate_kbps * 1_000.0) as u64,
            packet_len: spec.packet_len.clamp(1, 251),
            emitted: 0,
            next_marker: 0,
        }
    }

    /// Time at which the n-th payload (1-based) is complete.
    fn completion_time(&self, n: u64) -> Timestamp {
        // bytes * 8 bits / rate, in microseconds, rounded up.
        let bits = n * self.packet_len as u64 * 8;
        let us = (bits * 1_000_000).div_ceil(self.rate_bps);
        Timestamp::from_micros(us)
    }

    /// Produce the next payload if one has fully accumulated by `now`.
    /// Poll until `None`.
    pub fn next(&mut self, now: Timestamp) -> Option<(Vec<u8>, Timestamp)> {
        if self.rate_bps == 0 {
            return None;
        }
        let ready_at = self.completion_time(self.emitted + 1);
        if ready_at > now {
            return None;
        }
        self.emitted += 1;
        let marker = self.next_marker;
        self.next_marker = self.next_marker.wrapping_add(1);
        let mut payload = vec![marker; self.packet_len];
        // First byte doubles as a sequence marker, the rest is filler.
        payload[0] = marker;
        Some((payload, ready_at))
    }
}
