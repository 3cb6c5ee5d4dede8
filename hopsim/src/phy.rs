//! PHY stub: synthetic interference and the free-space delivery check.
//!
//! The full RF chain (path-loss environments, antenna patterns, WLAN
//! interferer waveforms) lives outside the simulator and is represented here
//! by two deliberately small pieces: an interference model that decides
//! whether a frame on a channel is corrupted, and a range gate derived from
//! the node positions.

use serde::{Deserialize, Serialize};

use hoplink::{Duration, Timestamp};

/// Synthetic interference applied to frames in flight.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum InterferenceModel {
    /// No interference: every frame arrives clean.
    #[default]
    Clean,
    /// Every frame on the listed channels is corrupted.
    ChannelJammer { channels: Vec<u8> },
}

impl InterferenceModel {
    /// Whether a frame occupying `channel` during the given window is
    /// corrupted in flight.
    pub fn corrupts(&self, channel: u8, _start: Timestamp, _duration: Duration) -> bool {
        match self {
            InterferenceModel::Clean => false,
            InterferenceModel::ChannelJammer { channels } => channels.contains(&channel),
        }
    }
}

/// Corrupt a frame so its CRC check fails at the receiver. Flips a payload
/// bit when there is one, otherwise a CRC bit.
pub fn corrupt_frame(frame: &mut [u8]) {
    // Byte 6 is the first payload byte of a data channel frame; frames
    // shorter than that are header+CRC only.
    let idx = if frame.len() > 9 { 6 } else { frame.len() - 1 };
    frame[idx] ^= 0x55;
}

/// Straight-line distance between two positions in metres.
pub fn distance(a: (f64, f64, f64), b: (f64, f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    let dz = a.2 - b.2;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Placeholder received power: transmit power minus a linear spread term.
/// The real path-loss model is an external collaborator; this keeps RSSI
/// fields populated and deterministic.
pub fn stub_rssi(tx_power_dbm: i8, dist_m: f64) -> i8 {
    let rssi = tx_power_dbm as f64 - 40.0 - 2.0 * dist_m;
    rssi.clamp(-120.0, 20.0) as i8
}
