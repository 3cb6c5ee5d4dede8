//! Observable link-layer events.
//!
//! Events are sum-typed records delivered by value to subscribers: the
//! channel classifier consumes reception outcomes and event boundaries, the
//! trace writer consumes transmissions and receptions, and the coexistence
//! visualiser (external) consumes all of them.

use crate::channel::ChannelMap;
use crate::time::Timestamp;
use crate::types::{AccessAddress, PhyMode, Role};

/// Why a connection left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// No valid reception within the supervision window.
    SupervisionTimeout,
    /// The peer never acknowledged a Channel Map Indication before its instant.
    MapUpdateUnacknowledged,
}

/// Events emitted by a connection endpoint.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A packet left for the PHY.
    TransmissionStarted {
        at: Timestamp,
        access_address: AccessAddress,
        channel: u8,
        phy: PhyMode,
        role: Role,
        crc_ok: bool,
        frame_len: usize,
    },
    /// A listen window closed with a frame (possibly corrupt) or nothing.
    ReceptionEnded {
        at: Timestamp,
        access_address: AccessAddress,
        channel: u8,
        phy: PhyMode,
        role: Role,
        peer_id: u32,
        rssi_dbm: i8,
        sinr_db: i8,
        /// False when the frame failed its CRC.
        success: bool,
        /// True when the frame's NESN acknowledged our in-flight
        /// transmission (it differed from our sequence counter).
        acknowledged: bool,
        frame_len: usize,
    },
    /// A channel-map update committed at its instant.
    ChannelMapUpdated {
        at: Timestamp,
        peer_name: String,
        peer_id: u32,
        channels: ChannelMap,
    },
    /// A connection event closed.
    ConnectionEventEnded {
        at: Timestamp,
        counter: u16,
        channel: u8,
        tx_packets: u32,
        rx_packets: u32,
        crc_failed: u32,
    },
    /// The connection dropped to standby.
    Disconnected {
        at: Timestamp,
        peer_name: String,
        peer_id: u32,
        reason: DisconnectReason,
    },
}

impl LinkEvent {
    /// Timestamp carried by the event.
    pub fn at(&self) -> Timestamp {
        match self {
            LinkEvent::TransmissionStarted { at, .. }
            | LinkEvent::ReceptionEnded { at, .. }
            | LinkEvent::ChannelMapUpdated { at, .. }
            | LinkEvent::ConnectionEventEnded { at, .. }
            | LinkEvent::Disconnected { at, .. } => *at,
        }
    }
}
