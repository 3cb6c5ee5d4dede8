//! Records exchanged with the PHY stub.
//!
//! The radio itself (path loss, antennas, interferer waveforms) lives outside
//! this crate; the link layer only produces transmission records and consumes
//! reception indications. The simulator routes transmissions between
//! endpoints by (channel, access address) and decides corruption.

use crate::time::{Duration, Timestamp};
use crate::types::{AccessAddress, PhyMode};

/// One transmission handed to the PHY, scheduled at `ll_timestamp` and
/// occupying the channel for `duration`.
#[derive(Clone, Debug)]
pub struct Transmission {
    pub access_address: AccessAddress,
    /// LSB-first bit expansion of the access address for the stub contract.
    pub access_address_bits: [u8; 32],
    pub channel: u8,
    pub phy: PhyMode,
    pub tx_power_dbm: i8,
    /// Encoded frame (access address, header, payload, CRC).
    pub frame: Vec<u8>,
    pub ll_timestamp: Timestamp,
    /// Source timestamp of the application payload, when one is aboard.
    pub app_timestamp: Option<Timestamp>,
    pub duration: Duration,
    pub frame_len: usize,
}

/// A completed reception delivered by the PHY (the RX_END indication).
///
/// The frame bytes may have been corrupted in flight; the link layer finds
/// out through the CRC. A listen window that closes without an RX_END is the
/// implicit failure case.
#[derive(Clone, Debug)]
pub struct RxFrame {
    pub frame: Vec<u8>,
    pub rssi_dbm: i8,
    pub sinr_db: i8,
    pub access_address: AccessAddress,
    pub channel: u8,
    pub phy: PhyMode,
    pub ll_timestamp: Timestamp,
    pub app_timestamp: Option<Timestamp>,
}
