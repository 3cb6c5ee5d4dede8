//! Core types and constants for the BLE link layer.

use core::fmt;
use core::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::time::Duration;

/// Number of BLE data channels (indices 0..=36).
pub const DATA_CHANNEL_COUNT: u8 = 37;

/// Inter-frame space between consecutive packets on the same channel.
pub const TIFS: Duration = Duration::from_micros(150);

/// Maximum LL payload length in bytes.
pub const MAX_PAYLOAD_LEN: usize = 251;

/// Valid hop increment range for channel selection.
pub const MIN_HOP_INCREMENT: u8 = 5;
pub const MAX_HOP_INCREMENT: u8 = 16;

/// Valid range for the channel-map-update instant offset.
pub const MIN_INSTANT_OFFSET: u16 = 6;
pub const MAX_INSTANT_OFFSET: u16 = 255;

/// Default per-connection TX queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

// LLID values in the data channel PDU header
pub const LLID_DATA_CONTINUATION: u8 = 0b01; // also the empty PDU
pub const LLID_DATA_START: u8 = 0b10;
pub const LLID_CONTROL: u8 = 0b11;

/// LL control opcode for the Channel Map Indication.
pub const OPCODE_CHANNEL_MAP_IND: u8 = 0x01;

/// 32-bit identifier distinguishing one BLE physical link.
///
/// Rendered as an 8-character hexadecimal string in configuration files and
/// logs. The transmit path also needs the address as individual bits for the
/// PHY record contract; see [`AccessAddress::bits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessAddress(pub u32);

impl AccessAddress {
    /// Expand to LSB-first bits, one byte per bit, for the PHY record.
    pub fn bits(self) -> [u8; 32] {
        let mut bits = [0u8; 32];
        for (i, bit) in bits.iter_mut().enumerate() {
            *bit = ((self.0 >> i) & 1) as u8;
        }
        bits
    }
}

impl fmt::Display for AccessAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl FromStr for AccessAddress {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u32::from_str_radix(s, 16).map(AccessAddress)
    }
}

impl Serialize for AccessAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{self}"))
    }
}

impl<'de> Deserialize<'de> for AccessAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| {
            D::Error::custom(format!("invalid access address {s:?}, expected 8 hex chars"))
        })
    }
}

/// Endpoint role in a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Central,
    Peripheral,
}

/// BLE PHY modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhyMode {
    Le1M,
    Le2M,
    Le500K,
    Le125K,
}

impl PhyMode {
    /// On-air duration of a data channel packet with the given payload length.
    ///
    /// Uncoded PHYs: preamble + access address + 2-byte header + payload +
    /// 3-byte CRC at 8 µs/byte (LE 1M) or 4 µs/byte (LE 2M, 2-byte preamble).
    /// Coded PHYs: 80 µs preamble, FEC block 1 (AA + CI + TERM1 at S=8), then
    /// header + payload + CRC + 3-bit TERM2 at 2 µs/bit (S=2) or 8 µs/bit (S=8).
    pub fn packet_duration(self, payload_len: usize) -> Duration {
        let us = match self {
            PhyMode::Le1M => (1 + 4 + 2 + payload_len as u64 + 3) * 8,
            PhyMode::Le2M => (2 + 4 + 2 + payload_len as u64 + 3) * 4,
            PhyMode::Le500K => 80 + 256 + 16 + 24 + ((2 + payload_len as u64 + 3) * 8 + 3) * 2,
            PhyMode::Le125K => 80 + 256 + 16 + 24 + ((2 + payload_len as u64 + 3) * 8 + 3) * 8,
        };
        Duration::from_micros(us)
    }

    /// Duration of a maximum-length packet, used by the continuation
    /// predicate and the connection-interval floor.
    pub fn max_packet_duration(self) -> Duration {
        self.packet_duration(MAX_PAYLOAD_LEN)
    }

    /// True for the coded PHYs that carry a coding indicator on the air.
    pub fn is_coded(self) -> bool {
        matches!(self, PhyMode::Le500K | PhyMode::Le125K)
    }
}

/// 1-bit sequence counter (SN or NESN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeqBit(bool);

impl SeqBit {
    pub fn flip(&mut self) {
        self.0 = !self.0;
    }

    pub fn as_bool(self) -> bool {
        self.0
    }

    pub fn bit(self) -> u8 {
        self.0 as u8
    }
}

impl From<bool> for SeqBit {
    fn from(b: bool) -> Self {
        SeqBit(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_address_display_roundtrip() {
        let aa = AccessAddress(0x487647F2);
        assert_eq!(format!("{aa}"), "487647F2");
        assert_eq!("487647F2".parse::<AccessAddress>().unwrap(), aa);
    }

    #[test]
    fn test_access_address_bits() {
        let bits = AccessAddress(0x0000_0001).bits();
        assert_eq!(bits[0], 1);
        assert!(bits[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_packet_durations_ordered_by_phy() {
        // Same payload must be fastest on LE 2M and slowest on LE 125K.
        let len = 50;
        let d2m = PhyMode::Le2M.packet_duration(len);
        let d1m = PhyMode::Le1M.packet_duration(len);
        let d500 = PhyMode::Le500K.packet_duration(len);
        let d125 = PhyMode::Le125K.packet_duration(len);
        assert!(d2m < d1m);
        assert!(d1m < d500);
        assert!(d500 < d125);
    }

    #[test]
    fn test_le1m_empty_pdu_duration() {
        // Empty PDU: 10 framing bytes at 8 us/byte.
        assert_eq!(PhyMode::Le1M.packet_duration(0).as_micros(), 80);
    }

    #[test]
    fn test_seq_bit_flip() {
        let mut sn = SeqBit::default();
        assert_eq!(sn.bit(), 0);
        sn.flip();
        assert_eq!(sn.bit(), 1);
        sn.flip();
        assert_eq!(sn.bit(), 0);
    }
}
