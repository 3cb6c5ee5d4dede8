//! Connection configuration.
//!
//! A configuration is built once at scenario build time and stays immutable
//! for the life of the connection; only the used-channel map changes later,
//! through the in-band channel-map-update procedure. Central and peripheral
//! of one connection share every field except the role.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelMap;
use crate::time::Duration;
use crate::types::{
    AccessAddress, PhyMode, DEFAULT_QUEUE_CAPACITY, MAX_HOP_INCREMENT, MAX_INSTANT_OFFSET,
    MIN_HOP_INCREMENT, MIN_INSTANT_OFFSET, TIFS,
};

/// Immutable parameters of one connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Physical-link identifier shared by both endpoints.
    pub access_address: AccessAddress,
    /// Hop increment for channel selection (5..=16).
    pub hop_increment: u8,
    /// Per-connection CRC seed.
    pub crc_init: u32,
    /// PHY mode for every packet on this connection.
    pub phy: PhyMode,
    /// Connection interval in microseconds.
    pub interval: Duration,
    /// Active period within each event, in microseconds.
    pub active_period: Duration,
    /// Offset of the first event from scenario start, in microseconds.
    pub offset: Duration,
    /// Supervision timeout in microseconds.
    pub supervision_timeout: Duration,
    /// Events between a Channel Map Indication and its commit (6..=255).
    pub instant_offset: u16,
    /// Initial used-channel set (at least two channels).
    pub initial_channels: ChannelMap,
    /// Human-readable peer name (the remote endpoint).
    pub peer_name: String,
    /// Numeric peer id (the remote endpoint).
    pub peer_id: u32,
    /// Transmit queue capacity.
    pub queue_capacity: usize,
}

impl ConnectionConfig {
    /// Reasonable defaults for a 10 ms full-duty connection; scenario files
    /// override the fields they care about.
    pub fn new(access_address: AccessAddress, peer_name: impl Into<String>, peer_id: u32) -> Self {
        Self {
            access_address,
            hop_increment: 7,
            crc_init: 0x555555,
            phy: PhyMode::Le1M,
            interval: Duration::from_millis(10),
            active_period: Duration::from_millis(10),
            offset: Duration::ZERO,
            supervision_timeout: Duration::from_millis(1_000),
            instant_offset: 6,
            initial_channels: ChannelMap::ALL,
            peer_name: peer_name.into(),
            peer_id,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Smallest legal connection interval for a central serving
    /// `peripheral_count` peripherals on this PHY: every peripheral needs
    /// room for one round trip of maximum-length packets per interval.
    pub fn min_interval(phy: PhyMode, peripheral_count: usize) -> Duration {
        (phy.max_packet_duration() + TIFS) * 2 * peripheral_count as u64
    }

    /// Validate against the build-time rules. `peripheral_count` is the
    /// number of peripherals sharing this connection's central.
    pub fn validate(&self, peripheral_count: usize) -> Result<(), ConfigError> {
        if !(MIN_HOP_INCREMENT..=MAX_HOP_INCREMENT).contains(&self.hop_increment) {
            return Err(ConfigError::HopIncrementOutOfRange {
                value: self.hop_increment,
            });
        }
        if self.initial_channels.len() < 2 {
            return Err(ConfigError::ChannelSetTooSmall {
                len: self.initial_channels.len(),
            });
        }
        if !(MIN_INSTANT_OFFSET..=MAX_INSTANT_OFFSET).contains(&self.instant_offset) {
            return Err(ConfigError::InstantOffsetOutOfRange {
                value: self.instant_offset,
            });
        }
        let floor = Self::min_interval(self.phy, peripheral_count);
        if self.interval < floor {
            return Err(ConfigError::IntervalTooShort {
                interval_us: self.interval.as_micros(),
                floor_us: floor.as_micros(),
            });
        }
        if self.active_period == Duration::ZERO || self.active_period > self.interval {
            return Err(ConfigError::ActivePeriodInvalid {
                active_us: self.active_period.as_micros(),
                interval_us: self.interval.as_micros(),
            });
        }
        if self.supervision_timeout <= self.interval {
            return Err(ConfigError::SupervisionTooShort {
                timeout_us: self.supervision_timeout.as_micros(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::QueueCapacityZero);
        }
        Ok(())
    }
}

/// Build-time configuration errors. None are runtime-recoverable; a failed
/// validation fails the whole scenario build.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("hop increment {value} outside 5..=16")]
    HopIncrementOutOfRange { value: u8 },

    #[error("used-channel set has {len} channels, need at least 2")]
    ChannelSetTooSmall { len: usize },

    #[error("instant offset {value} outside 6..=255")]
    InstantOffsetOutOfRange { value: u16 },

    #[error("connection interval {interval_us} us below floor {floor_us} us")]
    IntervalTooShort { interval_us: u64, floor_us: u64 },

    #[error("active period {active_us} us invalid for interval {interval_us} us")]
    ActivePeriodInvalid { active_us: u64, interval_us: u64 },

    #[error("supervision timeout {timeout_us} us must exceed the connection interval")]
    SupervisionTooShort { timeout_us: u64 },

    #[error("transmit queue capacity must be non-zero")]
    QueueCapacityZero,
}
