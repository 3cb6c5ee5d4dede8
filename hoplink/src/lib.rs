//! hoplink - BLE link-layer connection machinery with adaptive frequency hopping.
//!
//! A library model of the BLE connected piconet: per-connection state
//! machines exchanging LL data channel PDUs over 37 hopping data channels,
//! plus two channel-quality classifiers that steer the used-channel map
//! through the in-band channel-map-update procedure.
//!
//! # Key Properties
//!
//! - All time is integer microseconds; components never block, they return
//!   the absolute time of their next wake-up
//! - One owner per connection context; packets cross endpoints only as
//!   serialized frames routed by an external scheduler
//! - Protocol failures (CRC, duplicates, overflow) are counted, not raised
//! - Identical seeds and inputs reproduce identical hop sequences and traces
//!
//! # Module Structure
//!
//! - [`time`] - Microsecond timestamps and durations
//! - [`types`] - Access addresses, PHY modes, roles, protocol constants
//! - [`channel`] - Channel map and the channel selection algorithm
//! - [`wire`] - LL PDU framing and CRC-24
//! - [`queue`] - Bounded per-connection transmit queue
//! - [`config`] - Connection configuration and validation
//! - [`connection`] - The link-layer connection state machine
//! - [`classifier`] - Baseline PER and enhanced sliding-window classifiers
//! - [`events`] - Observable link events for subscribers
//! - [`stats`] - Per-connection statistics
//! - [`phy`] - Records exchanged with the PHY stub

pub mod channel;
pub mod classifier;
pub mod config;
pub mod connection;
pub mod events;
pub mod phy;
pub mod queue;
pub mod stats;
pub mod time;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use channel::{select_channel, ChannelMap};
pub use classifier::{Classifier, EafhClassifier, EafhParams, PerClassifier, PerParams};
pub use config::{ConfigError, ConnectionConfig};
pub use connection::{Connection, LinkState};
pub use events::{DisconnectReason, LinkEvent};
pub use phy::{RxFrame, Transmission};
pub use stats::ConnectionStats;
pub use time::{Duration, Timestamp};
pub use types::{AccessAddress, PhyMode, Role, TIFS};
