//! Metrics collection for simulation analysis.

use hoplink::{ChannelMap, ConnectionStats, LinkState, Timestamp};

/// Aggregate counters collected by the simulator.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Transmissions routed through the air.
    pub transmissions: u64,
    /// Frames delivered to a listening endpoint.
    pub deliveries: u64,
    /// Deliveries corrupted by interference.
    pub corrupted_deliveries: u64,
    /// Frames that found no endpoint in range and listening.
    pub undelivered: u64,
    /// Channel-map commits observed.
    pub map_updates: u64,
    /// Connections dropped to standby.
    pub disconnects: u64,
    /// Tagged scenario hooks executed.
    pub actions_run: u64,
}

/// Final state of one connection endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub node_name: String,
    pub node_id: u32,
    pub peer_name: String,
    pub peer_id: u32,
    pub state: LinkState,
    pub event_counter: u16,
    pub used_channels: ChannelMap,
    pub stats: ConnectionStats,
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Aggregate counters.
    pub metrics: SimMetrics,
    /// Per-endpoint statistics snapshots.
    pub connections: Vec<ConnectionReport>,
}

impl SimulationResult {
    /// Reports for one node.
    pub fn node(&self, name: &str) -> Vec<&ConnectionReport> {
        self.connections
            .iter()
            .filter(|c| c.node_name == name)
            .collect()
    }

    /// Total payloads delivered across all endpoints.
    pub fn total_delivered_payload_bytes(&self) -> u64 {
        self.connections
            .iter()
            .map(|c| c.stats.rx_payload_bytes)
            .sum()
    }

    /// Whether every endpoint is still connected.
    pub fn all_connected(&self) -> bool {
        self.connections
            .iter()
            .all(|c| c.state != LinkState::Standby)
    }
}
