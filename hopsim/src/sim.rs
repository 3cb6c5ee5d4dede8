//! Discrete event simulator for BLE piconets.

use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hashbrown::HashMap;
use tracing::{debug, warn};

use hoplink::wire::decode_frame;
use hoplink::{AccessAddress, Duration, LinkEvent, Role, RxFrame, Timestamp, Transmission};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{ConnectionReport, SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::pcap::{pcap_filename, Direction, PcapWriter};
use crate::phy::{corrupt_frame, distance, stub_rssi, InterferenceModel};

/// Discrete event simulator: owns the nodes, the event queue, the
/// interference model, and the trace writers.
pub struct Simulator {
    /// All nodes in the simulation.
    nodes: Vec<SimNode>,
    /// Endpoints of each physical link: access address -> (node, conn).
    endpoints: HashMap<AccessAddress, Vec<(usize, usize)>>,
    /// Classifier callback period per node, when one is scheduled.
    classifier_periods: Vec<Option<Duration>>,
    /// Current simulation time.
    current_time: Timestamp,
    /// Priority queue of scheduled events.
    event_queue: BinaryHeap<ScheduledEvent>,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// RNG state for the random-loss placeholder.
    rng_state: u64,
    /// Probability that any delivery is corrupted, independent of channel.
    loss_rate: f64,
    /// Synthetic interference model.
    interference: InterferenceModel,
    /// Receiver noise floor recorded in traces.
    noise_floor_dbm: i8,
    /// Collected metrics.
    metrics: SimMetrics,
    /// Per-node PCAP writers, aligned with `nodes`.
    pcap: Vec<Option<PcapWriter<BufWriter<File>>>>,
}

impl Simulator {
    /// Create a new simulator with the given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            endpoints: HashMap::new(),
            classifier_periods: Vec::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            next_seq: 0,
            rng_state: seed,
            loss_rate: 0.0,
            interference: InterferenceModel::Clean,
            noise_floor_dbm: -95,
            metrics: SimMetrics::default(),
            pcap: Vec::new(),
        }
    }

    /// Set the interference model.
    pub fn with_interference(mut self, model: InterferenceModel) -> Self {
        self.interference = model;
        self
    }

    /// Set a global random corruption probability.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Add a node and schedule its first run and classifier callback.
    pub fn add_node(&mut self, node: SimNode) -> usize {
        let idx = self.nodes.len();
        let period = node
            .links
            .iter()
            .filter_map(|l| l.classifier.as_ref().and_then(|c| c.tick_period()))
            .min();
        let first_wake = node.next_wake();
        for (c_idx, link) in node.links.iter().enumerate() {
            self.endpoints
                .entry(link.conn.config().access_address)
                .or_default()
                .push((idx, c_idx));
        }
        self.nodes.push(node);
        self.classifier_periods.push(period);
        self.pcap.push(None);

        if first_wake < Timestamp::MAX {
            self.schedule(first_wake, Event::NodeRun { node: idx, seq: 0 });
        }
        if let Some(period) = period {
            self.schedule(self.current_time + period, Event::ClassifierTick { node: idx });
        }
        idx
    }

    pub fn node(&self, idx: usize) -> &SimNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut SimNode {
        &mut self.nodes[idx]
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Open one PCAP file per node in `dir`, named from the wall clock.
    pub fn enable_pcap(&mut self, dir: &Path, unix_secs: u64) -> std::io::Result<()> {
        for (idx, node) in self.nodes.iter().enumerate() {
            let path = dir.join(pcap_filename(&node.name, node.id, unix_secs));
            let writer = PcapWriter::new(BufWriter::new(File::create(path)?))?;
            self.pcap[idx] = Some(writer);
        }
        Ok(())
    }

    /// Schedule an event.
    fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    /// Schedule a scenario action, optionally periodic.
    pub fn schedule_action(
        &mut self,
        time: Timestamp,
        action: ScenarioAction,
        every: Option<Duration>,
    ) {
        self.schedule(time, Event::Action { action, every });
    }

    /// Run the simulation until the specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some(next) = self.event_queue.peek() {
            if next.time > end_time {
                break;
            }
            let entry = self.event_queue.pop().unwrap();
            self.advance_time(entry.time);
            self.process_event(entry.event);
        }
        self.advance_time(end_time);
        self.result()
    }

    /// Run the simulation for the specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    fn advance_time(&mut self, time: Timestamp) {
        debug_assert!(time >= self.current_time, "scheduler time must not move backwards");
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::NodeRun { node, seq } => {
                // Superseded entries are no-ops.
                if seq == self.nodes[node].run_seq {
                    self.step_node(node);
                }
            }
            Event::RxStart {
                node,
                conn,
                channel,
                access_address,
            } => {
                let now = self.current_time;
                if let Some(link) = self.nodes[node].links.get_mut(conn) {
                    link.conn.on_rx_start(now, channel, access_address);
                }
                self.step_node(node);
            }
            Event::RxEnd { node, conn, rx } => {
                self.deliver(node, conn, rx);
                self.step_node(node);
            }
            Event::ClassifierTick { node } => {
                let now = self.current_time;
                self.nodes[node].classifier_tick(now);
                if let Some(period) = self.classifier_periods[node] {
                    if self.nodes[node].has_active_connections() {
                        self.schedule(now + period, Event::ClassifierTick { node });
                    }
                }
            }
            Event::Action { action, every } => {
                let now = self.current_time;
                self.execute_action(action.clone());
                if let Some(period) = every {
                    self.schedule(now + period, Event::Action { action, every });
                }
            }
        }
    }

    /// Run one node step and route whatever it produced.
    fn step_node(&mut self, idx: usize) {
        let now = self.current_time;
        self.nodes[idx].run(now);
        let (outgoing, events) = self.nodes[idx].collect(now);

        for (_, transmission) in outgoing {
            self.route_transmission(idx, transmission);
        }
        for (_, event) in events {
            self.record_event(&event);
        }

        let wake = self.nodes[idx].next_wake();
        if wake < Timestamp::MAX {
            self.nodes[idx].run_seq += 1;
            let seq = self.nodes[idx].run_seq;
            self.schedule(wake, Event::NodeRun { node: idx, seq });
        }
    }

    /// Route a transmission to every endpoint of the same physical link that
    /// is within range, scheduling its RX_START and RX_END indications.
    fn route_transmission(&mut self, from: usize, t: Transmission) {
        self.metrics.transmissions += 1;
        self.write_pcap_tx(from, &t);

        let start = t.ll_timestamp;
        let end = start + t.duration;
        let jammed = self.interference.corrupts(t.channel, start, t.duration);
        let random_loss = self.loss_rate > 0.0 && self.random_f64() < self.loss_rate;
        let from_pos = self.nodes[from].position;
        let targets = self
            .endpoints
            .get(&t.access_address)
            .cloned()
            .unwrap_or_default();

        let mut delivered = false;
        let mut pending = Vec::new();
        for (n_idx, c_idx) in targets {
            if n_idx == from {
                continue;
            }
            let node = &self.nodes[n_idx];
            let dist = distance(from_pos, node.position);
            if node.radio.range_m > 0.0 && dist > node.radio.range_m {
                continue;
            }
            let link = &node.links[c_idx];
            if !link.conn.is_active() {
                continue;
            }
            let corrupted = random_loss || (jammed && node.radio.interference_fidelity != 0);
            let mut frame = t.frame.clone();
            if corrupted {
                corrupt_frame(&mut frame);
            }
            let rx = RxFrame {
                frame,
                rssi_dbm: stub_rssi(t.tx_power_dbm, dist),
                sinr_db: if corrupted { 0 } else { 20 },
                access_address: t.access_address,
                channel: t.channel,
                phy: t.phy,
                ll_timestamp: end,
                app_timestamp: t.app_timestamp,
            };
            pending.push((n_idx, c_idx, rx, corrupted));
            delivered = true;
        }

        for (n_idx, c_idx, rx, corrupted) in pending {
            if corrupted {
                self.metrics.corrupted_deliveries += 1;
            }
            self.metrics.deliveries += 1;
            self.schedule(
                start,
                Event::RxStart {
                    node: n_idx,
                    conn: c_idx,
                    channel: t.channel,
                    access_address: t.access_address.0,
                },
            );
            self.schedule(
                end,
                Event::RxEnd {
                    node: n_idx,
                    conn: c_idx,
                    rx,
                },
            );
        }
        if !delivered {
            self.metrics.undelivered += 1;
        }
    }

    /// Hand a finished frame to the receiving endpoint.
    fn deliver(&mut self, node: usize, conn: usize, rx: RxFrame) {
        self.write_pcap_rx(node, conn, &rx);
        let now = self.current_time;
        if let Some(link) = self.nodes[node].links.get_mut(conn) {
            link.conn.on_rx_end(now, rx);
        }
    }

    fn record_event(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::ChannelMapUpdated { .. } => self.metrics.map_updates += 1,
            LinkEvent::Disconnected { .. } => self.metrics.disconnects += 1,
            _ => {}
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::JamChannels { channels } => {
                debug!(?channels, "interference on");
                self.interference = InterferenceModel::ChannelJammer { channels };
            }
            ScenarioAction::ClearJamming => {
                debug!("interference off");
                self.interference = InterferenceModel::Clean;
            }
            ScenarioAction::InjectPayload {
                node,
                conn,
                payload,
            } => {
                let now = self.current_time;
                if let Some(link) = self.nodes[node].links.get_mut(conn) {
                    link.conn.enqueue(payload, now);
                }
                self.step_node(node);
            }
            ScenarioAction::Tagged { tag } => {
                debug!(%tag, "scenario hook");
                self.metrics.actions_run += 1;
            }
        }
    }

    fn write_pcap_tx(&mut self, from: usize, t: &Transmission) {
        if self.pcap[from].is_none() || !self.nodes[from].pcap_enabled {
            return;
        }
        let direction = match self.nodes[from].role {
            Role::Central => Direction::CentralToPeripheral,
            Role::Peripheral => Direction::PeripheralToCentral,
        };
        let noise = self.noise_floor_dbm;
        let result = self.pcap[from].as_mut().unwrap().write_frame(
            t.ll_timestamp,
            t.channel,
            t.tx_power_dbm,
            noise,
            t.access_address.0,
            t.phy,
            direction,
            true,
            &t.frame,
        );
        if let Err(err) = result {
            warn!(node = %self.nodes[from].name, %err, "pcap write failed, disabling trace");
            self.nodes[from].pcap_enabled = false;
        }
    }

    fn write_pcap_rx(&mut self, node: usize, conn: usize, rx: &RxFrame) {
        if self.pcap[node].is_none() || !self.nodes[node].pcap_enabled {
            return;
        }
        let Some(link) = self.nodes[node].links.get(conn) else {
            return;
        };
        let crc_ok = decode_frame(link.conn.config().crc_init, &rx.frame)
            .map(|d| d.crc_ok)
            .unwrap_or(false);
        // The frame travels towards this node: direction is the peer's.
        let direction = match self.nodes[node].role {
            Role::Central => Direction::PeripheralToCentral,
            Role::Peripheral => Direction::CentralToPeripheral,
        };
        let noise = self.noise_floor_dbm;
        let result = self.pcap[node].as_mut().unwrap().write_frame(
            rx.ll_timestamp,
            rx.channel,
            rx.rssi_dbm,
            noise,
            rx.access_address.0,
            rx.phy,
            direction,
            crc_ok,
            &rx.frame,
        );
        if let Err(err) = result {
            warn!(node = %self.nodes[node].name, %err, "pcap write failed, disabling trace");
            self.nodes[node].pcap_enabled = false;
        }
    }

    /// Snapshot every endpoint into a result.
    pub fn result(&self) -> SimulationResult {
        let mut connections = Vec::new();
        for node in &self.nodes {
            for link in &node.links {
                connections.push(ConnectionReport {
                    node_name: node.name.clone(),
                    node_id: node.id,
                    peer_name: link.conn.config().peer_name.clone(),
                    peer_id: link.conn.config().peer_id,
                    state: link.conn.state(),
                    event_counter: link.conn.event_counter(),
                    used_channels: link.conn.used_channels(),
                    stats: link.conn.stats().clone(),
                });
            }
        }
        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            connections,
        }
    }

    /// Generate a random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state as f64) / (u64::MAX as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulator_creation() {
        let sim = Simulator::new(42);
        assert_eq!(sim.current_time(), Timestamp::ZERO);
        assert_eq!(sim.metrics().transmissions, 0);
    }

    #[test]
    fn test_random_stream_deterministic() {
        let mut a = Simulator::new(7);
        let mut b = Simulator::new(7);
        for _ in 0..32 {
            assert_eq!(a.random_f64().to_bits(), b.random_f64().to_bits());
        }
    }

    #[test]
    fn test_run_until_advances_to_end_time() {
        let mut sim = Simulator::new(1);
        let result = sim.run_until(Timestamp::from_millis(5));
        assert_eq!(result.end_time, Timestamp::from_millis(5));
        assert!(result.connections.is_empty());
    }
}
