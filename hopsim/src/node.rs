//! Node orchestrator: one radio with its connections, traffic, and classifier.

use serde::{Deserialize, Serialize};

use hoplink::{Classifier, Connection, LinkEvent, Role, Timestamp, Transmission};

use crate::traffic::TrafficSource;

/// Radio parameters from the scenario surface. The path-loss model itself is
/// an external collaborator; the simulator only uses position, range, and
/// the interference fidelity switch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RadioParams {
    /// Transmit power in dBm, within [-20, 20].
    pub tx_power_dbm: i8,
    /// Receiver sensitivity in dBm.
    pub sensitivity_dbm: i8,
    /// Receiver noise figure in dB.
    pub noise_figure_db: f64,
    /// Receiver range in metres. Zero means unlimited.
    pub range_m: f64,
    /// 0 = ignore interference, 1 = model it.
    pub interference_fidelity: u8,
}

impl Default for RadioParams {
    fn default() -> Self {
        Self {
            tx_power_dbm: 0,
            sensitivity_dbm: -95,
            noise_figure_db: 6.0,
            range_m: 0.0,
            interference_fidelity: 1,
        }
    }
}

/// One connection endpoint within a node: the link-layer machine, its
/// traffic source, and (on centrals) the channel classifier.
pub struct LinkEndpoint {
    pub conn: Connection,
    pub traffic: TrafficSource,
    pub classifier: Option<Classifier>,
}

/// A simulated node: name, placement, radio, and its link endpoints.
pub struct SimNode {
    pub name: String,
    pub id: u32,
    pub position: (f64, f64, f64),
    pub role: Role,
    pub radio: RadioParams,
    pub links: Vec<LinkEndpoint>,
    /// Generation counter invalidating superseded NodeRun entries.
    pub run_seq: u64,
    /// Whether the PCAP stream for this node is still writable.
    pub pcap_enabled: bool,
}

impl SimNode {
    pub fn new(
        name: impl Into<String>,
        id: u32,
        position: (f64, f64, f64),
        role: Role,
        radio: RadioParams,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            position,
            role,
            radio,
            links: Vec::new(),
            run_seq: 0,
            pcap_enabled: true,
        }
    }

    /// Whether any connection is still active.
    pub fn has_active_connections(&self) -> bool {
        self.links.iter().any(|l| l.conn.is_active())
    }

    /// Advance the node at `now`: poll traffic into the queues, run each
    /// active connection, feed fresh link events to the classifier, and
    /// return the earliest next wake-up over all endpoints.
    ///
    /// Transmissions and events accumulate inside the connections; the
    /// simulator drains them with [`SimNode::collect`] right after.
    pub fn run(&mut self, now: Timestamp) -> Timestamp {
        let mut next = Timestamp::MAX;
        for link in &mut self.links {
            if !link.conn.is_active() {
                continue;
            }
            while let Some((payload, ts)) = link.traffic.next(now) {
                link.conn.enqueue(payload, ts);
            }
            let wake = link.conn.run(now);
            next = next.min(wake);
        }
        next
    }

    /// Drain transmissions and events from every endpoint, feeding the
    /// classifier along the way. Returns `(conn_index, transmission)` and
    /// `(conn_index, event)` pairs for the simulator to route and record.
    pub fn collect(&mut self, now: Timestamp) -> (Vec<(usize, Transmission)>, Vec<(usize, LinkEvent)>) {
        let mut outgoing = Vec::new();
        let mut events = Vec::new();
        for (idx, link) in self.links.iter_mut().enumerate() {
            for t in link.conn.take_outgoing() {
                outgoing.push((idx, t));
            }
            for ev in link.conn.take_events() {
                if let Some(classifier) = link.classifier.as_mut() {
                    classifier.on_link_event(&ev);
                }
                events.push((idx, ev));
            }
            // An event-driven classifier may have produced a proposal.
            if let Some(classifier) = link.classifier.as_mut() {
                if let Some(map) = classifier.tick(now) {
                    link.conn.update_channel_list(map);
                }
            }
        }
        (outgoing, events)
    }

    /// Periodic classification callback: poll the classifiers even when no
    /// link event arrived.
    pub fn classifier_tick(&mut self, now: Timestamp) {
        for link in &mut self.links {
            if !link.conn.is_active() {
                continue;
            }
            if let Some(classifier) = link.classifier.as_mut() {
                if let Some(map) = classifier.tick(now) {
                    link.conn.update_channel_list(map);
                }
            }
        }
    }

    /// Earliest next wake over active endpoints, without advancing anything.
    pub fn next_wake(&self) -> Timestamp {
        self.links
            .iter()
            .filter(|l| l.conn.is_active())
            .map(|l| l.conn.next_wake())
            .min()
            .unwrap_or(Timestamp::MAX)
    }
}
