//! Scenario configuration and builder.
//!
//! The human-editable surface: a serde-readable description of nodes,
//! connections, classifier choice, interference, and scheduled actions.
//! Building validates everything up front; none of these errors are
//! recoverable at runtime, so a bad scenario never starts.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use hoplink::{
    AccessAddress, ChannelMap, Classifier, ConfigError, Connection, ConnectionConfig, Duration,
    EafhClassifier, EafhParams, PerClassifier, PerParams, PhyMode, Role, Timestamp,
};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::node::{LinkEndpoint, RadioParams, SimNode};
use crate::phy::InterferenceModel;
use crate::sim::Simulator;
use crate::traffic::{TrafficSource, TrafficSpec};

/// One node of the scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub id: u32,
    /// Cartesian position in metres.
    pub position: [f64; 3],
    pub role: Role,
    #[serde(default)]
    pub radio: RadioParams,
}

/// One connection between a central and a peripheral node, by name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub central: String,
    pub peripheral: String,
    pub access_address: AccessAddress,
    #[serde(default = "default_hop")]
    pub hop_increment: u8,
    #[serde(default = "default_crc_init")]
    pub crc_init: u32,
    #[serde(default = "default_phy")]
    pub phy: PhyMode,
    #[serde(default = "default_interval_us")]
    pub interval_us: u64,
    #[serde(default = "default_interval_us")]
    pub active_period_us: u64,
    #[serde(default)]
    pub offset_us: u64,
    #[serde(default = "default_supervision_us")]
    pub supervision_timeout_us: u64,
    #[serde(default = "default_instant_offset")]
    pub instant_offset: u16,
    /// Initial used channels; omitted means all 37.
    #[serde(default)]
    pub initial_channels: Option<Vec<u8>>,
    /// Symmetric traffic applied to both endpoints.
    #[serde(default)]
    pub traffic: TrafficSpec,
    /// Classifier run by the central endpoint.
    #[serde(default)]
    pub classifier: ClassifierChoice,
}

fn default_hop() -> u8 {
    7
}
fn default_crc_init() -> u32 {
    0x555555
}
fn default_phy() -> PhyMode {
    PhyMode::Le1M
}
fn default_interval_us() -> u64 {
    10_000
}
fn default_supervision_us() -> u64 {
    1_000_000
}
fn default_instant_offset() -> u16 {
    6
}

/// Which classifier the central runs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum ClassifierChoice {
    /// No classification; the initial map stays.
    #[default]
    None,
    /// Baseline packet-error-rate classifier.
    Per(PerParams),
    /// Enhanced sliding-window classifier.
    Eafh(EafhParams),
}

/// Trace export settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PcapSpec {
    pub dir: String,
    #[serde(default = "default_pcap_format")]
    pub format: String,
}

fn default_pcap_format() -> String {
    "pcap".to_string()
}

/// A scheduled scenario hook.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionSpec {
    pub at_secs: f64,
    #[serde(default)]
    pub every_secs: Option<f64>,
    pub tag: String,
}

/// The whole scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub seed: u64,
    pub duration_secs: f64,
    pub nodes: Vec<NodeSpec>,
    pub connections: Vec<ConnectionSpec>,
    #[serde(default)]
    pub interference: InterferenceModel,
    #[serde(default)]
    pub loss_rate: f64,
    #[serde(default)]
    pub pcap: Option<PcapSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

impl ScenarioConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros((self.duration_secs * 1e6) as u64)
    }
}

/// Scenario build errors.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("connection references unknown node {name:?}")]
    UnknownNode { name: String },

    #[error("node {name:?} has role {actual:?}, connection needs {expected:?}")]
    RoleMismatch {
        name: String,
        expected: Role,
        actual: Role,
    },

    #[error("access address {access_address} used twice on central {central:?}")]
    AccessAddressCollision {
        central: String,
        access_address: AccessAddress,
    },

    #[error("central {central:?} mixes connection intervals {a_us} us and {b_us} us")]
    IntervalMismatch { central: String, a_us: u64, b_us: u64 },

    #[error("transmit power {value} dBm outside [-20, 20] on node {name:?}")]
    TxPowerOutOfRange { name: String, value: i8 },

    #[error("preferred minimum good-channel count {value} outside [2, 37]")]
    PreferredMinimumOutOfRange { value: usize },

    #[error("unknown trace format {format:?}, expected \"pcap\"")]
    PcapFormatUnknown { format: String },

    #[error(transparent)]
    Connection(#[from] ConfigError),

    #[error("failed to open trace files: {0}")]
    PcapIo(#[from] std::io::Error),
}

/// Build a simulator from a scenario description.
pub fn build_simulator(config: &ScenarioConfig) -> Result<Simulator, ScenarioError> {
    let by_name: HashMap<&str, usize> = config
        .nodes
        .iter()
        .enumerate()
        .map(|(idx, n)| (n.name.as_str(), idx))
        .collect();
    let find = |name: &str| -> Result<usize, ScenarioError> {
        by_name
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioError::UnknownNode {
                name: name.to_string(),
            })
    };

    for node in &config.nodes {
        if !(-20..=20).contains(&node.radio.tx_power_dbm) {
            return Err(ScenarioError::TxPowerOutOfRange {
                name: node.name.clone(),
                value: node.radio.tx_power_dbm,
            });
        }
    }

    // Per-central sanity: distinct access addresses, one shared interval.
    for (i, a) in config.connections.iter().enumerate() {
        for b in config.connections.iter().skip(i + 1) {
            if a.central != b.central {
                continue;
            }
            if a.access_address == b.access_address {
                return Err(ScenarioError::AccessAddressCollision {
                    central: a.central.clone(),
                    access_address: a.access_address,
                });
            }
            if a.interval_us != b.interval_us {
                return Err(ScenarioError::IntervalMismatch {
                    central: a.central.clone(),
                    a_us: a.interval_us,
                    b_us: b.interval_us,
                });
            }
        }
    }

    let mut nodes: Vec<SimNode> = config
        .nodes
        .iter()
        .map(|spec| {
            SimNode::new(
                spec.name.clone(),
                spec.id,
                (spec.position[0], spec.position[1], spec.position[2]),
                spec.role,
                spec.radio.clone(),
            )
        })
        .collect();

    for spec in &config.connections {
        let central_idx = find(&spec.central)?;
        let peripheral_idx = find(&spec.peripheral)?;
        for (idx, expected) in [(central_idx, Role::Central), (peripheral_idx, Role::Peripheral)] {
            let node = &config.nodes[idx];
            if node.role != expected {
                return Err(ScenarioError::RoleMismatch {
                    name: node.name.clone(),
                    expected,
                    actual: node.role,
                });
            }
        }

        if let ClassifierChoice::Per(params) = &spec.classifier {
            if !(2..=37).contains(&params.preferred_minimum_good) {
                return Err(ScenarioError::PreferredMinimumOutOfRange {
                    value: params.preferred_minimum_good,
                });
            }
        }

        let peripheral_count = config
            .connections
            .iter()
            .filter(|c| c.central == spec.central)
            .count();

        let initial_channels = match &spec.initial_channels {
            Some(list) => ChannelMap::from_channels(list.iter().copied()),
            None => ChannelMap::ALL,
        };

        let shared = |peer_name: &str, peer_id: u32| ConnectionConfig {
            access_address: spec.access_address,
            hop_increment: spec.hop_increment,
            crc_init: spec.crc_init,
            phy: spec.phy,
            interval: Duration::from_micros(spec.interval_us),
            active_period: Duration::from_micros(spec.active_period_us),
            offset: Duration::from_micros(spec.offset_us),
            supervision_timeout: Duration::from_micros(spec.supervision_timeout_us),
            instant_offset: spec.instant_offset,
            initial_channels,
            peer_name: peer_name.to_string(),
            peer_id,
            queue_capacity: hoplink::types::DEFAULT_QUEUE_CAPACITY,
        };

        let central_cfg = shared(&config.nodes[peripheral_idx].name, config.nodes[peripheral_idx].id);
        central_cfg.validate(peripheral_count)?;
        let peripheral_cfg = shared(&config.nodes[central_idx].name, config.nodes[central_idx].id);

        let classifier = match &spec.classifier {
            ClassifierChoice::None => None,
            ClassifierChoice::Per(params) => Some(Classifier::Per(PerClassifier::new(
                params.clone(),
                config.nodes[peripheral_idx].id,
                initial_channels,
            ))),
            ClassifierChoice::Eafh(params) => Some(Classifier::Eafh(EafhClassifier::new(
                params.clone(),
                initial_channels,
            ))),
        };

        let central_power = nodes[central_idx].radio.tx_power_dbm;
        nodes[central_idx].links.push(LinkEndpoint {
            conn: Connection::new(central_cfg, Role::Central, central_power),
            traffic: TrafficSource::new(&spec.traffic),
            classifier,
        });
        let peripheral_power = nodes[peripheral_idx].radio.tx_power_dbm;
        nodes[peripheral_idx].links.push(LinkEndpoint {
            conn: Connection::new(peripheral_cfg, Role::Peripheral, peripheral_power),
            traffic: TrafficSource::new(&spec.traffic),
            classifier: None,
        });
    }

    let mut sim = Simulator::new(config.seed)
        .with_interference(config.interference.clone())
        .with_loss_rate(config.loss_rate);
    for node in nodes {
        sim.add_node(node);
    }

    if let Some(pcap) = &config.pcap {
        if pcap.format != "pcap" {
            return Err(ScenarioError::PcapFormatUnknown {
                format: pcap.format.clone(),
            });
        }
        let unix_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        sim.enable_pcap(std::path::Path::new(&pcap.dir), unix_secs)?;
    }

    for action in &config.actions {
        sim.schedule_action(
            Timestamp::from_micros((action.at_secs * 1e6) as u64),
            ScenarioAction::Tagged {
                tag: action.tag.clone(),
            },
            action
                .every_secs
                .map(|s| Duration::from_micros((s * 1e6) as u64)),
        );
    }

    Ok(sim)
}

/// Build and run a scenario to completion.
pub fn run_scenario(config: &ScenarioConfig) -> Result<SimulationResult, ScenarioError> {
    let mut sim = build_simulator(config)?;
    Ok(sim.run_until(Timestamp::ZERO + config.duration()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laptop_headset() -> ScenarioConfig {
        ScenarioConfig {
            seed: 42,
            duration_secs: 1.0,
            nodes: vec![
                NodeSpec {
                    name: "Laptop".to_string(),
                    id: 1,
                    position: [15.0, 6.0, 3.0],
                    role: Role::Central,
                    radio: RadioParams::default(),
                },
                NodeSpec {
                    name: "Headset".to_string(),
                    id: 2,
                    position: [15.0, 7.0, 3.5],
                    role: Role::Peripheral,
                    radio: RadioParams::default(),
                },
            ],
            connections: vec![ConnectionSpec {
                central: "Laptop".to_string(),
                peripheral: "Headset".to_string(),
                access_address: AccessAddress(0x487647F2),
                hop_increment: 7,
                crc_init: 0x555555,
                phy: PhyMode::Le1M,
                interval_us: 10_000,
                active_period_us: 10_000,
                offset_us: 0,
                supervision_timeout_us: 1_000_000,
                instant_offset: 6,
                initial_channels: None,
                traffic: TrafficSpec {
                    rate_kbps: 150.0,
                    packet_len: 50,
                },
                classifier: ClassifierChoice::None,
            }],
            interference: InterferenceModel::Clean,
            loss_rate: 0.0,
            pcap: None,
            actions: Vec::new(),
        }
    }

    #[test]
    fn test_build_valid_scenario() {
        assert!(build_simulator(&laptop_headset()).is_ok());
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut cfg = laptop_headset();
        cfg.connections[0].peripheral = "Ghost".to_string();
        assert!(matches!(
            build_simulator(&cfg),
            Err(ScenarioError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_role_mismatch_rejected() {
        let mut cfg = laptop_headset();
        cfg.nodes[1].role = Role::Central;
        assert!(matches!(
            build_simulator(&cfg),
            Err(ScenarioError::RoleMismatch { .. })
        ));
    }

    #[test]
    fn test_access_address_collision_rejected() {
        let mut cfg = laptop_headset();
        cfg.nodes.push(NodeSpec {
            name: "Mouse".to_string(),
            id: 3,
            position: [14.0, 6.0, 3.0],
            role: Role::Peripheral,
            radio: RadioParams::default(),
        });
        let mut second = cfg.connections[0].clone();
        second.peripheral = "Mouse".to_string();
        cfg.connections.push(second);
        assert!(matches!(
            build_simulator(&cfg),
            Err(ScenarioError::AccessAddressCollision { .. })
        ));
    }

    #[test]
    fn test_interval_mismatch_rejected() {
        let mut cfg = laptop_headset();
        cfg.nodes.push(NodeSpec {
            name: "Mouse".to_string(),
            id: 3,
            position: [14.0, 6.0, 3.0],
            role: Role::Peripheral,
            radio: RadioParams::default(),
        });
        let mut second = cfg.connections[0].clone();
        second.peripheral = "Mouse".to_string();
        second.access_address = AccessAddress(0x51A5F00D);
        second.interval_us = 20_000;
        cfg.connections.push(second);
        assert!(matches!(
            build_simulator(&cfg),
            Err(ScenarioError::IntervalMismatch { .. })
        ));
    }

    #[test]
    fn test_interval_floor_boundary() {
        // Exactly the floor is accepted, one microsecond less is not.
        let mut cfg = laptop_headset();
        let floor = ConnectionConfig::min_interval(PhyMode::Le1M, 1).as_micros();
        cfg.connections[0].interval_us = floor;
        cfg.connections[0].active_period_us = floor;
        assert!(build_simulator(&cfg).is_ok());

        cfg.connections[0].interval_us = floor - 1;
        cfg.connections[0].active_period_us = floor - 1;
        assert!(matches!(
            build_simulator(&cfg),
            Err(ScenarioError::Connection(ConfigError::IntervalTooShort { .. }))
        ));
    }

    #[test]
    fn test_preferred_minimum_bounds() {
        let mut cfg = laptop_headset();
        let mut params = PerParams::default();
        params.preferred_minimum_good = 1;
        cfg.connections[0].classifier = ClassifierChoice::Per(params);
        assert!(matches!(
            build_simulator(&cfg),
            Err(ScenarioError::PreferredMinimumOutOfRange { value: 1 })
        ));
    }

    #[test]
    fn test_pcap_format_rejected() {
        let mut cfg = laptop_headset();
        cfg.pcap = Some(PcapSpec {
            dir: "/tmp".to_string(),
            format: "snoop".to_string(),
        });
        assert!(matches!(
            build_simulator(&cfg),
            Err(ScenarioError::PcapFormatUnknown { .. })
        ));
    }

    #[test]
    fn test_tx_power_bounds() {
        let mut cfg = laptop_headset();
        cfg.nodes[0].radio.tx_power_dbm = 21;
        assert!(matches!(
            build_simulator(&cfg),
            Err(ScenarioError::TxPowerOutOfRange { .. })
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let cfg = laptop_headset();
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let parsed = ScenarioConfig::from_json(&json).unwrap();
        assert_eq!(parsed.seed, cfg.seed);
        assert_eq!(parsed.nodes.len(), 2);
        assert_eq!(parsed.connections[0].access_address, cfg.connections[0].access_address);
    }
}
