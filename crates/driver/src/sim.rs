//! Scenario-driven simulated network.
//!
//! A scenario is a TOML file describing the nodes behind the controller:
//! their protocol info, advertised CCs, security grants, identity and
//! endpoints, plus injected transmission failures. [`SimulatedNetwork`]
//! answers transactions from that description so interviews can run end to
//! end without hardware.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use zw_domain::{CommandClass, DeviceClass, FirmwareVersion, NodeId, SecurityClass};
use zw_protocol::{
    CcReport, CcVersion, EndpointInfo, ManufacturerInfo, Message, NodeInfoFrame, ProtocolInfo,
    Response, TransmissionError,
};
use zw_scheduler::{Link, Target, Transaction};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    /// Artificial delay per transmission.
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub nodes: Vec<SimNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimNode {
    pub id: NodeId,
    #[serde(default = "d_true")]
    pub listening: bool,
    #[serde(default)]
    pub frequent_listening: bool,
    #[serde(default = "d_true")]
    pub routing: bool,
    #[serde(default = "d_device_class")]
    pub device_class: DeviceClass,
    #[serde(default = "d_protocol_version")]
    pub protocol_version: u8,
    #[serde(default)]
    pub supported: Vec<CommandClass>,
    #[serde(default)]
    pub controlled: Vec<CommandClass>,
    #[serde(default)]
    pub manufacturer: Option<ManufacturerInfo>,
    #[serde(default)]
    pub firmware: Option<FirmwareVersion>,
    /// Security classes the node confirms during bootstrap.
    #[serde(default)]
    pub granted: Vec<SecurityClass>,
    #[serde(default)]
    pub secure_ccs: Vec<CommandClass>,
    #[serde(default)]
    pub cc_versions: Vec<CcVersion>,
    #[serde(default)]
    pub endpoints: Vec<EndpointInfo>,
    /// CCs the link reports as not implemented.
    #[serde(default)]
    pub unimplemented: Vec<CommandClass>,
    /// Starts asleep; answers nothing until woken.
    #[serde(default)]
    pub asleep: bool,
    #[serde(default)]
    pub failures: Vec<FailureRule>,
}

/// Fail the next `times` matching transactions with `error`.
#[derive(Debug, Clone, Deserialize)]
pub struct FailureRule {
    pub probe: Probe,
    /// Restricts a `cc` probe to one CC.
    #[serde(default)]
    pub cc: Option<CommandClass>,
    pub error: TransmissionError,
    #[serde(default = "d_times")]
    pub times: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    ProtocolInfo,
    NodeInfo,
    Ping,
    Cc,
}

fn d_true() -> bool {
    true
}
fn d_device_class() -> DeviceClass {
    DeviceClass {
        basic: 0x04,
        generic: 0x10,
        specific: 0x01,
    }
}
fn d_protocol_version() -> u8 {
    3
}
fn d_times() -> u32 {
    1
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing scenario: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("node {0} appears more than once")]
    DuplicateNode(NodeId),
}

impl Scenario {
    pub fn from_toml(raw: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = toml::from_str(raw)?;
        let mut seen = HashSet::new();
        for node in &scenario.nodes {
            if !seen.insert(node.id) {
                return Err(ScenarioError::DuplicateNode(node.id));
            }
        }
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Link
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SimState {
    asleep: HashSet<NodeId>,
    failures: HashMap<NodeId, Vec<FailureRule>>,
    transmissions: usize,
}

pub struct SimulatedNetwork {
    nodes: HashMap<NodeId, SimNode>,
    latency: Duration,
    state: Mutex<SimState>,
}

impl SimulatedNetwork {
    pub fn new(scenario: Scenario) -> Self {
        let asleep = scenario
            .nodes
            .iter()
            .filter(|n| n.asleep)
            .map(|n| n.id)
            .collect();
        let failures = scenario
            .nodes
            .iter()
            .filter(|n| !n.failures.is_empty())
            .map(|n| (n.id, n.failures.clone()))
            .collect();
        Self {
            nodes: scenario.nodes.into_iter().map(|n| (n.id, n)).collect(),
            latency: Duration::from_millis(scenario.latency_ms),
            state: Mutex::new(SimState {
                asleep,
                failures,
                transmissions: 0,
            }),
        }
    }

    /// Node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_asleep(&self, id: NodeId) -> bool {
        self.state.lock().asleep.contains(&id)
    }

    pub fn wake(&self, id: NodeId) {
        self.state.lock().asleep.remove(&id);
    }

    pub fn sleep(&self, id: NodeId) {
        if self.nodes.contains_key(&id) {
            self.state.lock().asleep.insert(id);
        }
    }

    /// Transactions answered so far, failures included.
    pub fn transmissions(&self) -> usize {
        self.state.lock().transmissions
    }

    /// Consume one matching failure rule, if any.
    fn injected_failure(
        &self,
        id: NodeId,
        probe: Probe,
        cc: Option<CommandClass>,
    ) -> Option<TransmissionError> {
        let mut state = self.state.lock();
        let rules = state.failures.get_mut(&id)?;
        let rule = rules
            .iter_mut()
            .find(|r| r.probe == probe && r.times > 0 && (r.cc.is_none() || r.cc == cc))?;
        rule.times -= 1;
        Some(rule.error)
    }

    fn protocol_info(&self, id: NodeId) -> Result<Response, TransmissionError> {
        let node = self.nodes.get(&id).ok_or(TransmissionError::NoAck)?;
        if let Some(e) = self.injected_failure(id, Probe::ProtocolInfo, None) {
            return Err(e);
        }
        Ok(Response::ProtocolInfo(ProtocolInfo {
            device_class: node.device_class,
            is_listening: node.listening,
            is_frequent_listening: node.frequent_listening,
            is_routing: node.routing,
            protocol_version: node.protocol_version,
        }))
    }

    fn node_response(&self, id: NodeId, message: &Message) -> Result<Response, TransmissionError> {
        let node = self.nodes.get(&id).ok_or(TransmissionError::NoAck)?;
        let (probe, cc) = match message {
            Message::RequestNodeInfo => (Probe::NodeInfo, None),
            Message::NoOperation => (Probe::Ping, None),
            Message::InterviewCc { cc, .. } => (Probe::Cc, Some(*cc)),
            Message::GetProtocolInfo { .. } => {
                tracing::warn!(node_id = %id, "protocol info requested from a node");
                return Err(TransmissionError::Dropped);
            }
        };
        if let Some(e) = self.injected_failure(id, probe, cc) {
            return Err(e);
        }
        if self.is_asleep(id) {
            return Err(TransmissionError::Timeout);
        }

        match message {
            Message::RequestNodeInfo => Ok(Response::NodeInfo(NodeInfoFrame {
                supported: node.supported.clone(),
                controlled: node.controlled.clone(),
            })),
            Message::InterviewCc { endpoint, cc } => Ok(cc_response(node, *endpoint, *cc)),
            _ => Ok(Response::Ack),
        }
    }
}

fn cc_response(node: &SimNode, endpoint: u8, cc: CommandClass) -> Response {
    if node.unimplemented.contains(&cc) {
        return Response::CcNotImplemented { cc };
    }
    let report = match cc {
        CommandClass::SECURITY_2 => CcReport::Security {
            granted: node.granted.iter().copied().filter(|c| c.is_s2()).collect(),
            secure_ccs: node.secure_ccs.clone(),
        },
        CommandClass::SECURITY => CcReport::Security {
            granted: node
                .granted
                .iter()
                .copied()
                .filter(|c| *c == SecurityClass::S0Legacy)
                .collect(),
            secure_ccs: node.secure_ccs.clone(),
        },
        CommandClass::MANUFACTURER_SPECIFIC => match node.manufacturer {
            Some(info) => CcReport::Manufacturer(info),
            None => CcReport::Done,
        },
        CommandClass::VERSION => CcReport::Version {
            firmware: if endpoint == 0 { node.firmware } else { None },
            cc_versions: node.cc_versions.clone(),
        },
        CommandClass::MULTI_CHANNEL if endpoint == 0 => CcReport::Endpoints {
            endpoints: node.endpoints.clone(),
        },
        _ => CcReport::Done,
    };
    Response::CcReport(report)
}

#[async_trait]
impl Link for SimulatedNetwork {
    async fn transmit(&self, tx: &Transaction) -> Result<Response, TransmissionError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.state.lock().transmissions += 1;

        let result = match (tx.target, &tx.message) {
            (Target::Controller, Message::GetProtocolInfo { node_id }) => {
                self.protocol_info(*node_id)
            }
            (Target::Node(id), message) => self.node_response(id, message),
            (Target::Controller, message) => {
                tracing::warn!(msg = %message, "controller cannot answer message");
                Err(TransmissionError::Dropped)
            }
        };
        tracing::trace!(target_node = %tx.target, msg = %tx.message, ok = result.is_ok(), "simulated transmission");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zw_scheduler::MessagePriority;

    const SCENARIO: &str = r#"
        [[nodes]]
        id = 2
        supported = [0x25, 0x86, 0x9f]
        granted = ["S2_Authenticated"]
        firmware = { major = 1, minor = 2 }
        manufacturer = { manufacturer_id = 0x010f, product_type = 0x0102, product_id = 0x1000 }

        [[nodes.failures]]
        probe = "node_info"
        error = "no_ack"

        [[nodes]]
        id = 3
        listening = false
        asleep = true
    "#;

    fn send(target: Target, message: Message) -> Transaction {
        Transaction::new(target, message, MessagePriority::NodeQuery)
    }

    #[test]
    fn scenario_defaults() {
        let scenario = Scenario::from_toml(SCENARIO).unwrap();
        assert_eq!(scenario.nodes.len(), 2);
        let sleeper = &scenario.nodes[1];
        assert!(!sleeper.listening);
        assert!(sleeper.routing);
        assert_eq!(sleeper.protocol_version, 3);
        assert_eq!(scenario.nodes[0].failures[0].times, 1);
    }

    #[test]
    fn duplicate_nodes_are_rejected() {
        let raw = "[[nodes]]\nid = 4\n[[nodes]]\nid = 4\n";
        assert!(matches!(
            Scenario::from_toml(raw),
            Err(ScenarioError::DuplicateNode(NodeId(4)))
        ));
    }

    #[tokio::test]
    async fn failures_are_consumed() {
        let net = SimulatedNetwork::new(Scenario::from_toml(SCENARIO).unwrap());
        let tx = send(Target::Node(NodeId(2)), Message::RequestNodeInfo);
        assert_eq!(net.transmit(&tx).await, Err(TransmissionError::NoAck));
        match net.transmit(&tx).await.unwrap() {
            Response::NodeInfo(nif) => assert!(nif.supported.contains(&CommandClass::VERSION)),
            other => panic!("unexpected response {other:?}"),
        }
        assert_eq!(net.transmissions(), 2);
    }

    #[tokio::test]
    async fn asleep_nodes_time_out_until_woken() {
        let net = SimulatedNetwork::new(Scenario::from_toml(SCENARIO).unwrap());
        let tx = send(Target::Node(NodeId(3)), Message::NoOperation);
        assert_eq!(net.transmit(&tx).await, Err(TransmissionError::Timeout));
        net.wake(NodeId(3));
        assert_eq!(net.transmit(&tx).await, Ok(Response::Ack));

        // The controller answers for sleeping nodes too.
        net.sleep(NodeId(3));
        let info = send(
            Target::Controller,
            Message::GetProtocolInfo { node_id: NodeId(3) },
        );
        assert!(matches!(
            net.transmit(&info).await,
            Ok(Response::ProtocolInfo(p)) if !p.is_listening
        ));
    }

    #[tokio::test]
    async fn security_reports_are_split_by_family() {
        let net = SimulatedNetwork::new(Scenario::from_toml(SCENARIO).unwrap());
        let s2 = send(
            Target::Node(NodeId(2)),
            Message::InterviewCc {
                endpoint: 0,
                cc: CommandClass::SECURITY_2,
            },
        );
        let s0 = send(
            Target::Node(NodeId(2)),
            Message::InterviewCc {
                endpoint: 0,
                cc: CommandClass::SECURITY,
            },
        );
        match net.transmit(&s2).await.unwrap() {
            Response::CcReport(CcReport::Security { granted, .. }) => {
                assert_eq!(granted, vec![SecurityClass::S2Authenticated])
            }
            other => panic!("unexpected response {other:?}"),
        }
        match net.transmit(&s0).await.unwrap() {
            Response::CcReport(CcReport::Security { granted, .. }) => assert!(granted.is_empty()),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_nodes_do_not_acknowledge() {
        let net = SimulatedNetwork::new(Scenario::default());
        let tx = send(Target::Node(NodeId(40)), Message::NoOperation);
        assert_eq!(net.transmit(&tx).await, Err(TransmissionError::NoAck));
    }
}
