//! Link protocol: the messages the interview core sends towards the serial
//! link, the responses it expects back, and the transmission error taxonomy.
//!
//! Byte framing, checksums and CC payload encoding live below this boundary.
//! A link implementation translates these values to and from the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use zw_domain::{CommandClass, DeviceClass, FirmwareVersion, NodeId, SecurityClass};

/// Outbound message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Read the protocol info the controller holds for a node.
    GetProtocolInfo { node_id: NodeId },

    /// Ask the node for its node information frame.
    RequestNodeInfo,

    /// Empty frame used to ping a node.
    NoOperation,

    /// Run the interview procedure of one CC on one endpoint.
    InterviewCc { endpoint: u8, cc: CommandClass },
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetProtocolInfo { node_id } => write!(f, "GetProtocolInfo({node_id})"),
            Self::RequestNodeInfo => f.write_str("RequestNodeInfo"),
            Self::NoOperation => f.write_str("NoOperation"),
            Self::InterviewCc { endpoint, cc } => {
                write!(f, "InterviewCc({cc} on endpoint {endpoint})")
            }
        }
    }
}

/// Inbound response to a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The node acknowledged; nothing else to report.
    Ack,
    ProtocolInfo(ProtocolInfo),
    NodeInfo(NodeInfoFrame),
    CcReport(CcReport),
    /// The link has no procedure for this CC.
    CcNotImplemented { cc: CommandClass },
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::ProtocolInfo(_) => "protocol_info",
            Self::NodeInfo(_) => "node_info",
            Self::CcReport(_) => "cc_report",
            Self::CcNotImplemented { .. } => "cc_not_implemented",
        }
    }
}

/// What the controller knows about a node without talking to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub device_class: DeviceClass,
    pub is_listening: bool,
    pub is_frequent_listening: bool,
    pub is_routing: bool,
    pub protocol_version: u8,
}

/// Node information frame: the CCs the root endpoint advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfoFrame {
    #[serde(default)]
    pub supported: Vec<CommandClass>,
    #[serde(default)]
    pub controlled: Vec<CommandClass>,
}

/// Result of a single CC interview, reduced to what the core consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum CcReport {
    /// Interview finished; the CC's values are handled elsewhere.
    Done,

    /// Security or Security 2. `granted` lists the classes the node confirmed;
    /// every other class of the same family is not granted. `secure_ccs` are
    /// the CCs the node supports only inside encapsulation.
    Security {
        granted: Vec<SecurityClass>,
        #[serde(default)]
        secure_ccs: Vec<CommandClass>,
    },

    Manufacturer(ManufacturerInfo),

    /// Version CC. A CC version of 0 means the CC is not actually supported.
    Version {
        #[serde(default)]
        firmware: Option<FirmwareVersion>,
        #[serde(default)]
        cc_versions: Vec<CcVersion>,
    },

    /// Multi Channel endpoint discovery.
    Endpoints { endpoints: Vec<EndpointInfo> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManufacturerInfo {
    pub manufacturer_id: u16,
    pub product_type: u16,
    pub product_id: u16,
}

impl fmt::Display for ManufacturerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#06x}:{:#06x}:{:#06x}",
            self.manufacturer_id, self.product_type, self.product_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CcVersion {
    pub cc: CommandClass,
    pub version: u8,
}

/// One endpoint found through Multi Channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub index: u8,
    #[serde(default)]
    pub device_class: Option<DeviceClass>,
    #[serde(default)]
    pub supported: Vec<CommandClass>,
}

/// Final outcome of a transmission that did not produce a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionError {
    #[error("no response before the timeout")]
    Timeout,
    #[error("node did not acknowledge")]
    NoAck,
    #[error("channel collision")]
    Collision,
    #[error("message dropped")]
    Dropped,
}

impl TransmissionError {
    /// Whether the failure says something about the target's reachability.
    /// Collisions and drops are channel problems, not node problems.
    pub fn implicates_target(self) -> bool {
        matches!(self, Self::Timeout | Self::NoAck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_with_type_tag() {
        let msg = Message::InterviewCc {
            endpoint: 1,
            cc: CommandClass::VERSION,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "interview_cc");
        assert_eq!(json["endpoint"], 1);
        assert_eq!(json["cc"], 0x86);
    }

    #[test]
    fn nested_report_deserializes() {
        let raw = r#"{
            "type": "cc_report",
            "report": "version",
            "firmware": { "major": 1, "minor": 4 },
            "cc_versions": [ { "cc": 37, "version": 0 } ]
        }"#;
        let resp: Response = serde_json::from_str(raw).unwrap();
        match resp {
            Response::CcReport(CcReport::Version {
                firmware,
                cc_versions,
            }) => {
                assert_eq!(firmware, Some(FirmwareVersion::new(1, 4)));
                assert_eq!(cc_versions[0].cc, CommandClass::SWITCH_BINARY);
                assert_eq!(cc_versions[0].version, 0);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn only_timeout_and_no_ack_implicate_the_target() {
        assert!(TransmissionError::Timeout.implicates_target());
        assert!(TransmissionError::NoAck.implicates_target());
        assert!(!TransmissionError::Collision.implicates_target());
        assert!(!TransmissionError::Dropped.implicates_target());
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(Message::NoOperation.to_string(), "NoOperation");
        assert_eq!(
            TransmissionError::NoAck.to_string(),
            "node did not acknowledge"
        );
        let mfr = ManufacturerInfo {
            manufacturer_id: 0x010f,
            product_type: 0x0102,
            product_id: 0x1000,
        };
        assert_eq!(mfr.to_string(), "0x010f:0x0102:0x1000");
    }
}
