use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Network-unique node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Highest node id a classic Z-Wave network can assign.
    pub const MAX_CLASSIC: u16 = 232;

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for NodeId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Reachability of a node as tracked by the status machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Unknown,
    Dead,
    Alive,
    Asleep,
    Awake,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Dead => "dead",
            Self::Alive => "alive",
            Self::Asleep => "asleep",
            Self::Awake => "awake",
        };
        f.write_str(s)
    }
}

/// Discovery progress of a node. The declaration order is the interview order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum InterviewStage {
    #[default]
    None,
    ProtocolInfo,
    NodeInfo,
    CommandClasses,
    OverwriteConfig,
    Complete,
}

impl InterviewStage {
    /// The stage that follows this one, `None` once complete.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::None => Some(Self::ProtocolInfo),
            Self::ProtocolInfo => Some(Self::NodeInfo),
            Self::NodeInfo => Some(Self::CommandClasses),
            Self::CommandClasses => Some(Self::OverwriteConfig),
            Self::OverwriteConfig => Some(Self::Complete),
            Self::Complete => None,
        }
    }
}

impl fmt::Display for InterviewStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Basic / generic / specific device class triple reported in protocol info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceClass {
    pub basic: u8,
    pub generic: u8,
    pub specific: u8,
}

/// `major.minor` firmware version as reported by the Version CC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.trim().split_once('.').unwrap_or((s.trim(), "0"));
        let major = major
            .parse::<u8>()
            .map_err(|e| format!("invalid firmware major version {major:?}: {e}"))?;
        let minor = minor
            .parse::<u8>()
            .map_err(|e| format!("invalid firmware minor version {minor:?}: {e}"))?;
        Ok(Self { major, minor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(InterviewStage::None < InterviewStage::ProtocolInfo);
        assert!(InterviewStage::NodeInfo < InterviewStage::CommandClasses);
        assert!(InterviewStage::OverwriteConfig < InterviewStage::Complete);
    }

    #[test]
    fn next_walks_the_whole_pipeline() {
        let mut stage = InterviewStage::None;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(stage, InterviewStage::Complete);
    }

    #[test]
    fn firmware_version_parses() {
        assert_eq!("1.20".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(1, 20));
        assert_eq!("3".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(3, 0));
        assert!("x.1".parse::<FirmwareVersion>().is_err());
        assert!(FirmwareVersion::new(1, 9) < FirmwareVersion::new(1, 10));
    }
}
