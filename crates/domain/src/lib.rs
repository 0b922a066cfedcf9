//! Shared vocabulary for the zwave-host crates: identifiers, command class
//! catalog, security classes, configuration, errors and trace events.

pub mod command_class;
pub mod config;
pub mod error;
pub mod node;
pub mod security;
pub mod trace;

pub use command_class::{CcCatalog, CcDescriptor, CommandClass};
pub use error::{Error, Result};
pub use node::{DeviceClass, FirmwareVersion, InterviewStage, NodeId, NodeStatus};
pub use security::{HighestGrant, SecurityClass, SecurityGrants};
pub use trace::TraceEvent;
