//! Node model and interview: reachability and readiness machines, endpoint
//! capability registries, the durable cache and the resumable interview.

pub mod cache;
pub mod endpoint;
pub mod events;
pub mod interview;
pub mod node;
pub mod providers;
pub mod ready;
pub mod status;
pub mod store;

pub use cache::NodeCache;
pub use endpoint::{CcInfo, Endpoint};
pub use events::{EventBus, NodeEvent};
pub use interview::{
    CcPlan, InterviewError, InterviewOutcome, Interviewer, StructuralError,
};
pub use node::{EndpointSummary, FlagGuard, Node, NodeSummary, SharedNode};
pub use providers::{DeviceProfiles, ProfileList, SecurityKeys, StaticKeys};
pub use ready::{Readiness, ReadinessInput, ReadinessMachine};
pub use status::{StatusInput, StatusMachine};
pub use store::{JsonFileStore, MemoryStore, ValueStore};
