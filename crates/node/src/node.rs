//! The node model: identity, reachability, readiness, interview progress and
//! the endpoints that carry capabilities.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use zw_domain::{
    DeviceClass, FirmwareVersion, HighestGrant, InterviewStage, NodeId, NodeStatus,
    SecurityGrants,
};
use zw_protocol::{ManufacturerInfo, ProtocolInfo, TransmissionError};

use crate::endpoint::{CcInfo, Endpoint};
use crate::events::NodeEvent;
use crate::ready::{Readiness, ReadinessInput, ReadinessMachine};
use crate::status::{StatusInput, StatusMachine};

/// A node behind a short-held lock. Never hold the guard across an await.
pub type SharedNode = Arc<Mutex<Node>>;

/// Runs `clear` on the node when dropped, so a flag set before an `.await`
/// is reset even if the future never resumes.
pub struct FlagGuard<'a> {
    node: &'a SharedNode,
    clear: fn(&mut Node),
}

impl<'a> FlagGuard<'a> {
    pub fn new(node: &'a SharedNode, clear: fn(&mut Node)) -> Self {
        Self { node, clear }
    }

    /// Claim the node's re-interview flag. `None` if one is already pending.
    pub fn refresh(node: &'a SharedNode) -> Option<Self> {
        if !node.lock().try_begin_refresh() {
            return None;
        }
        Some(Self::new(node, Node::end_refresh))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        (self.clear)(&mut self.node.lock());
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    status: StatusMachine,
    readiness: ReadinessMachine,
    restored_from_cache: bool,
    stage: InterviewStage,
    device_class: Option<DeviceClass>,
    security: SecurityGrants,
    is_listening: Option<bool>,
    is_frequent_listening: Option<bool>,
    is_routing: Option<bool>,
    protocol_version: Option<u8>,
    manufacturer: Option<ManufacturerInfo>,
    firmware: Option<FirmwareVersion>,
    refresh_pending: bool,
    interviewing: bool,
    missing_keys_warned: bool,
    endpoints: BTreeMap<u8, Endpoint>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            status: StatusMachine::new(),
            readiness: ReadinessMachine::new(),
            restored_from_cache: false,
            stage: InterviewStage::None,
            device_class: None,
            security: SecurityGrants::new(),
            is_listening: None,
            is_frequent_listening: None,
            is_routing: None,
            protocol_version: None,
            manufacturer: None,
            firmware: None,
            refresh_pending: false,
            interviewing: false,
            missing_keys_warned: false,
            endpoints: BTreeMap::from([(0, Endpoint::new(0))]),
        }
    }

    pub fn shared(self) -> SharedNode {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    // ── Reachability & readiness ──────────────────────────────────────

    pub fn status(&self) -> NodeStatus {
        self.status.state()
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.state()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// Unknown listening flags count as "cannot sleep".
    pub fn can_sleep(&self) -> bool {
        self.is_listening == Some(false) && self.is_frequent_listening != Some(true)
    }

    /// Apply a reachability input. Returns the events it produced.
    pub fn mark(&mut self, input: StatusInput) -> Vec<NodeEvent> {
        let from = self.status.state();
        let Some(to) = self.status.apply(input, self.can_sleep()) else {
            return Vec::new();
        };
        let mut events = vec![NodeEvent::StatusChanged {
            node_id: self.id,
            from,
            to,
        }];
        let forwarded = if to == NodeStatus::Dead {
            ReadinessInput::MaybeDead
        } else {
            ReadinessInput::NotDead
        };
        self.feed_readiness(forwarded, &mut events);
        events
    }

    /// Feed the final outcome of a transmission to this node.
    pub fn apply_outcome(&mut self, outcome: Result<(), TransmissionError>) -> Vec<NodeEvent> {
        match StatusInput::for_outcome(outcome, self.can_sleep()) {
            Some(input) => self.mark(input),
            None => Vec::new(),
        }
    }

    pub fn interview_done(&mut self) -> Vec<NodeEvent> {
        let mut events = Vec::new();
        self.feed_readiness(ReadinessInput::InterviewDone, &mut events);
        events
    }

    /// The node's durable state came from the cache with a finished interview.
    pub fn restart_from_cache(&mut self) -> Vec<NodeEvent> {
        self.restored_from_cache = true;
        let mut events = Vec::new();
        self.feed_readiness(ReadinessInput::RestartFromCache, &mut events);
        events
    }

    fn feed_readiness(&mut self, input: ReadinessInput, events: &mut Vec<NodeEvent>) {
        if self.readiness.apply(input) {
            events.push(NodeEvent::Ready {
                node_id: self.id,
                from_cache: self.restored_from_cache && input != ReadinessInput::InterviewDone,
            });
        }
    }

    // ── Interview progress ────────────────────────────────────────────

    pub fn stage(&self) -> InterviewStage {
        self.stage
    }

    /// Move the stage forward. Never moves it backwards.
    pub fn advance_stage(&mut self, stage: InterviewStage) -> bool {
        if stage <= self.stage {
            return false;
        }
        self.stage = stage;
        true
    }

    /// Start over: stage back to `None`, every capability forgotten and a new
    /// readiness lifetime. Security grants survive; they come from inclusion.
    /// Returns the stage the node was at.
    pub fn reset_interview(&mut self) -> InterviewStage {
        let previous = self.stage;
        self.stage = InterviewStage::None;
        self.readiness.reset();
        self.restored_from_cache = false;
        self.device_class = None;
        self.manufacturer = None;
        self.firmware = None;
        self.missing_keys_warned = false;
        self.endpoints.retain(|index, _| *index == 0);
        for ep in self.endpoints.values_mut() {
            ep.clear();
        }
        previous
    }

    pub fn refresh_pending(&self) -> bool {
        self.refresh_pending
    }

    /// Claim the re-interview slot. `false` if one is already pending.
    pub fn try_begin_refresh(&mut self) -> bool {
        if self.refresh_pending {
            return false;
        }
        self.refresh_pending = true;
        true
    }

    pub fn end_refresh(&mut self) {
        self.refresh_pending = false;
    }

    pub fn is_interviewing(&self) -> bool {
        self.interviewing
    }

    pub fn set_interviewing(&mut self, interviewing: bool) {
        self.interviewing = interviewing;
    }

    /// `true` the first time it is called for this interview lifetime.
    pub fn warn_missing_keys_once(&mut self) -> bool {
        !std::mem::replace(&mut self.missing_keys_warned, true)
    }

    // ── Protocol info & identity ──────────────────────────────────────

    pub fn device_class(&self) -> Option<DeviceClass> {
        self.device_class
    }

    pub fn set_device_class(&mut self, class: Option<DeviceClass>) {
        self.device_class = class;
    }

    pub fn is_listening(&self) -> Option<bool> {
        self.is_listening
    }

    pub fn is_frequent_listening(&self) -> Option<bool> {
        self.is_frequent_listening
    }

    pub fn is_routing(&self) -> Option<bool> {
        self.is_routing
    }

    pub fn protocol_version(&self) -> Option<u8> {
        self.protocol_version
    }

    pub fn set_listening(
        &mut self,
        listening: Option<bool>,
        frequent_listening: Option<bool>,
        routing: Option<bool>,
    ) {
        self.is_listening = listening;
        self.is_frequent_listening = frequent_listening;
        self.is_routing = routing;
    }

    pub fn set_protocol_version(&mut self, version: Option<u8>) {
        self.protocol_version = version;
    }

    pub fn apply_protocol_info(&mut self, info: &ProtocolInfo) {
        self.device_class = Some(info.device_class);
        self.set_listening(
            Some(info.is_listening),
            Some(info.is_frequent_listening),
            Some(info.is_routing),
        );
        self.protocol_version = Some(info.protocol_version);
    }

    pub fn manufacturer(&self) -> Option<ManufacturerInfo> {
        self.manufacturer
    }

    pub fn set_manufacturer(&mut self, info: Option<ManufacturerInfo>) {
        self.manufacturer = info;
    }

    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.firmware
    }

    pub fn set_firmware(&mut self, firmware: Option<FirmwareVersion>) {
        self.firmware = firmware;
    }

    // ── Security ──────────────────────────────────────────────────────

    pub fn security(&self) -> &SecurityGrants {
        &self.security
    }

    pub fn security_mut(&mut self) -> &mut SecurityGrants {
        &mut self.security
    }

    pub fn highest_security_class(&self) -> HighestGrant {
        self.security.highest()
    }

    // ── Endpoints ─────────────────────────────────────────────────────

    pub fn root(&self) -> &Endpoint {
        &self.endpoints[&0]
    }

    pub fn root_mut(&mut self) -> &mut Endpoint {
        self.endpoints.entry(0).or_insert_with(|| Endpoint::new(0))
    }

    pub fn endpoint(&self, index: u8) -> Option<&Endpoint> {
        self.endpoints.get(&index)
    }

    pub fn endpoint_mut(&mut self, index: u8) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&index)
    }

    pub fn ensure_endpoint(&mut self, index: u8) -> &mut Endpoint {
        self.endpoints
            .entry(index)
            .or_insert_with(|| Endpoint::new(index))
    }

    /// Endpoint indices in ascending order, root first.
    pub fn endpoint_indices(&self) -> Vec<u8> {
        self.endpoints.keys().copied().collect()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            node_id: self.id,
            status: self.status(),
            readiness: self.readiness(),
            interview_stage: self.stage,
            is_listening: self.is_listening,
            is_frequent_listening: self.is_frequent_listening,
            manufacturer: self.manufacturer.map(|m| m.to_string()),
            firmware: self.firmware.map(|f| f.to_string()),
            highest_security_class: self.security.highest(),
            endpoints: self
                .endpoints
                .values()
                .map(|ep| EndpointSummary {
                    index: ep.index(),
                    command_classes: ep.ccs().map(|(cc, info)| (cc.key(), info)).collect(),
                    failure: ep.failure().map(str::to_owned),
                })
                .collect(),
        }
    }
}

/// Serializable snapshot for display.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub readiness: Readiness,
    pub interview_stage: InterviewStage,
    pub is_listening: Option<bool>,
    pub is_frequent_listening: Option<bool>,
    pub manufacturer: Option<String>,
    pub firmware: Option<String>,
    pub highest_security_class: HighestGrant,
    pub endpoints: Vec<EndpointSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub index: u8,
    pub command_classes: BTreeMap<String, CcInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use zw_domain::CommandClass;

    fn listening(id: u16) -> Node {
        let mut node = Node::new(NodeId(id));
        node.set_listening(Some(true), Some(false), Some(true));
        node
    }

    #[test]
    fn unknown_flags_mean_cannot_sleep() {
        let mut node = Node::new(NodeId(3));
        assert!(!node.can_sleep());
        node.set_listening(Some(false), Some(true), None);
        assert!(!node.can_sleep());
        node.set_listening(Some(false), Some(false), None);
        assert!(node.can_sleep());
    }

    #[test]
    fn stage_never_moves_backwards() {
        let mut node = listening(4);
        assert!(node.advance_stage(InterviewStage::NodeInfo));
        assert!(!node.advance_stage(InterviewStage::ProtocolInfo));
        assert!(!node.advance_stage(InterviewStage::NodeInfo));
        assert_eq!(node.stage(), InterviewStage::NodeInfo);
    }

    #[test]
    fn reset_clears_capabilities_but_keeps_grants() {
        let mut node = listening(5);
        node.advance_stage(InterviewStage::Complete);
        node.root_mut()
            .add_cc(CommandClass::BASIC, CcInfo::supported());
        node.ensure_endpoint(1)
            .add_cc(CommandClass::METER, CcInfo::supported());
        node.security_mut()
            .set(zw_domain::SecurityClass::S0Legacy, true);
        node.interview_done();

        let previous = node.reset_interview();
        assert_eq!(previous, InterviewStage::Complete);
        assert_eq!(node.stage(), InterviewStage::None);
        assert_eq!(node.endpoint_indices(), vec![0]);
        assert!(node.root().supported_ccs().is_empty());
        assert_eq!(node.readiness(), Readiness::NotReady);
        assert_eq!(
            node.security().get(zw_domain::SecurityClass::S0Legacy),
            Some(true)
        );
    }

    #[test]
    fn dead_forwards_maybe_dead() {
        let mut node = listening(6);
        let events = node.mark(StatusInput::MarkDead);
        assert_eq!(
            events,
            vec![NodeEvent::StatusChanged {
                node_id: NodeId(6),
                from: NodeStatus::Unknown,
                to: NodeStatus::Dead,
            }]
        );
        // Dead node restored from cache waits until it is seen alive.
        assert!(node.restart_from_cache().is_empty());
        assert_eq!(node.readiness(), Readiness::ReadyIfNotDead);
        let events = node.mark(StatusInput::MarkAlive);
        assert!(events.contains(&NodeEvent::Ready {
            node_id: NodeId(6),
            from_cache: true,
        }));
    }

    #[test]
    fn refresh_guard_is_exclusive() {
        let mut node = listening(7);
        assert!(node.try_begin_refresh());
        assert!(!node.try_begin_refresh());
        node.end_refresh();
        assert!(node.try_begin_refresh());
    }

    #[test]
    fn flag_guards_clear_on_drop() {
        let node = Node::new(NodeId(3)).shared();
        let claim = FlagGuard::refresh(&node).unwrap();
        assert!(FlagGuard::refresh(&node).is_none());
        drop(claim);
        assert!(!node.lock().refresh_pending());

        node.lock().set_interviewing(true);
        drop(FlagGuard::new(&node, |n| n.set_interviewing(false)));
        assert!(!node.lock().is_interviewing());
    }

    #[test]
    fn missing_keys_warning_fires_once() {
        let mut node = listening(8);
        assert!(node.warn_missing_keys_once());
        assert!(!node.warn_missing_keys_once());
        node.reset_interview();
        assert!(node.warn_missing_keys_once());
    }
}
