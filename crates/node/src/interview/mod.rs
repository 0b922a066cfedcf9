//! Resumable node interview.
//!
//! A pass walks the stages from wherever the node stopped. Every stage
//! transition and every finished CC is written to the cache before the next
//! one starts, so a pass cut short by a transmission failure resumes exactly
//! where it stopped. Transmission failures end the pass as
//! [`InterviewOutcome::Incomplete`]; structural failures mark the endpoint
//! and surface as [`InterviewError`].

mod bootstrap;
pub mod error;
pub mod order;

use std::sync::Arc;
use std::time::Instant;

use zw_domain::config::DeviceProfile;
use zw_domain::{CcCatalog, CommandClass, InterviewStage, NodeId, SecurityClass, TraceEvent};
use zw_protocol::{CcReport, Message, Response, TransmissionError};
use zw_scheduler::{Link, MessagePriority, Target, Transaction};

use crate::cache::NodeCache;
use crate::events::{EventBus, NodeEvent};
use crate::node::{FlagGuard, SharedNode};
use crate::providers::{DeviceProfiles, SecurityKeys};
use crate::status::StatusInput;

pub use error::{InterviewError, InterviewOutcome, StructuralError};
pub use order::{plan, topological_order, CcPlan, BOOTSTRAP_CCS};

/// Highest endpoint index Multi Channel can address.
pub const MAX_ENDPOINT: u8 = 127;

/// Internal split between "abort this pass" and "fail the interview".
#[derive(Debug)]
enum StepError {
    Transmission(TransmissionError),
    Fatal(InterviewError),
}

impl From<TransmissionError> for StepError {
    fn from(e: TransmissionError) -> Self {
        Self::Transmission(e)
    }
}

impl From<StructuralError> for StepError {
    fn from(e: StructuralError) -> Self {
        Self::Fatal(e.into())
    }
}

impl From<zw_domain::Error> for StepError {
    fn from(e: zw_domain::Error) -> Self {
        Self::Fatal(e.into())
    }
}

type Step<T = ()> = Result<T, StepError>;

pub struct Interviewer {
    link: Arc<dyn Link>,
    cache: NodeCache,
    catalog: Arc<CcCatalog>,
    keys: Arc<dyn SecurityKeys>,
    profiles: Arc<dyn DeviceProfiles>,
    controller: NodeId,
    events: EventBus,
}

impl Interviewer {
    pub fn new(
        link: Arc<dyn Link>,
        cache: NodeCache,
        catalog: Arc<CcCatalog>,
        keys: Arc<dyn SecurityKeys>,
        profiles: Arc<dyn DeviceProfiles>,
        controller: NodeId,
    ) -> Self {
        Self {
            link,
            cache,
            catalog,
            keys,
            profiles,
            controller,
            events: EventBus::default(),
        }
    }

    /// Publish on an existing bus instead of a private one.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    pub fn catalog(&self) -> &CcCatalog {
        &self.catalog
    }

    /// Run one interview pass.
    pub async fn interview(&self, node: &SharedNode) -> Result<InterviewOutcome, InterviewError> {
        let id = {
            let mut n = node.lock();
            if n.stage() == InterviewStage::Complete {
                return Ok(InterviewOutcome::Complete);
            }
            n.set_interviewing(true);
            n.id()
        };
        let interviewing = FlagGuard::new(node, |n| n.set_interviewing(false));
        tracing::debug!(node_id = %id, "interview pass started");

        let result = self.run_pass(node).await;
        drop(interviewing);
        let stage = node.lock().stage();

        match result {
            Ok(()) => {
                tracing::info!(node_id = %id, "interview completed");
                self.events
                    .publish(NodeEvent::InterviewCompleted { node_id: id });
                Ok(InterviewOutcome::Complete)
            }
            Err(StepError::Transmission(error)) => {
                tracing::info!(node_id = %id, stage = ?stage, error = %error, "interview incomplete");
                TraceEvent::InterviewIncomplete {
                    node_id: id,
                    stage,
                    reason: error.to_string(),
                }
                .emit();
                Ok(InterviewOutcome::Incomplete { stage, error })
            }
            Err(StepError::Fatal(error)) => {
                self.fail(node, &error);
                Err(error)
            }
        }
    }

    /// Interview a single CC on one endpoint, outside of a pass.
    pub async fn interview_cc(
        &self,
        node: &SharedNode,
        endpoint: u8,
        cc: CommandClass,
    ) -> Result<(), InterviewError> {
        if !self.catalog.is_implemented(cc) {
            return Err(StructuralError::CcNotImplemented { endpoint, cc }.into());
        }
        if node.lock().endpoint(endpoint).is_none() {
            return Err(StructuralError::EndpointOutOfRange { endpoint }.into());
        }
        match self.execute_cc(node, endpoint, cc).await {
            Ok(()) => Ok(()),
            Err(StepError::Transmission(e)) => Err(InterviewError::Transmission(e)),
            Err(StepError::Fatal(e)) => Err(e),
        }
    }

    /// Forget everything the interview learned and start a new lifetime.
    /// Returns the stage the node was at.
    pub fn reset(&self, node: &SharedNode) -> Result<InterviewStage, InterviewError> {
        let (id, previous) = {
            let mut n = node.lock();
            let previous = n.reset_interview();
            (n.id(), previous)
        };
        self.cache.clear_capabilities(id)?;
        tracing::info!(node_id = %id, previous_stage = ?previous, "interview reset");
        TraceEvent::InterviewReset {
            node_id: id,
            previous_stage: previous,
        }
        .emit();
        Ok(previous)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Stages
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn run_pass(&self, node: &SharedNode) -> Step {
        let id = node.lock().id();

        if self.stage(node) == InterviewStage::None {
            self.query_protocol_info(node).await?;
            self.advance(node, InterviewStage::ProtocolInfo)?;
        }

        if id == self.controller {
            let events = {
                let mut n = node.lock();
                let mut events = n.mark(StatusInput::MarkAlive);
                n.advance_stage(InterviewStage::Complete);
                events.extend(n.interview_done());
                events
            };
            self.cache.save_stage(id, InterviewStage::Complete)?;
            self.events.publish(NodeEvent::InterviewStageCompleted {
                node_id: id,
                stage: InterviewStage::Complete,
            });
            self.events.publish_all(events);
            return Ok(());
        }

        self.ping_if_needed(node).await?;

        if self.stage(node) < InterviewStage::NodeInfo {
            self.query_node_info(node).await?;
            self.advance(node, InterviewStage::NodeInfo)?;
        }
        if self.stage(node) < InterviewStage::CommandClasses {
            self.interview_command_classes(node).await?;
            self.advance(node, InterviewStage::CommandClasses)?;
        }
        if self.stage(node) < InterviewStage::OverwriteConfig {
            self.overwrite_config(node).await?;
            self.advance(node, InterviewStage::OverwriteConfig)?;
        }
        self.advance(node, InterviewStage::Complete)?;

        let events = node.lock().interview_done();
        self.events.publish_all(events);
        Ok(())
    }

    fn stage(&self, node: &SharedNode) -> InterviewStage {
        node.lock().stage()
    }

    /// Record a finished stage durably, then announce it.
    fn advance(&self, node: &SharedNode, stage: InterviewStage) -> Step {
        let (id, moved) = {
            let mut n = node.lock();
            (n.id(), n.advance_stage(stage))
        };
        if !moved {
            return Ok(());
        }
        self.cache.save_stage(id, stage)?;
        tracing::info!(node_id = %id, stage = ?stage, "interview stage completed");
        self.events
            .publish(NodeEvent::InterviewStageCompleted { node_id: id, stage });
        Ok(())
    }

    async fn query_protocol_info(&self, node: &SharedNode) -> Step {
        let id = node.lock().id();
        let response = self
            .send(
                Target::Controller,
                Message::GetProtocolInfo { node_id: id },
                MessagePriority::Controller,
            )
            .await?;
        let Response::ProtocolInfo(info) = response else {
            return Err(unexpected(id, "protocol info", &response));
        };

        let mut n = node.lock();
        n.apply_protocol_info(&info);
        self.cache.save_protocol_info(&n)?;
        tracing::debug!(
            node_id = %id,
            listening = info.is_listening,
            frequent_listening = info.is_frequent_listening,
            "protocol info received"
        );
        Ok(())
    }

    /// Listening nodes not known to be alive get a NoOperation first.
    async fn ping_if_needed(&self, node: &SharedNode) -> Step {
        let (id, needs_ping) = {
            let n = node.lock();
            let listens =
                n.is_listening() == Some(true) || n.is_frequent_listening() == Some(true);
            (n.id(), listens && n.status() != zw_domain::NodeStatus::Alive)
        };
        if !needs_ping {
            return Ok(());
        }
        tracing::debug!(node_id = %id, "pinging node before interview");
        self.send_to(id, Message::NoOperation).await?;
        Ok(())
    }

    async fn query_node_info(&self, node: &SharedNode) -> Step {
        let id = node.lock().id();
        let response = self.send_to(id, Message::RequestNodeInfo).await?;
        let Response::NodeInfo(frame) = response else {
            return Err(unexpected(id, "node info", &response));
        };

        let mut n = node.lock();
        let root = n.root_mut();
        for cc in &frame.supported {
            root.update_cc(*cc, |info| info.is_supported = true);
        }
        for cc in &frame.controlled {
            root.update_cc(*cc, |info| info.is_controlled = true);
        }
        self.cache.save_endpoint(id, n.root())?;
        tracing::debug!(
            node_id = %id,
            supported = frame.supported.len(),
            controlled = frame.controlled.len(),
            "node info received"
        );
        Ok(())
    }

    async fn interview_command_classes(&self, node: &SharedNode) -> Step {
        let profile = self.bootstrap_root(node).await?;
        let treat_basic_as_event = profile
            .as_ref()
            .map(|p| p.treat_basic_set_as_event)
            .unwrap_or(false);

        let supported = node.lock().root().supported_ccs();
        let root_plan = plan(&self.catalog, 0, &supported, true)?;
        self.run_ccs(node, 0, &root_plan.ordered).await?;

        let others: Vec<u8> = node
            .lock()
            .endpoint_indices()
            .into_iter()
            .filter(|i| *i != 0)
            .collect();
        for index in others {
            self.interview_endpoint(node, index, treat_basic_as_event)
                .await?;
        }

        self.run_ccs(node, 0, &root_plan.deferred).await
    }

    async fn interview_endpoint(
        &self,
        node: &SharedNode,
        index: u8,
        treat_basic_as_event: bool,
    ) -> Step {
        tracing::debug!(node_id = %node.lock().id(), endpoint = index, "interviewing endpoint");
        self.bootstrap_endpoint_security(node, index).await?;
        if !treat_basic_as_event {
            self.hide_basic(node, index)?;
        }
        self.interview_if_supported(node, index, CommandClass::VERSION)
            .await?;

        let supported = node
            .lock()
            .endpoint(index)
            .map(|ep| ep.supported_ccs())
            .ok_or(StructuralError::EndpointOutOfRange { endpoint: index })?;
        let endpoint_plan = plan(&self.catalog, index, &supported, false)?;
        self.run_ccs(node, index, &endpoint_plan.ordered).await
    }

    async fn overwrite_config(&self, node: &SharedNode) -> Step {
        let Some(profile) = self.lookup_profile(node).await else {
            return Ok(());
        };
        let mut n = node.lock();
        let id = n.id();
        tracing::info!(node_id = %id, profile = %profile.label, "applying device profile");

        for removal in &profile.remove {
            match n.endpoint_mut(removal.endpoint) {
                Some(ep) => {
                    ep.remove_cc(removal.cc);
                }
                None => tracing::warn!(
                    node_id = %id,
                    endpoint = removal.endpoint,
                    cc = %removal.cc,
                    "profile removes CC from unknown endpoint"
                ),
            }
        }
        for addition in &profile.add {
            let Some(ep) = n.endpoint_mut(addition.endpoint) else {
                tracing::warn!(
                    node_id = %id,
                    endpoint = addition.endpoint,
                    cc = %addition.cc,
                    "profile adds CC to unknown endpoint"
                );
                continue;
            };
            ep.update_cc(addition.cc, |info| {
                if addition.controlled {
                    info.is_controlled = true;
                } else {
                    info.is_supported = true;
                }
                if let Some(version) = addition.version {
                    info.version = version;
                }
                if let Some(secure) = addition.secure {
                    info.secure = secure;
                }
            });
        }

        for ep in n.endpoints() {
            self.cache.save_endpoint(id, ep)?;
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Per-CC execution
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn run_ccs(&self, node: &SharedNode, endpoint: u8, ccs: &[CommandClass]) -> Step {
        for cc in ccs {
            self.interview_once(node, endpoint, *cc).await?;
        }
        Ok(())
    }

    async fn interview_if_supported(
        &self,
        node: &SharedNode,
        endpoint: u8,
        cc: CommandClass,
    ) -> Step {
        let supported = node
            .lock()
            .endpoint(endpoint)
            .is_some_and(|ep| ep.supports_cc(cc));
        if supported {
            self.interview_once(node, endpoint, cc).await?;
        }
        Ok(())
    }

    /// Interview `cc` unless it already finished or is no longer supported.
    async fn interview_once(&self, node: &SharedNode, endpoint: u8, cc: CommandClass) -> Step {
        let (id, supported, done) = {
            let n = node.lock();
            let ep = n
                .endpoint(endpoint)
                .ok_or(StructuralError::EndpointOutOfRange { endpoint })?;
            (n.id(), ep.supports_cc(cc), ep.is_interviewed(cc))
        };
        if done {
            tracing::debug!(node_id = %id, endpoint, cc = %cc, "CC already interviewed");
            return Ok(());
        }
        if !supported {
            tracing::debug!(node_id = %id, endpoint, cc = %cc, "CC no longer supported, skipping");
            return Ok(());
        }
        self.execute_cc(node, endpoint, cc).await
    }

    async fn execute_cc(&self, node: &SharedNode, endpoint: u8, cc: CommandClass) -> Step {
        let id = node.lock().id();
        let started = Instant::now();
        let response = self
            .send_to(id, Message::InterviewCc { endpoint, cc })
            .await?;
        self.apply_response(node, endpoint, cc, response)?;

        let mut n = node.lock();
        if let Some(ep) = n.endpoint_mut(endpoint) {
            ep.mark_interviewed(cc);
        }
        if let Some(ep) = n.endpoint(endpoint) {
            self.cache.save_endpoint(id, ep)?;
        }
        TraceEvent::CcInterviewed {
            node_id: id,
            endpoint,
            cc,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        Ok(())
    }

    fn apply_response(
        &self,
        node: &SharedNode,
        endpoint: u8,
        cc: CommandClass,
        response: Response,
    ) -> Step {
        let id = node.lock().id();
        let report = match response {
            Response::Ack | Response::CcReport(CcReport::Done) => return Ok(()),
            Response::CcNotImplemented { cc } => {
                return Err(StructuralError::CcNotImplemented { endpoint, cc }.into())
            }
            Response::CcReport(report) => report,
            other => return Err(unexpected(id, "CC report", &other)),
        };

        match report {
            CcReport::Done => Ok(()),
            CcReport::Security {
                granted,
                secure_ccs,
            } => self.apply_security_report(node, endpoint, cc, &granted, &secure_ccs),
            CcReport::Manufacturer(info) => {
                if endpoint != 0 {
                    return Ok(());
                }
                let mut n = node.lock();
                n.set_manufacturer(Some(info));
                self.cache.save_identity(&n)?;
                tracing::info!(node_id = %id, manufacturer = %info, "manufacturer identified");
                Ok(())
            }
            CcReport::Version {
                firmware,
                cc_versions,
            } => {
                let mut n = node.lock();
                if endpoint == 0 && firmware.is_some() {
                    n.set_firmware(firmware);
                    self.cache.save_identity(&n)?;
                }
                let Some(ep) = n.endpoint_mut(endpoint) else {
                    return Err(StructuralError::EndpointOutOfRange { endpoint }.into());
                };
                for entry in cc_versions {
                    if ep.cc(entry.cc).is_none() {
                        continue;
                    }
                    if entry.version == 0 {
                        tracing::debug!(node_id = %id, endpoint, cc = %entry.cc, "CC reports version 0");
                        ep.update_cc(entry.cc, |info| info.is_supported = false);
                    } else {
                        ep.update_cc(entry.cc, |info| info.version = entry.version);
                    }
                }
                if let Some(ep) = n.endpoint(endpoint) {
                    self.cache.save_endpoint(id, ep)?;
                }
                Ok(())
            }
            CcReport::Endpoints { endpoints } => {
                if let Some(bad) = endpoints
                    .iter()
                    .find(|e| e.index == 0 || e.index > MAX_ENDPOINT)
                {
                    return Err(StructuralError::EndpointOutOfRange {
                        endpoint: bad.index,
                    }
                    .into());
                }
                let mut n = node.lock();
                for info in &endpoints {
                    let ep = n.ensure_endpoint(info.index);
                    if info.device_class.is_some() {
                        ep.set_device_class(info.device_class);
                    }
                    for cc in &info.supported {
                        ep.update_cc(*cc, |i| i.is_supported = true);
                    }
                }
                self.cache.save_endpoint_list(&n)?;
                for info in &endpoints {
                    if let Some(ep) = n.endpoint(info.index) {
                        self.cache.save_endpoint(id, ep)?;
                    }
                }
                tracing::info!(node_id = %id, count = endpoints.len(), "endpoints discovered");
                Ok(())
            }
        }
    }

    fn apply_security_report(
        &self,
        node: &SharedNode,
        endpoint: u8,
        cc: CommandClass,
        granted: &[SecurityClass],
        secure_ccs: &[CommandClass],
    ) -> Step {
        let mut n = node.lock();
        let id = n.id();
        for class in bootstrap::family(cc) {
            let is_granted = granted.contains(class);
            n.security_mut().set(*class, is_granted);
            self.cache.save_security_class(id, *class, is_granted)?;
        }
        let Some(ep) = n.endpoint_mut(endpoint) else {
            return Err(StructuralError::EndpointOutOfRange { endpoint }.into());
        };
        for secure in secure_ccs {
            ep.update_cc(*secure, |info| {
                info.is_supported = true;
                info.secure = true;
            });
        }
        if let Some(ep) = n.endpoint(endpoint) {
            self.cache.save_endpoint(id, ep)?;
        }
        tracing::info!(node_id = %id, cc = %cc, granted = ?granted, "security classes reported");
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Transmission
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn send_to(&self, node: NodeId, message: Message) -> Result<Response, TransmissionError> {
        self.send(Target::Node(node), message, MessagePriority::NodeQuery)
            .await
    }

    async fn send(
        &self,
        target: Target,
        message: Message,
        priority: MessagePriority,
    ) -> Result<Response, TransmissionError> {
        let tx = Transaction::new(target, message, priority);
        self.link.transmit(&tx).await
    }

    async fn lookup_profile(&self, node: &SharedNode) -> Option<DeviceProfile> {
        let (manufacturer, firmware) = {
            let n = node.lock();
            (n.manufacturer()?, n.firmware())
        };
        self.profiles.lookup(manufacturer, firmware).await
    }

    /// Mark the failing endpoint and announce the failure.
    fn fail(&self, node: &SharedNode, error: &InterviewError) {
        let id = node.lock().id();
        let endpoint = match error {
            InterviewError::Structural(e) => {
                let mut n = node.lock();
                let index = if n.endpoint(e.endpoint()).is_some() {
                    e.endpoint()
                } else {
                    0
                };
                if let Some(ep) = n.endpoint_mut(index) {
                    ep.mark_failed(e.to_string());
                }
                index
            }
            _ => 0,
        };
        tracing::error!(node_id = %id, endpoint, error = %error, "interview failed");
        TraceEvent::InterviewFailed {
            node_id: id,
            endpoint,
            reason: error.to_string(),
        }
        .emit();
        self.events.publish(NodeEvent::InterviewFailed {
            node_id: id,
            reason: error.to_string(),
            fatal: true,
        });
    }
}

/// A response of the wrong kind is treated like a lost frame.
fn unexpected(node: NodeId, expected: &str, got: &Response) -> StepError {
    tracing::warn!(node_id = %node, expected, got = got.kind(), "unexpected response");
    StepError::Transmission(TransmissionError::Dropped)
}
