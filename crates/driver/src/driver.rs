//! The driver wires link, scheduler, node table, cache and interviewer
//! together and owns the interview lifecycle of every node: retries,
//! wake-up resumption, re-interviews and removal.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use zw_domain::config::Config;
use zw_domain::{CcCatalog, CommandClass, InterviewStage, NodeId, NodeStatus};
use zw_node::{
    DeviceProfiles, EventBus, FlagGuard, InterviewError, InterviewOutcome, Interviewer, Node,
    NodeCache, NodeEvent, NodeSummary, ProfileList, SecurityKeys, SharedNode, StatusInput,
    ValueStore,
};
use zw_scheduler::{Link, Scheduler};

use crate::keys::ConfiguredKeys;
use crate::retry::RetryPolicy;
use crate::table::NodeTable;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("node {0} is being interviewed")]
    InterviewInProgress(NodeId),

    #[error(transparent)]
    Interview(#[from] InterviewError),

    #[error(transparent)]
    Store(#[from] zw_domain::Error),
}

pub type InterviewResult = Result<InterviewOutcome, DriverError>;

pub struct Driver {
    table: Arc<NodeTable>,
    scheduler: Arc<Scheduler>,
    interviewer: Interviewer,
    cache: NodeCache,
    events: EventBus,
    retry: RetryPolicy,
    resume_on_startup: bool,
    /// Nodes with an interview loop running.
    active: Mutex<HashSet<NodeId>>,
    shutdown: CancellationToken,
}

/// Releases a node's interview slot when dropped.
struct Slot<'a> {
    active: &'a Mutex<HashSet<NodeId>>,
    id: NodeId,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.id);
    }
}

impl Driver {
    /// Build a driver with the standard CC catalog, the configured network
    /// keys and the configured device profiles.
    pub fn new(config: &Config, link: Arc<dyn Link>, store: Arc<dyn ValueStore>) -> Arc<Self> {
        Self::with_parts(
            config,
            link,
            store,
            CcCatalog::standard(),
            Arc::new(ConfiguredKeys::from_config(&config.security)),
            Arc::new(ProfileList::new(config.device_profiles.clone())),
        )
    }

    pub fn with_parts(
        config: &Config,
        link: Arc<dyn Link>,
        store: Arc<dyn ValueStore>,
        catalog: CcCatalog,
        keys: Arc<dyn SecurityKeys>,
        profiles: Arc<dyn DeviceProfiles>,
    ) -> Arc<Self> {
        let events = EventBus::default();
        let table = Arc::new(NodeTable::new(events.clone()));
        let scheduler = Arc::new(Scheduler::new(link, table.clone(), &config.scheduler));
        scheduler.set_outcome_sink(table.clone());

        let cache = NodeCache::new(store);
        let interviewer = Interviewer::new(
            scheduler.clone(),
            cache.clone(),
            Arc::new(catalog),
            keys,
            profiles,
            config.controller.node_id,
        )
        .with_events(events.clone());

        Arc::new(Self {
            table,
            scheduler,
            interviewer,
            cache,
            events,
            retry: RetryPolicy::from_config(&config.interview),
            resume_on_startup: config.interview.resume_on_startup,
            active: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start the send loop.
    pub fn start(&self) -> JoinHandle<()> {
        self.scheduler.spawn()
    }

    /// Stop retries and the send loop. Queued transactions resolve as dropped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.scheduler.shutdown();
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    pub fn node(&self, id: NodeId) -> Option<SharedNode> {
        self.table.get(id)
    }

    pub fn nodes(&self) -> Vec<NodeSummary> {
        self.table.list()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Node lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Load every cached node into the table. Nodes whose interview already
    /// completed go through `RestartFromCache`.
    pub fn restore_from_cache(&self) -> Result<Vec<NodeId>, DriverError> {
        let mut restored = Vec::new();
        for id in self.cache.node_ids() {
            let Some(mut node) = self.cache.load(id)? else {
                continue;
            };
            let events = if node.stage() == InterviewStage::Complete {
                node.restart_from_cache()
            } else {
                Vec::new()
            };
            tracing::debug!(node_id = %id, stage = ?node.stage(), "node restored from cache");
            self.table.insert(node);
            self.events.publish_all(events);
            restored.push(id);
        }
        tracing::info!(count = restored.len(), "nodes restored from cache");
        Ok(restored)
    }

    /// Add a node the cache knows nothing about. Returns the existing node
    /// if the id is already known.
    pub fn add_node(&self, id: NodeId) -> SharedNode {
        match self.table.get(id) {
            Some(node) => node,
            None => self.table.insert(Node::new(id)),
        }
    }

    /// Forget a node. Rejected while it is being interviewed.
    pub fn remove_node(&self, id: NodeId) -> Result<(), DriverError> {
        {
            // Held across the check and the removal so no slot is claimed
            // in between.
            let active = self.active.lock();
            let node = self.table.get(id).ok_or(DriverError::NodeNotFound(id))?;
            let busy = {
                let n = node.lock();
                n.is_interviewing() || n.refresh_pending()
            };
            if busy || active.contains(&id) {
                return Err(DriverError::InterviewInProgress(id));
            }
            self.table.remove(id);
        }
        self.scheduler.cancel_for_node(id);
        let removed = self.cache.forget(id)?;
        tracing::debug!(node_id = %id, keys = removed, "cached node state removed");
        Ok(())
    }

    /// The node signalled it is awake: release its held transactions and
    /// resume an unfinished interview.
    pub fn on_wake_up(self: &Arc<Self>, id: NodeId) -> Option<JoinHandle<InterviewResult>> {
        let node = self.table.get(id)?;
        let (events, stage) = {
            let mut n = node.lock();
            (n.mark(StatusInput::MarkAwake), n.stage())
        };
        self.events.publish_all(events);
        self.scheduler.target_changed();
        tracing::debug!(node_id = %id, stage = ?stage, "node woke up");

        if stage == InterviewStage::Complete || self.is_interviewing(id) {
            return None;
        }
        Some(self.spawn_interview(id))
    }

    /// The node went back to sleep.
    pub fn on_sleep(&self, id: NodeId) {
        let Some(node) = self.table.get(id) else {
            return;
        };
        let events = node.lock().mark(StatusInput::MarkAsleep);
        self.events.publish_all(events);
        tracing::debug!(node_id = %id, "node fell asleep");
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Interviews
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn is_interviewing(&self, id: NodeId) -> bool {
        self.active.lock().contains(&id)
    }

    /// Claim the node's interview slot. The table lookup happens under the
    /// same lock `remove_node` holds, so a claimed node is still in the table.
    fn claim(&self, id: NodeId) -> Result<(Slot<'_>, SharedNode), DriverError> {
        let mut active = self.active.lock();
        let node = self.table.get(id).ok_or(DriverError::NodeNotFound(id))?;
        if !active.insert(id) {
            return Err(DriverError::InterviewInProgress(id));
        }
        let slot = Slot {
            active: &self.active,
            id,
        };
        Ok((slot, node))
    }

    /// Interview a node, retrying incomplete passes per the retry policy.
    /// A node that falls asleep stops being retried; its next wake-up
    /// resumes the interview.
    pub async fn interview_node(&self, id: NodeId) -> InterviewResult {
        let (_slot, node) = self.claim(id)?;
        self.run_interview(id, &node).await
    }

    pub fn spawn_interview(self: &Arc<Self>, id: NodeId) -> JoinHandle<InterviewResult> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.interview_node(id).await })
    }

    /// Interview every known node concurrently.
    pub async fn interview_all(&self) -> Vec<(NodeId, InterviewResult)> {
        let ids = self.table.ids();
        let passes = ids.iter().map(|id| self.interview_node(*id));
        let results = futures_util::future::join_all(passes).await;
        ids.into_iter().zip(results).collect()
    }

    /// Spawn interviews for restored nodes that stopped part-way, if
    /// `interview.resume_on_startup` is set.
    pub fn resume_incomplete(self: &Arc<Self>) -> Vec<JoinHandle<InterviewResult>> {
        if !self.resume_on_startup {
            return Vec::new();
        }
        self.table
            .ids()
            .into_iter()
            .filter(|id| {
                self.table
                    .get(*id)
                    .is_some_and(|n| n.lock().stage() != InterviewStage::Complete)
            })
            .map(|id| self.spawn_interview(id))
            .collect()
    }

    /// Forget what the interview learned and run it again. `Ok(None)` when a
    /// re-interview is already pending for the node.
    pub async fn refresh_info(&self, id: NodeId) -> Result<Option<InterviewOutcome>, DriverError> {
        let node = self.table.get(id).ok_or(DriverError::NodeNotFound(id))?;
        let Some(_pending) = FlagGuard::refresh(&node) else {
            tracing::debug!(node_id = %id, "re-interview already pending");
            return Ok(None);
        };
        let (_slot, node) = self.claim(id)?;
        self.interviewer.reset(&node)?;
        self.run_interview(id, &node).await.map(Some)
    }

    /// Interview one CC on one endpoint of a node. Refused while the node
    /// has an interview running.
    pub async fn interview_cc(
        &self,
        id: NodeId,
        endpoint: u8,
        cc: CommandClass,
    ) -> Result<(), DriverError> {
        let (_slot, node) = self.claim(id)?;
        self.interviewer.interview_cc(&node, endpoint, cc).await?;
        Ok(())
    }

    async fn run_interview(&self, id: NodeId, node: &SharedNode) -> InterviewResult {
        let mut attempts = 0u32;
        loop {
            let outcome = self.interviewer.interview(node).await?;
            attempts += 1;
            let InterviewOutcome::Incomplete { stage, error } = outcome else {
                return Ok(outcome);
            };

            if self.shutdown.is_cancelled() {
                return Ok(outcome);
            }
            if node.lock().status() == NodeStatus::Asleep {
                tracing::info!(node_id = %id, stage = ?stage, "node asleep, interview resumes on wake-up");
                return Ok(outcome);
            }
            let Some(delay) = self.retry.next_delay(attempts) else {
                tracing::warn!(
                    node_id = %id,
                    attempts,
                    stage = ?stage,
                    error = %error,
                    "interview attempts exhausted"
                );
                self.events.publish(NodeEvent::InterviewFailed {
                    node_id: id,
                    reason: format!("gave up after {attempts} attempts: {error}"),
                    fatal: false,
                });
                return Ok(outcome);
            };

            tracing::debug!(node_id = %id, attempt = attempts, delay_ms = delay.as_millis() as u64, "retrying interview");
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(outcome),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
