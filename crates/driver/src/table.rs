//! In-memory table of known nodes.
//!
//! The scheduler reads target state from here and reports transaction
//! outcomes back, which is what drives the reachability machines.

use std::collections::HashMap;

use parking_lot::RwLock;

use zw_domain::{NodeId, NodeStatus};
use zw_node::{EventBus, Node, NodeSummary, SharedNode};
use zw_protocol::TransmissionError;
use zw_scheduler::{OutcomeSink, TargetState, TargetStateSource};

pub struct NodeTable {
    nodes: RwLock<HashMap<NodeId, SharedNode>>,
    events: EventBus,
}

impl NodeTable {
    pub fn new(events: EventBus) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Insert a node, replacing any existing node with the same id.
    pub fn insert(&self, node: Node) -> SharedNode {
        let id = node.id();
        let shared = node.shared();
        if self.nodes.write().insert(id, shared.clone()).is_some() {
            tracing::debug!(node_id = %id, "node replaced");
        } else {
            tracing::info!(node_id = %id, "node added");
        }
        shared
    }

    pub fn remove(&self, id: NodeId) -> Option<SharedNode> {
        let removed = self.nodes.write().remove(&id);
        if removed.is_some() {
            tracing::info!(node_id = %id, "node removed");
        }
        removed
    }

    pub fn get(&self, id: NodeId) -> Option<SharedNode> {
        self.nodes.read().get(&id).cloned()
    }

    /// Node ids in ascending order.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Snapshot of every node, ordered by id.
    pub fn list(&self) -> Vec<NodeSummary> {
        let nodes: Vec<SharedNode> = {
            let map = self.nodes.read();
            let mut ids: Vec<&NodeId> = map.keys().collect();
            ids.sort();
            ids.into_iter().filter_map(|id| map.get(id).cloned()).collect()
        };
        nodes.iter().map(|n| n.lock().summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl TargetStateSource for NodeTable {
    fn target_state(&self, id: NodeId) -> TargetState {
        let Some(node) = self.get(id) else {
            return TargetState {
                asleep: false,
                listening: true,
            };
        };
        let n = node.lock();
        TargetState {
            asleep: n.status() == NodeStatus::Asleep,
            listening: !n.can_sleep(),
        }
    }
}

impl OutcomeSink for NodeTable {
    fn transaction_outcome(&self, id: NodeId, outcome: Result<(), TransmissionError>) {
        let Some(node) = self.get(id) else {
            return;
        };
        let events = node.lock().apply_outcome(outcome);
        self.events.publish_all(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zw_node::NodeEvent;

    fn sleeper(id: u16) -> Node {
        let mut node = Node::new(NodeId(id));
        node.set_listening(Some(false), Some(false), Some(true));
        node
    }

    #[test]
    fn insert_replaces_duplicate() {
        let table = NodeTable::new(EventBus::default());
        table.insert(Node::new(NodeId(3)));
        table.insert(Node::new(NodeId(3)));
        table.insert(Node::new(NodeId(2)));
        assert_eq!(table.len(), 2);
        assert_eq!(table.ids(), vec![NodeId(2), NodeId(3)]);
        assert_eq!(table.list()[0].node_id, NodeId(2));
    }

    #[test]
    fn remove_and_len() {
        let table = NodeTable::new(EventBus::default());
        table.insert(Node::new(NodeId(4)));
        assert!(table.remove(NodeId(4)).is_some());
        assert!(table.remove(NodeId(4)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_targets_count_as_listening() {
        let table = NodeTable::new(EventBus::default());
        let state = table.target_state(NodeId(9));
        assert!(!state.asleep);
        assert!(state.listening);
    }

    #[tokio::test]
    async fn outcomes_drive_reachability_and_publish() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let table = NodeTable::new(events);
        table.insert(sleeper(6));

        table.transaction_outcome(NodeId(6), Err(TransmissionError::Timeout));
        let state = table.target_state(NodeId(6));
        assert!(state.asleep);
        assert!(!state.listening);

        match rx.recv().await.unwrap() {
            NodeEvent::StatusChanged { to, .. } => assert_eq!(to, NodeStatus::Asleep),
            other => panic!("unexpected event {other:?}"),
        }

        // Channel problems do not touch the node.
        table.transaction_outcome(NodeId(6), Err(TransmissionError::Collision));
        assert!(rx.try_recv().is_err());
    }
}
