//! Pending transactions, ordered on demand.
//!
//! Keys are recomputed on every pick because they depend on live node state
//! (asleep, listening) that changes while transactions wait.

use uuid::Uuid;

use zw_domain::NodeId;

use crate::link::TargetStateSource;
use crate::transaction::{Target, TargetState, Transaction};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("transaction queue is full ({0} pending)")]
pub struct QueueFull(pub usize);

pub struct TransactionQueue {
    pending: Vec<Transaction>,
    capacity: usize,
}

impl TransactionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Vec::new(),
            capacity,
        }
    }

    pub fn push(&mut self, tx: Transaction) -> Result<(), QueueFull> {
        if self.pending.len() >= self.capacity {
            return Err(QueueFull(self.pending.len()));
        }
        self.pending.push(tx);
        Ok(())
    }

    fn best_index(&self, states: &dyn TargetStateSource) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .min_by_key(|(_, tx)| tx.sort_key(state_of(tx, states)))
            .map(|(i, _)| i)
    }

    /// Remove and return the most urgent transaction, whatever its target's
    /// state.
    pub fn pop(&mut self, states: &dyn TargetStateSource) -> Option<Transaction> {
        let idx = self.best_index(states)?;
        Some(self.pending.swap_remove(idx))
    }

    /// Like [`pop`](Self::pop), but leaves the queue untouched when the most
    /// urgent transaction targets a sleeping node. Sleeping targets sort last,
    /// so in that case nothing in the queue can be sent right now.
    pub fn pop_sendable(&mut self, states: &dyn TargetStateSource) -> Option<Transaction> {
        let idx = self.best_index(states)?;
        if state_of(&self.pending[idx], states).asleep {
            return None;
        }
        Some(self.pending.swap_remove(idx))
    }

    /// Remove a transaction by id. Returns it if it was still queued.
    pub fn cancel(&mut self, id: &Uuid) -> Option<Transaction> {
        let idx = self.pending.iter().position(|tx| tx.id == *id)?;
        Some(self.pending.swap_remove(idx))
    }

    /// Remove every transaction addressed to `node`.
    pub fn cancel_for_node(&mut self, node: NodeId) -> Vec<Transaction> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|tx| tx.target == Target::Node(node));
        self.pending = kept;
        removed
    }

    /// Drain everything, in no particular order.
    pub fn drain(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.pending)
    }

    /// Snapshot in send order.
    pub fn ordered(&self, states: &dyn TargetStateSource) -> Vec<Transaction> {
        let mut all = self.pending.clone();
        all.sort_by_cached_key(|tx| tx.sort_key(state_of(tx, states)));
        all
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn state_of(tx: &Transaction, states: &dyn TargetStateSource) -> TargetState {
    match tx.target {
        Target::Controller => TargetState::CONTROLLER,
        Target::Node(id) => states.target_state(id),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use zw_protocol::Message;

    use super::*;
    use crate::link::AssumeListening;
    use crate::transaction::MessagePriority;

    struct States(HashMap<NodeId, TargetState>);

    impl TargetStateSource for States {
        fn target_state(&self, node: NodeId) -> TargetState {
            self.0.get(&node).copied().unwrap_or_default()
        }
    }

    fn tx(node: u16, priority: MessagePriority) -> Transaction {
        Transaction::to_node(NodeId(node), Message::NoOperation, priority)
    }

    #[test]
    fn pops_in_priority_order() {
        let mut q = TransactionQueue::new(8);
        let poll = tx(2, MessagePriority::Poll);
        let immediate = tx(3, MessagePriority::Immediate);
        let query = tx(4, MessagePriority::NodeQuery);
        q.push(poll.clone()).unwrap();
        q.push(immediate.clone()).unwrap();
        q.push(query.clone()).unwrap();

        let order: Vec<Uuid> = std::iter::from_fn(|| q.pop(&AssumeListening))
            .map(|t| t.id)
            .collect();
        assert_eq!(order, vec![immediate.id, query.id, poll.id]);
    }

    #[test]
    fn node_query_to_listening_target_first_regardless_of_creation_order() {
        let states = States(HashMap::from([
            (NodeId(10), TargetState { asleep: false, listening: true }),
            (NodeId(11), TargetState { asleep: false, listening: false }),
        ]));
        let listening = tx(10, MessagePriority::NodeQuery);
        let sleepy = tx(11, MessagePriority::NodeQuery);

        for first_in in [&listening, &sleepy] {
            let mut q = TransactionQueue::new(8);
            let second_in = if first_in.id == listening.id { &sleepy } else { &listening };
            q.push(first_in.clone()).unwrap();
            q.push(second_in.clone()).unwrap();
            assert_eq!(q.pop(&states).unwrap().id, listening.id);
        }
    }

    #[test]
    fn sleeping_targets_are_held_back() {
        let states = States(HashMap::from([(
            NodeId(5),
            TargetState { asleep: true, listening: false },
        )]));
        let mut q = TransactionQueue::new(8);
        q.push(tx(5, MessagePriority::WakeUp)).unwrap();
        assert!(q.pop_sendable(&states).is_none());
        assert_eq!(q.len(), 1);

        let awake = tx(6, MessagePriority::Poll);
        q.push(awake.clone()).unwrap();
        assert_eq!(q.pop_sendable(&states).unwrap().id, awake.id);
        assert!(q.pop_sendable(&states).is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut q = TransactionQueue::new(1);
        q.push(tx(2, MessagePriority::Poll)).unwrap();
        assert_eq!(q.push(tx(2, MessagePriority::Poll)), Err(QueueFull(1)));
    }

    #[test]
    fn cancel_for_node_only_removes_that_node() {
        let mut q = TransactionQueue::new(8);
        q.push(tx(2, MessagePriority::Poll)).unwrap();
        q.push(tx(2, MessagePriority::NodeQuery)).unwrap();
        let other = tx(3, MessagePriority::Poll);
        q.push(other.clone()).unwrap();

        let removed = q.cancel_for_node(NodeId(2));
        assert_eq!(removed.len(), 2);
        assert_eq!(q.len(), 1);
        assert!(q.cancel(&other.id).is_some());
        assert!(q.is_empty());
    }
}
