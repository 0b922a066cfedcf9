use async_trait::async_trait;

use zw_domain::NodeId;
use zw_protocol::{Response, TransmissionError};

use crate::transaction::{Transaction, TargetState};

/// Something that can carry one transaction to its target and report the
/// final outcome. Retries below this boundary are the link's business.
#[async_trait]
pub trait Link: Send + Sync {
    async fn transmit(&self, tx: &Transaction) -> Result<Response, TransmissionError>;
}

/// Read-only view of the node table used to order transactions.
pub trait TargetStateSource: Send + Sync {
    fn target_state(&self, node: NodeId) -> TargetState;
}

/// Every target is awake and listening.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeListening;

impl TargetStateSource for AssumeListening {
    fn target_state(&self, _node: NodeId) -> TargetState {
        TargetState {
            asleep: false,
            listening: true,
        }
    }
}

/// Receives the final outcome of every transaction addressed to a node.
pub trait OutcomeSink: Send + Sync {
    fn transaction_outcome(&self, node: NodeId, outcome: Result<(), TransmissionError>);
}
