use serde::Serialize;
use tokio::sync::broadcast;

use zw_domain::{InterviewStage, NodeId, NodeStatus, TraceEvent};

/// Events delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    StatusChanged {
        node_id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    },
    Ready {
        node_id: NodeId,
        from_cache: bool,
    },
    InterviewStageCompleted {
        node_id: NodeId,
        stage: InterviewStage,
    },
    InterviewCompleted {
        node_id: NodeId,
    },
    /// `fatal` marks structural failures that retrying cannot fix.
    InterviewFailed {
        node_id: NodeId,
        reason: String,
        fatal: bool,
    },
}

impl NodeEvent {
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::StatusChanged { node_id, .. }
            | Self::Ready { node_id, .. }
            | Self::InterviewStageCompleted { node_id, .. }
            | Self::InterviewCompleted { node_id }
            | Self::InterviewFailed { node_id, .. } => *node_id,
        }
    }
}

/// Fan-out of node events. Sending without subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }

    /// Publishes the event and mirrors it as a trace event.
    pub fn publish(&self, event: NodeEvent) {
        if let Some(trace) = trace_for(&event) {
            trace.emit();
        }
        let _ = self.tx.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = NodeEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

fn trace_for(event: &NodeEvent) -> Option<TraceEvent> {
    match event {
        NodeEvent::StatusChanged { node_id, from, to } => Some(TraceEvent::NodeStatusChanged {
            node_id: *node_id,
            from: *from,
            to: *to,
        }),
        NodeEvent::Ready {
            node_id,
            from_cache,
        } => Some(TraceEvent::NodeReady {
            node_id: *node_id,
            from_cache: *from_cache,
        }),
        NodeEvent::InterviewStageCompleted { node_id, stage } => {
            Some(TraceEvent::InterviewStageCompleted {
                node_id: *node_id,
                stage: *stage,
            })
        }
        // The interviewer emits richer traces for these itself.
        NodeEvent::InterviewCompleted { .. } | NodeEvent::InterviewFailed { .. } => None,
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
