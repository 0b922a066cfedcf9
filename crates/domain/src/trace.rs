use serde::Serialize;

use crate::command_class::CommandClass;
use crate::node::{InterviewStage, NodeId, NodeStatus};
use crate::security::SecurityClass;

/// Structured trace events emitted across all zwave-host crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    NodeStatusChanged {
        node_id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    },
    NodeReady {
        node_id: NodeId,
        from_cache: bool,
    },
    InterviewStageCompleted {
        node_id: NodeId,
        stage: InterviewStage,
    },
    InterviewIncomplete {
        node_id: NodeId,
        stage: InterviewStage,
        reason: String,
    },
    InterviewFailed {
        node_id: NodeId,
        endpoint: u8,
        reason: String,
    },
    CcInterviewed {
        node_id: NodeId,
        endpoint: u8,
        cc: CommandClass,
        duration_ms: u64,
    },
    SecurityClassesCollapsed {
        node_id: NodeId,
        classes: Vec<SecurityClass>,
    },
    InterviewReset {
        node_id: NodeId,
        previous_stage: InterviewStage,
    },
    TransactionCompleted {
        node_id: Option<NodeId>,
        priority: String,
        success: bool,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "zw_event");
    }
}
