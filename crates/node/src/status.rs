//! Reachability state machine.
//!
//! Inputs are guarded by the current state and by whether the node can
//! sleep. A rejected input is a silent no-op: callers emit them speculatively.

use zw_domain::NodeStatus;
use zw_protocol::TransmissionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusInput {
    MarkDead,
    MarkAlive,
    MarkAsleep,
    MarkAwake,
}

impl StatusInput {
    pub const ALL: [Self; 4] = [Self::MarkDead, Self::MarkAlive, Self::MarkAsleep, Self::MarkAwake];

    /// Input implied by the final outcome of a transmission to the node.
    /// Channel-level failures say nothing about the node.
    pub fn for_outcome(outcome: Result<(), TransmissionError>, can_sleep: bool) -> Option<Self> {
        match outcome {
            Ok(()) if can_sleep => Some(Self::MarkAwake),
            Ok(()) => Some(Self::MarkAlive),
            Err(e) if !e.implicates_target() => None,
            Err(_) if can_sleep => Some(Self::MarkAsleep),
            Err(_) => Some(Self::MarkDead),
        }
    }
}

/// Next state for `input`, or `None` when the guard rejects it.
pub fn transition(state: NodeStatus, input: StatusInput, can_sleep: bool) -> Option<NodeStatus> {
    use NodeStatus as S;
    use StatusInput as I;

    match (state, input) {
        (S::Unknown, I::MarkDead) if !can_sleep => Some(S::Dead),
        (S::Unknown, I::MarkAlive) if !can_sleep => Some(S::Alive),
        (S::Unknown, I::MarkAsleep) if can_sleep => Some(S::Asleep),
        (S::Unknown, I::MarkAwake) if can_sleep => Some(S::Awake),

        // Escape hatch for nodes that misreport their listening mode.
        (S::Alive, I::MarkDead) => Some(S::Dead),
        (S::Alive, I::MarkAsleep) => Some(S::Asleep),
        (S::Alive, I::MarkAwake) => Some(S::Awake),

        (S::Dead, I::MarkAlive) => Some(S::Alive),
        (S::Asleep, I::MarkAwake) => Some(S::Awake),
        (S::Awake, I::MarkAsleep) => Some(S::Asleep),

        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusMachine {
    state: NodeStatus,
}

impl StatusMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NodeStatus {
        self.state
    }

    /// Apply `input`; returns the new state when accepted.
    pub fn apply(&mut self, input: StatusInput, can_sleep: bool) -> Option<NodeStatus> {
        let next = transition(self.state, input, can_sleep)?;
        self.state = next;
        Some(next)
    }
}
