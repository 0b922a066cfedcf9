//! Readiness: the one-way "ready for application use" latch.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    #[default]
    NotReady,
    /// Restored from cache; ready as soon as the node is not believed dead.
    ReadyIfNotDead,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessInput {
    NotDead,
    MaybeDead,
    InterviewDone,
    RestartFromCache,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessMachine {
    state: Readiness,
    maybe_dead: bool,
}

impl ReadinessMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Readiness {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == Readiness::Ready
    }

    /// Apply `input`. Returns `true` exactly when this input latched `Ready`.
    pub fn apply(&mut self, input: ReadinessInput) -> bool {
        match input {
            ReadinessInput::NotDead => self.maybe_dead = false,
            ReadinessInput::MaybeDead => self.maybe_dead = true,
            _ => {}
        }

        let next = match (self.state, input) {
            (Readiness::Ready, _) => return false,
            (_, ReadinessInput::InterviewDone) => Readiness::Ready,
            (Readiness::NotReady, ReadinessInput::RestartFromCache) => Readiness::ReadyIfNotDead,
            (state, _) => state,
        };
        let next = if next == Readiness::ReadyIfNotDead && !self.maybe_dead {
            Readiness::Ready
        } else {
            next
        };

        self.state = next;
        next == Readiness::Ready
    }

    /// Start a new readiness lifetime, e.g. for a re-interview.
    pub fn reset(&mut self) {
        self.state = Readiness::NotReady;
    }
}
