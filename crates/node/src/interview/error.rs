use zw_domain::{CommandClass, InterviewStage};
use zw_protocol::TransmissionError;

/// Facts about the node or the driver that retrying cannot change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    #[error("dependency cycle among CCs on endpoint {endpoint}: {}", format_ccs(.cycle))]
    DependencyCycle {
        endpoint: u8,
        cycle: Vec<CommandClass>,
    },

    #[error("{cc} is not implemented (endpoint {endpoint})")]
    CcNotImplemented { endpoint: u8, cc: CommandClass },

    #[error("endpoint {endpoint} is out of range")]
    EndpointOutOfRange { endpoint: u8 },
}

impl StructuralError {
    pub fn endpoint(&self) -> u8 {
        match self {
            Self::DependencyCycle { endpoint, .. }
            | Self::CcNotImplemented { endpoint, .. }
            | Self::EndpointOutOfRange { endpoint } => *endpoint,
        }
    }
}

fn format_ccs(ccs: &[CommandClass]) -> String {
    ccs.iter()
        .map(|cc| cc.key())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, thiserror::Error)]
pub enum InterviewError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// Only returned by single-CC interviews; a full pass turns these into
    /// [`InterviewOutcome::Incomplete`].
    #[error("transmission failed: {0}")]
    Transmission(#[from] TransmissionError),

    #[error(transparent)]
    Store(#[from] zw_domain::Error),
}

impl InterviewError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transmission(_))
    }
}

/// How a full interview pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewOutcome {
    Complete,
    /// A transmission failed; the node stays at `stage` until the next pass.
    Incomplete {
        stage: InterviewStage,
        error: TransmissionError,
    },
}

impl InterviewOutcome {
    pub fn is_complete(self) -> bool {
        self == Self::Complete
    }
}
