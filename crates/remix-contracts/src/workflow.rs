use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    GateLocked,
    Idle,
    LoadingChannel,
    Selecting,
    ProcessingReferences,
    Generating,
    Complete,
}

impl WorkflowState {
    /// Forward edges of the session state machine. `Selecting` doubles as the
    /// landing state after a failed encode or generation, and every state past
    /// the gate may be reset to `Idle`.
    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        matches!(
            (self, next),
            (GateLocked, Idle)
                | (Idle, LoadingChannel)
                | (LoadingChannel, Selecting)
                | (LoadingChannel, Idle)
                | (Selecting, ProcessingReferences)
                | (Selecting, Idle)
                | (ProcessingReferences, Generating)
                | (ProcessingReferences, Selecting)
                | (ProcessingReferences, Idle)
                | (Generating, Complete)
                | (Generating, Selecting)
                | (Generating, Idle)
                | (Complete, Selecting)
                | (Complete, Idle)
        )
    }

    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::LoadingChannel | Self::ProcessingReferences | Self::Generating
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GateLocked => "gate_locked",
            Self::Idle => "idle",
            Self::LoadingChannel => "loading_channel",
            Self::Selecting => "selecting",
            Self::ProcessingReferences => "processing_references",
            Self::Generating => "generating",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
