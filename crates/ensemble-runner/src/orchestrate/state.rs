use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one analysis run.
///
/// ```text
/// Pending -> Resolving -> Processing -> Committing -> Completed
///                |             |             \-> Failed
///                \-> Aborted   \-> Cancelled
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Run has not started.
    #[default]
    Pending,
    /// Loading the experiment manifest.
    Resolving,
    /// Running the pipeline over manifest members.
    Processing,
    /// Writing the analysis to the ledger.
    Committing,
    /// Analysis committed.
    Completed,
    /// Commit rejected; artifacts on disk are kept.
    Failed,
    /// Experiment could not be resolved; nothing was processed.
    Aborted,
    /// Stopped between members on request; nothing was committed.
    Cancelled,
}

impl RunState {
    /// Whether the run has finished.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Aborted | RunState::Cancelled
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, Processing)
                | (Resolving, Aborted)
                | (Processing, Committing)
                | (Processing, Cancelled)
                | (Committing, Completed)
                | (Committing, Failed)
        )
    }

    /// Lowercase state name.
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Resolving => "resolving",
            RunState::Processing => "processing",
            RunState::Committing => "committing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Aborted => "aborted",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
