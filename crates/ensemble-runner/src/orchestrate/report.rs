use super::state::RunState;
use anyhow::Result;
use ensemble_ledger::AnalysisId;
use ensemble_pipeline::Operation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Outcome for one manifest member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MemberStatus {
    /// Artifact produced.
    Succeeded {
        /// Recorded output handle.
        output: String,
    },
    /// Pipeline failed for this member; the run continued.
    Failed {
        /// Engine failure message.
        reason: String,
    },
}

/// Per-member entry of a [`RunReport`], in manifest order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberOutcome {
    /// Manifest handle of the member.
    pub handle: String,
    /// What happened.
    pub status: MemberStatus,
}

/// Final account of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Experiment the run targeted.
    pub experiment: String,
    /// Analysis name requested.
    pub analysis_name: String,
    /// Operation applied.
    pub operation: Operation,
    /// Terminal state.
    pub state: RunState,
    /// Committed analysis, when the run completed.
    pub analysis: Option<AnalysisId>,
    /// Number of members in the manifest.
    pub manifest_len: usize,
    /// Attempted members, in manifest order.
    pub members: Vec<MemberOutcome>,
    /// Resolution, commit, or cancellation failure message.
    pub error: Option<String>,
}

impl RunReport {
    /// Whether the analysis was committed.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Handles of members that produced an artifact.
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.members.iter().filter_map(|m| match m.status {
            MemberStatus::Succeeded { .. } => Some(m.handle.as_str()),
            MemberStatus::Failed { .. } => None,
        })
    }

    /// Handles of members the pipeline failed on.
    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.members.iter().filter_map(|m| match m.status {
            MemberStatus::Failed { .. } => Some(m.handle.as_str()),
            MemberStatus::Succeeded { .. } => None,
        })
    }

    /// Persist report to JSON file.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Load report from JSON file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Analysis '{}' on experiment '{}': {}",
            self.analysis_name, self.experiment, self.operation
        )?;
        writeln!(
            f,
            "  Members: {} in manifest, {} attempted",
            self.manifest_len,
            self.members.len()
        )?;
        for member in &self.members {
            match &member.status {
                MemberStatus::Succeeded { output } => {
                    writeln!(f, "  ok      {} -> {}", member.handle, output)?
                }
                MemberStatus::Failed { reason } => {
                    writeln!(f, "  FAILED  {}: {}", member.handle, reason)?
                }
            }
        }
        match (&self.analysis, &self.error) {
            (Some(id), _) => write!(f, "  Result: {} (analysis {})", self.state, id),
            (None, Some(error)) => write!(f, "  Result: {} ({})", self.state, error),
            (None, None) => write!(f, "  Result: {}", self.state),
        }
    }
}
