use ensemble_ledger::{MemberFilter, NewAnalysis};
use ensemble_pipeline::Operation;
use serde::{Deserialize, Serialize};

/// One analysis run over an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Experiment whose manifest is processed.
    pub experiment: String,
    /// Name recorded for the committed analysis.
    pub analysis_name: String,
    /// Optional analysis description.
    pub description: Option<String>,
    /// Validated pipeline operation applied to every member.
    pub operation: Operation,
    /// Members to process; empty covers the whole manifest.
    #[serde(default)]
    pub filter: MemberFilter,
}

impl RunRequest {
    /// Create a request without a description.
    pub fn new(
        experiment: impl Into<String>,
        analysis_name: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            analysis_name: analysis_name.into(),
            description: None,
            operation,
            filter: MemberFilter::default(),
        }
    }

    /// Restrict the run to matching members.
    pub fn with_filter(mut self, filter: MemberFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Ledger header for this run.
    pub fn new_analysis(&self) -> NewAnalysis {
        NewAnalysis {
            name: self.analysis_name.clone(),
            description: self.description.clone(),
            operation: self.operation.name().to_string(),
            parameters: self.operation.canonical_parameters(),
        }
    }
}
