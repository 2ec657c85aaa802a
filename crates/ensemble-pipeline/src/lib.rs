//! ensemble-pipeline - Visualization Pipeline Adapter
//!
//! *Le Pipeline* (The Pipeline) - One input file in, one derived artifact out

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Engine trait and produced artifacts.
pub mod engine;
/// Deterministic artifact naming.
pub mod naming;
/// Operations and their named parameters.
pub mod params;
/// External script-driven engine.
pub mod script;

use thiserror::Error;

pub use engine::{Artifact, PipelineEngine};
pub use naming::derive_output_path;
pub use params::{Operation, ParameterSet};
pub use script::{list_scripts, ScriptEngine, ScriptSet};

/// Errors raised at the pipeline boundary
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Analysis parameters are missing, unknown, or malformed
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Offending parameter name
        name: String,
        /// What was wrong with it
        reason: String,
    },

    /// The pipeline failed for one input
    #[error("Processing failed for '{input}': {reason}")]
    Processing {
        /// Input locator that was being processed
        input: String,
        /// Engine-level failure message
        reason: String,
    },
}

impl PipelineError {
    /// Create an invalid-parameter error
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a processing error
    pub fn processing(input: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Processing {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable (the batch may continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Processing { .. })
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline library initialization
pub fn init() {
    let _ = tracing::subscriber::set_default(tracing::subscriber::NoSubscriber::default());
}
