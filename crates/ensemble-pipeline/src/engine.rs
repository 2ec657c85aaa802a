use crate::params::Operation;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Output of one successful pipeline invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Where the artifact was written
    pub output: PathBuf,
    /// Derived metrics reported by the pipeline, if any
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl Artifact {
    /// Artifact with no metrics
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            metrics: BTreeMap::new(),
        }
    }
}

/// Abstraction over the external visualization engine, enabling test doubles.
///
/// Implementations must translate every engine-level failure into
/// [`crate::PipelineError::Processing`] rather than panicking.
pub trait PipelineEngine {
    /// Run `operation` on one input and return the produced artifact.
    fn process(&self, input: &Path, operation: &Operation) -> Result<Artifact>;
}

impl<T: PipelineEngine + ?Sized> PipelineEngine for &T {
    fn process(&self, input: &Path, operation: &Operation) -> Result<Artifact> {
        (**self).process(input, operation)
    }
}

impl<T: PipelineEngine + ?Sized> PipelineEngine for Box<T> {
    fn process(&self, input: &Path, operation: &Operation) -> Result<Artifact> {
        (**self).process(input, operation)
    }
}
