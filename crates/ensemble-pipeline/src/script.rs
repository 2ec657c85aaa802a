// Script-driven pipeline engine
//
// Runs one external pipeline script per input, e.g.
// `pvpython contour.py <input> <contour value> <output>`.

use crate::engine::{Artifact, PipelineEngine};
use crate::naming::derive_output_path;
use crate::params::Operation;
use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Prefix of stdout lines carrying derived metrics (`metric: mean=12.5`)
const METRIC_PREFIX: &str = "metric:";

/// Scripts implementing each operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSet {
    /// Script run for [`Operation::Contour`]
    pub contour: PathBuf,
    /// Script run for [`Operation::Subset`]
    pub subset: PathBuf,
}

impl ScriptSet {
    fn script_for(&self, operation: &Operation) -> &Path {
        match operation {
            Operation::Contour { .. } => &self.contour,
            Operation::Subset { .. } => &self.subset,
        }
    }
}

/// Engine that shells out to a pipeline script per input
#[derive(Debug, Clone)]
pub struct ScriptEngine {
    interpreter: Option<PathBuf>,
    scripts: ScriptSet,
    results_dir: Option<PathBuf>,
}

impl ScriptEngine {
    /// Create an engine. With no interpreter the script is executed directly.
    pub fn new(interpreter: Option<PathBuf>, scripts: ScriptSet) -> Self {
        Self {
            interpreter,
            scripts,
            results_dir: None,
        }
    }

    /// Write artifacts into `dir` instead of next to each input
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    /// Where an input's artifact is written
    pub fn output_path(&self, input: &Path, operation: &Operation) -> PathBuf {
        let beside_input = derive_output_path(input, operation);
        match (&self.results_dir, beside_input.file_name()) {
            (Some(dir), Some(name)) => dir.join(name),
            _ => beside_input,
        }
    }

    /// The configured interpreter, if any
    pub fn interpreter(&self) -> Option<&Path> {
        self.interpreter.as_deref()
    }

    fn command(&self, script: &Path) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(script);
                command
            }
            None => Command::new(script),
        }
    }
}

impl PipelineEngine for ScriptEngine {
    fn process(&self, input: &Path, operation: &Operation) -> Result<Artifact> {
        let input_str = input.display().to_string();
        let fail = |reason: String| PipelineError::processing(input_str.clone(), reason);

        File::open(input).map_err(|e| fail(format!("input is not readable: {}", e)))?;

        let output = self.output_path(input, operation);
        let script = self.scripts.script_for(operation);

        if let Some(dir) = &self.results_dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| fail(format!("cannot create results directory: {}", e)))?;
        }
        // A leftover artifact must not pass for this run's output.
        match std::fs::remove_file(&output) {
            Ok(()) => debug!(output = %output.display(), "removed previous artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(fail(format!("cannot replace previous artifact: {}", e))),
        }

        let mut command = self.command(script);
        command
            .arg(input)
            .args(operation.script_args())
            .arg(&output);
        debug!(?command, "invoking pipeline");

        let result = command.output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                fail(format!(
                    "pipeline executable not found: {}",
                    self.interpreter.as_deref().unwrap_or(script).display()
                ))
            } else {
                fail(format!("could not start pipeline: {}", e))
            }
        })?;

        let stdout = String::from_utf8_lossy(&result.stdout);
        let stderr = String::from_utf8_lossy(&result.stderr);
        for line in stdout.lines() {
            debug!(input = %input_str, "pipeline: {}", line);
        }

        if !result.status.success() {
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no diagnostic output");
            return Err(fail(format!("pipeline exited with {}: {}", result.status, detail)));
        }

        if !output.exists() {
            return Err(fail(format!(
                "pipeline succeeded but wrote no artifact at {}",
                output.display()
            )));
        }

        info!(input = %input_str, output = %output.display(), "artifact written");

        Ok(Artifact {
            output,
            metrics: parse_metrics(&stdout),
        })
    }
}

fn parse_metrics(stdout: &str) -> BTreeMap<String, f64> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(METRIC_PREFIX))
        .filter_map(|rest| {
            let (name, value) = rest.split_once('=')?;
            let value: f64 = value.trim().parse().ok()?;
            value
                .is_finite()
                .then(|| (name.trim().to_string(), value))
        })
        .collect()
}

/// List pipeline scripts in `dir`, optionally restricted to one extension.
///
/// Entries are sorted by file name; directories are skipped.
pub fn list_scripts(dir: &Path, extension: Option<&str>) -> std::io::Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = match extension {
            Some(ext) => path
                .extension()
                .map(|e| e.to_string_lossy() == ext.trim_start_matches('.'))
                .unwrap_or(false),
            None => true,
        };
        if matches {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}
