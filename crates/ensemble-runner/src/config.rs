// Runner Configuration
//
// *La Configuration* (The Configuration) - Store, pipeline, and analysis settings

use anyhow::{Context, Result};
use ensemble_ledger::StoreConfig;
use ensemble_pipeline::{Operation, ScriptEngine, ScriptSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration file looked up next to the database
pub const DEFAULT_CONFIG_FILE: &str = "ensemble.toml";

/// Overrides `[pipeline] interpreter`
pub const INTERPRETER_ENV: &str = "ENSEMBLE_INTERPRETER";

/// Overrides `[pipeline] script_dir`
pub const SCRIPT_DIR_ENV: &str = "ENSEMBLE_SCRIPT_DIR";

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunnerConfig {
    /// Store connection settings
    pub store: StoreConfig,

    /// Pipeline script settings
    pub pipeline: PipelineConfig,

    /// Analysis naming defaults
    pub analysis: AnalysisConfig,
}

/// Pipeline script settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Interpreter the scripts run under; empty runs scripts directly
    pub interpreter: String,

    /// Directory holding the pipeline scripts
    pub script_dir: PathBuf,

    /// Contour script, relative to `script_dir` unless absolute
    pub contour_script: PathBuf,

    /// Subset script, relative to `script_dir` unless absolute
    pub subset_script: PathBuf,

    /// Directory receiving artifacts; unset writes each next to its input
    pub results_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interpreter: "pvpython".to_string(),
            script_dir: PathBuf::from("python"),
            contour_script: PathBuf::from("contour.py"),
            subset_script: PathBuf::from("subset.py"),
            results_dir: None,
        }
    }
}

/// Analysis naming defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Name used when none is given on the command line
    pub default_name: Option<String>,

    /// Description used when none is given on the command line
    pub description: Option<String>,
}

impl RunnerConfig {
    /// Load configuration from an explicit file, which must exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Resolve configuration for a database.
    ///
    /// An explicit path wins; otherwise `ensemble.toml` next to the
    /// database is used if present, else the defaults.
    pub fn resolve(explicit: Option<&Path>, db_locator: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidate = db_locator
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_CONFIG_FILE);

        if candidate.is_file() {
            debug!(path = %candidate.display(), "using config next to database");
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interpreter) = lookup(INTERPRETER_ENV) {
            self.pipeline.interpreter = interpreter;
        }
        if let Some(dir) = lookup(SCRIPT_DIR_ENV) {
            self.pipeline.script_dir = PathBuf::from(dir);
        }
        self
    }

    /// Scripts with `script_dir` applied
    pub fn script_set(&self) -> ScriptSet {
        let dir = &self.pipeline.script_dir;
        ScriptSet {
            contour: dir.join(&self.pipeline.contour_script),
            subset: dir.join(&self.pipeline.subset_script),
        }
    }

    /// Pipeline engine described by this configuration
    pub fn engine(&self) -> ScriptEngine {
        let interpreter = self.pipeline.interpreter.trim();
        let interpreter = (!interpreter.is_empty()).then(|| PathBuf::from(interpreter));
        let engine = ScriptEngine::new(interpreter, self.script_set());
        match &self.pipeline.results_dir {
            Some(dir) => engine.with_results_dir(dir),
            None => engine,
        }
    }

    /// Analysis name for a run: explicit, configured, or `test_<operation>`
    pub fn analysis_name(&self, explicit: Option<&str>, operation: &Operation) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| self.analysis.default_name.clone())
            .unwrap_or_else(|| format!("test_{}", operation.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.pipeline.interpreter, "pvpython");
        assert!(!config.store.wal_enabled);
        assert_eq!(
            config.script_set().contour,
            PathBuf::from("python/contour.py")
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: RunnerConfig = toml::from_str(
            r#"
            [pipeline]
            interpreter = ""
            script_dir = "/opt/pipelines"

            [store]
            busy_timeout_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.store.busy_timeout_ms, 100);
        assert_eq!(config.pipeline.subset_script, PathBuf::from("subset.py"));
        assert_eq!(config.script_set().subset, PathBuf::from("/opt/pipelines/subset.py"));
        assert!(config.engine().interpreter().is_none());
    }

    #[test]
    fn test_resolve_prefers_file_next_to_database() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("ensemble.db");
        fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[analysis]\ndefault_name = \"nightly\"\n",
        )
        .unwrap();

        let config = RunnerConfig::resolve(None, &db).unwrap();
        let op = Operation::Contour { contour_value: 1.0 };
        assert_eq!(config.analysis_name(None, &op), "nightly");
        assert_eq!(config.analysis_name(Some("adhoc"), &op), "adhoc");
    }

    #[test]
    fn test_resolve_without_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = RunnerConfig::resolve(None, &dir.path().join("ensemble.db")).unwrap();
        let op = Operation::Subset { x: 1, y: 1, z: 1 };
        assert_eq!(config.analysis_name(None, &op), "test_subset");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(RunnerConfig::resolve(Some(&missing), Path::new("ensemble.db")).is_err());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[store\nwal_enabled = maybe").unwrap();
        let err = RunnerConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));
    }

    #[test]
    fn test_results_dir_reaches_engine() {
        let config: RunnerConfig =
            toml::from_str("[pipeline]\nresults_dir = \"/scratch/results\"\n").unwrap();
        let op = Operation::Contour { contour_value: 1.0 };
        assert_eq!(
            config.engine().output_path(Path::new("data/a.vti"), &op),
            PathBuf::from("/scratch/results/a_contours.vtk")
        );
        assert_eq!(
            RunnerConfig::default()
                .engine()
                .output_path(Path::new("data/a.vti"), &op),
            PathBuf::from("data/a_contours.vtk")
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = RunnerConfig::default().with_overrides_from(|key| match key {
            INTERPRETER_ENV => Some("python3".to_string()),
            SCRIPT_DIR_ENV => Some("/srv/scripts".to_string()),
            _ => None,
        });
        assert_eq!(config.engine().interpreter(), Some(Path::new("python3")));
        assert_eq!(
            config.script_set().contour,
            PathBuf::from("/srv/scripts/contour.py")
        );
    }
}
