// CLI Interface
//
// Command-line front ends for analysis runs and ledger inspection.

use crate::config::RunnerConfig;
use crate::orchestrate::{CancelFlag, Orchestrator, RunContext, RunReport, RunRequest};
use anyhow::{Context, Result as AnyhowResult};
use clap::{error::ErrorKind, Args, Parser, Subcommand};
use ensemble_ledger::{
    add_members, register_experiment, AnalysisId, MemberFilter, MetadataBrowser, NewMember, Store,
};
use ensemble_pipeline::{list_scripts, Operation, ParameterSet};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Member selection options
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only members of this forecast model
    #[arg(long = "model")]
    pub model: Option<String>,

    /// Only members with this perturbation
    #[arg(long = "perturbation")]
    pub perturbation: Option<String>,

    /// Only members with this initialization time
    #[arg(long = "init-time")]
    pub initialization_time: Option<i64>,

    /// Only members with this forecast hour
    #[arg(long = "forecast-hour")]
    pub forecast_hour: Option<i64>,
}

impl FilterArgs {
    /// Ledger filter for these options
    pub fn to_filter(&self) -> MemberFilter {
        MemberFilter {
            model: self.model.clone(),
            perturbation: self.perturbation.clone(),
            initialization_time: self.initialization_time,
            forecast_hour: self.forecast_hour,
        }
    }
}

/// Options shared by every analysis tool
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Member selection
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Name recorded for the analysis
    #[arg(long = "name", short = 'n')]
    pub name: Option<String>,

    /// Description recorded for the analysis
    #[arg(long = "description", short = 'd')]
    pub description: Option<String>,

    /// Configuration file (default: ensemble.toml next to the database)
    #[arg(long = "config", short = 'c')]
    pub config: Option<PathBuf>,

    /// Resolve member files against this directory instead of the database's
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Write the run report as JSON to this path
    #[arg(long = "report")]
    pub report: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,
}

/// Contour every member of an experiment and record the analysis
#[derive(Parser, Debug)]
#[command(name = "ensemble-contour")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract an isosurface from every ensemble member and record the analysis", long_about = None)]
#[command(allow_negative_numbers = true)]
pub struct ContourCli {
    /// Path to the ensemble database
    #[arg(value_name = "DB")]
    pub db: PathBuf,

    /// Experiment to analyze
    #[arg(value_name = "EXPERIMENT")]
    pub experiment: String,

    /// Isovalue to contour at
    #[arg(value_name = "CONTOUR_VALUE")]
    pub contour_value: String,

    /// Run options
    #[command(flatten)]
    pub run: RunArgs,
}

impl ContourCli {
    /// Raw operation parameters
    pub fn parameters(&self) -> ParameterSet {
        ParameterSet::new().with("contour_value", &self.contour_value)
    }

    /// Run the analysis and map the outcome to a process exit code
    pub async fn run(self) -> ExitCode {
        init_logging_impl(self.run.verbose);
        let params = self.parameters();
        finish(run_analysis(self.db, self.experiment, "contour", params, self.run).await)
    }
}

/// Extract the same sub-volume from every member of an experiment
#[derive(Parser, Debug)]
#[command(name = "ensemble-subset")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract a sub-volume from every ensemble member and record the analysis", long_about = None)]
#[command(allow_negative_numbers = true)]
pub struct SubsetCli {
    /// Path to the ensemble database
    #[arg(value_name = "DB")]
    pub db: PathBuf,

    /// Experiment to analyze
    #[arg(value_name = "EXPERIMENT")]
    pub experiment: String,

    /// Upper x extent
    #[arg(value_name = "X")]
    pub x: String,

    /// Upper y extent
    #[arg(value_name = "Y")]
    pub y: String,

    /// Upper z extent
    #[arg(value_name = "Z")]
    pub z: String,

    /// Run options
    #[command(flatten)]
    pub run: RunArgs,
}

impl SubsetCli {
    /// Raw operation parameters
    pub fn parameters(&self) -> ParameterSet {
        ParameterSet::new()
            .with("x", &self.x)
            .with("y", &self.y)
            .with("z", &self.z)
    }

    /// Run the analysis and map the outcome to a process exit code
    pub async fn run(self) -> ExitCode {
        init_logging_impl(self.run.verbose);
        let params = self.parameters();
        finish(run_analysis(self.db, self.experiment, "subset", params, self.run).await)
    }
}

/// Inspect and provision an ensemble database
#[derive(Parser, Debug)]
#[command(name = "ensemble-browse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and provision ensemble experiments and analyses", long_about = None)]
pub struct BrowseCli {
    /// Path to the ensemble database
    #[arg(value_name = "DB")]
    pub db: PathBuf,

    /// Configuration file (default: ensemble.toml next to the database)
    #[arg(global = true, long = "config", short = 'c')]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(global = true, long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: BrowseCommand,
}

/// Available browse commands
#[derive(Subcommand, Debug)]
pub enum BrowseCommand {
    /// Create the database and its schema
    Init,

    /// Register a new experiment
    AddExperiment {
        /// Unique experiment name
        #[arg(value_name = "NAME")]
        name: String,

        /// Free-form description
        #[arg(long = "description")]
        description: Option<String>,
    },

    /// Append members to an experiment
    AddMember {
        /// Experiment name
        #[arg(value_name = "EXPERIMENT")]
        experiment: String,

        /// Member file locators, relative to the database directory
        #[arg(value_name = "HANDLE", required = true)]
        handles: Vec<String>,

        /// Forecast model
        #[arg(long = "model")]
        model: Option<String>,

        /// Perturbation identifier
        #[arg(long = "perturbation")]
        perturbation: Option<String>,

        /// Initialization time (hour of day)
        #[arg(long = "init-time")]
        initialization_time: Option<i64>,

        /// Forecast hour
        #[arg(long = "forecast-hour")]
        forecast_hour: Option<i64>,
    },

    /// List experiments
    Experiments,

    /// Show the member manifest of an experiment
    Manifest {
        /// Experiment name
        #[arg(value_name = "EXPERIMENT")]
        experiment: String,

        /// Member selection
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// List analyses recorded for an experiment
    Analyses {
        /// Experiment name
        #[arg(value_name = "EXPERIMENT")]
        experiment: String,
    },

    /// Show the result rows of an analysis
    Results {
        /// Analysis id
        #[arg(value_name = "ANALYSIS")]
        analysis: i64,
    },

    /// List available pipeline scripts
    Scripts {
        /// Script directory (default: configured script_dir)
        #[arg(long = "dir")]
        dir: Option<PathBuf>,

        /// Only list files with this extension; empty lists everything
        #[arg(long = "extension", default_value = "py")]
        extension: String,
    },
}

impl BrowseCli {
    /// Run the command and map the outcome to a process exit code
    pub fn run(self) -> ExitCode {
        init_logging_impl(self.verbose);
        let stdout = std::io::stdout();
        match self.execute(&mut stdout.lock()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(1)
            }
        }
    }

    /// Execute the command, writing its listing to `out`
    pub fn execute<W: Write>(&self, out: &mut W) -> AnyhowResult<()> {
        let config = RunnerConfig::resolve(self.config.as_deref(), &self.db)?.with_env_overrides();

        match &self.command {
            BrowseCommand::Init => {
                Store::create(&self.db, config.store.clone())
                    .with_context(|| format!("Failed to create database: {}", self.db.display()))?;
                writeln!(out, "Initialized ensemble database at {}", self.db.display())?;
            }
            BrowseCommand::Scripts { dir, extension } => {
                let dir = dir.clone().unwrap_or_else(|| config.pipeline.script_dir.clone());
                let extension = Some(extension.as_str()).filter(|e| !e.is_empty());
                let scripts = list_scripts(&dir, extension)
                    .with_context(|| format!("Failed to list scripts in {}", dir.display()))?;
                for script in scripts {
                    writeln!(out, "{}", script.display())?;
                }
            }
            command => {
                let mut store = Store::connect(&self.db, config.store.clone())
                    .with_context(|| format!("Failed to open database: {}", self.db.display()))?;
                execute_on_store(command, &mut store, out)?;
            }
        }
        Ok(())
    }
}

fn execute_on_store<W: Write>(
    command: &BrowseCommand,
    store: &mut Store,
    out: &mut W,
) -> AnyhowResult<()> {
    match command {
        BrowseCommand::AddExperiment { name, description } => {
            let id = register_experiment(store, name, description.as_deref())
                .with_context(|| format!("Failed to register experiment '{}'", name))?;
            writeln!(out, "Registered experiment '{}' (id {})", name, id)?;
        }
        BrowseCommand::AddMember {
            experiment,
            handles,
            model,
            perturbation,
            initialization_time,
            forecast_hour,
        } => {
            let id = MetadataBrowser::new(store).experiment(experiment)?.id;
            let members: Vec<_> = handles
                .iter()
                .map(|handle| NewMember {
                    handle: handle.clone(),
                    model: model.clone(),
                    perturbation: perturbation.clone(),
                    initialization_time: *initialization_time,
                    forecast_hour: *forecast_hour,
                })
                .collect();
            let ids = add_members(store, id, &members)
                .with_context(|| format!("Failed to add members to '{}'", experiment))?;
            writeln!(out, "Added {} member(s) to '{}'", ids.len(), experiment)?;
        }
        BrowseCommand::Experiments => {
            for experiment in MetadataBrowser::new(store).list_experiments()? {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    experiment.id,
                    experiment.name,
                    experiment.description.unwrap_or_default()
                )?;
            }
        }
        BrowseCommand::Manifest { experiment, filter } => {
            let browser = MetadataBrowser::new(store);
            for member in browser.get_manifest_filtered(experiment, &filter.to_filter())? {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}",
                    member.position,
                    member.handle,
                    member.model.unwrap_or_default(),
                    member.perturbation.unwrap_or_default()
                )?;
            }
        }
        BrowseCommand::Analyses { experiment } => {
            for analysis in MetadataBrowser::new(store).get_analyses(experiment)? {
                writeln!(
                    out,
                    "{}\t{}\t{}({})\t{} row(s)",
                    analysis.id,
                    analysis.name,
                    analysis.operation,
                    analysis.parameters,
                    analysis.result_count
                )?;
            }
        }
        BrowseCommand::Results { analysis } => {
            for row in MetadataBrowser::new(store).get_results(AnalysisId(*analysis))? {
                let metrics: Vec<_> = row
                    .metrics
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value))
                    .collect();
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    row.input_handle,
                    row.output_handle,
                    metrics.join(" ")
                )?;
            }
        }
        BrowseCommand::Init | BrowseCommand::Scripts { .. } => {}
    }
    Ok(())
}

/// Validate parameters, then run one analysis to a terminal state.
///
/// Returns an error for invalid parameters, configuration problems, or an
/// unreachable database; every other outcome is described by the report.
pub async fn run_analysis(
    db: PathBuf,
    experiment: String,
    operation: &str,
    params: ParameterSet,
    args: RunArgs,
) -> AnyhowResult<RunReport> {
    let operation =
        Operation::from_parameters(operation, &params).context("Invalid analysis parameters")?;
    let config = RunnerConfig::resolve(args.config.as_deref(), &db)?.with_env_overrides();

    let name = config.analysis_name(args.name.as_deref(), &operation);
    let mut request =
        RunRequest::new(experiment, name, operation).with_filter(args.filter.to_filter());
    request.description = args
        .description
        .clone()
        .or_else(|| config.analysis.description.clone());

    let cancel = CancelFlag::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Received interrupt; stopping after the current member");
                cancel.cancel();
            }
        })
    };

    let mut context = RunContext::with_cancel(cancel);
    context.data_dir = args.data_dir.clone();

    info!("Running {} on experiment '{}'", request.operation, request.experiment);

    let outcome = tokio::task::spawn_blocking(move || -> AnyhowResult<RunReport> {
        let mut store = Store::connect(&db, config.store.clone())
            .with_context(|| format!("Failed to open database: {}", db.display()))?;
        let mut browser = MetadataBrowser::new(&mut store);
        let mut orchestrator = Orchestrator::new(config.engine());
        Ok(orchestrator.run(&mut browser, &context, &request))
    })
    .await;
    watcher.abort();

    let report = outcome.context("Analysis task failed")??;

    if let Some(path) = &args.report {
        report
            .save_to_path(path)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
    }

    Ok(report)
}

fn finish(outcome: AnyhowResult<RunReport>) -> ExitCode {
    match outcome {
        Ok(report) => {
            println!("{}", report);
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Parse arguments, exiting with 0 for help/version and 1 for usage errors
pub fn parse_or_exit<C: Parser>() -> C {
    match C::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}

/// Initialize logging implementation
fn init_logging_impl(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
