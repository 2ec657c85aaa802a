//! ensemble-runner - Ensemble Analysis Orchestrator
//!
//! *Le Chef d'Orchestre* (The Conductor) - Runs a pipeline over every member of an experiment and records the analysis

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Command-line front ends.
pub mod cli;
/// Runner configuration.
pub mod config;
/// Analysis run orchestration.
pub mod orchestrate;

pub use config::RunnerConfig;
pub use orchestrate::{
    CancelFlag, MemberOutcome, MemberStatus, Orchestrator, RunContext, RunReport, RunRequest,
    RunState,
};
