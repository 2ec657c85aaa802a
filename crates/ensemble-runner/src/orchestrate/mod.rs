//! Orchestration of one analysis run over an experiment's manifest.

/// Run-time settings and cancellation.
pub mod context;
/// Manifest-driven orchestration engine.
pub mod engine;
/// Run request model.
pub mod model;
/// Run outcome reporting.
pub mod report;
/// Run lifecycle state.
pub mod state;

pub use context::{CancelFlag, RunContext};
pub use engine::Orchestrator;
pub use model::RunRequest;
pub use report::{MemberOutcome, MemberStatus, RunReport};
pub use state::RunState;
