//! ensemble-ledger - Experiment Metadata Ledger
//!
//! *Le Registre* (The Ledger) - SQLite-backed experiment manifests and analysis records

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Experiment-scoped read/write façade over the store.
pub mod browser;
/// Schema provisioning and member ingestion helpers.
pub mod provision;
/// Typed experiment, member, and analysis records.
pub mod records;
/// Database schema and connection management.
pub mod schema;

pub use browser::{BrowserError, MetadataBrowser};
pub use provision::{add_members, register_experiment};
pub use records::{
    AnalysisId, AnalysisSummary, Experiment, ExperimentId, MemberFilter, MemberId, MemberRow,
    NewAnalysis, NewMember, ResultRow, ResultTable,
};
pub use schema::{Store, StoreConfig, StoreError};

/// Ledger library initialization
pub fn init() {
    let _ = tracing::subscriber::set_default(tracing::subscriber::NoSubscriber::default());
}
