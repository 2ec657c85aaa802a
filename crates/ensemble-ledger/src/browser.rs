//! Experiment metadata browser.
//!
//! Stateless façade over a [`Store`]: every call resolves the experiment
//! by name, and the only write path is [`MetadataBrowser::add_analysis`],
//! which commits the analysis header and its result rows in a single
//! transaction.

use crate::records::{
    AnalysisId, AnalysisSummary, Experiment, MemberFilter, MemberId, MemberRow, NewAnalysis,
    ResultRow, ResultTable,
};
use crate::schema::{Store, StoreError};
use rusqlite::{params, OptionalExtension, Transaction};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by the metadata browser
#[derive(Debug, Error)]
pub enum BrowserError {
    /// No experiment with this name exists
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    /// The analysis could not be committed; nothing was written
    #[error("Commit of analysis '{analysis}' failed: {reason}")]
    Commit {
        /// Name of the analysis being committed
        analysis: String,
        /// Why the commit was rejected
        reason: String,
    },

    /// Underlying store failure on a read path
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrowserError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

/// Result type for browser operations
pub type Result<T> = std::result::Result<T, BrowserError>;

/// Experiment-scoped read/write access to the ledger
pub struct MetadataBrowser<'a> {
    store: &'a mut Store,
}

impl<'a> MetadataBrowser<'a> {
    /// Create a browser over an open store
    pub fn new(store: &'a mut Store) -> Self {
        Self { store }
    }

    /// Directory member handles are resolved against
    pub fn base_dir(&self) -> PathBuf {
        self.store.base_dir()
    }

    /// List all experiments ordered by id
    pub fn list_experiments(&self) -> Result<Vec<Experiment>> {
        Ok(self.store.query(
            "SELECT experimentid, name, description FROM experiments ORDER BY experimentid",
            [],
            Experiment::from_row,
        )?)
    }

    /// Resolve an experiment by name
    pub fn experiment(&self, name: &str) -> Result<Experiment> {
        self.store
            .conn()
            .query_row(
                "SELECT experimentid, name, description FROM experiments WHERE name = ?1",
                params![name],
                Experiment::from_row,
            )
            .optional()
            .map_err(StoreError::from)?
            .ok_or_else(|| BrowserError::UnknownExperiment(name.to_string()))
    }

    /// Member manifest of an experiment, in ingestion order
    pub fn get_manifest(&self, experiment_name: &str) -> Result<Vec<MemberRow>> {
        self.get_manifest_filtered(experiment_name, &MemberFilter::default())
    }

    /// Members of an experiment matching `filter`, in ingestion order
    pub fn get_manifest_filtered(
        &self,
        experiment_name: &str,
        filter: &MemberFilter,
    ) -> Result<Vec<MemberRow>> {
        let experiment = self.experiment(experiment_name)?;
        let sql = format!(
            "SELECT {} FROM members
             WHERE experiment = ?1
               AND (?2 IS NULL OR model = ?2)
               AND (?3 IS NULL OR perturbation = ?3)
               AND (?4 IS NULL OR initialization_time = ?4)
               AND (?5 IS NULL OR forecast_hour = ?5)
             ORDER BY position, memberid",
            MemberRow::COLUMNS
        );
        let members = self.store.query(
            &sql,
            params![
                experiment.id.0,
                filter.model,
                filter.perturbation,
                filter.initialization_time,
                filter.forecast_hour,
            ],
            MemberRow::from_row,
        )?;
        debug!(
            experiment = experiment_name,
            filter = %filter,
            members = members.len(),
            "manifest resolved"
        );
        Ok(members)
    }

    /// Analyses previously committed for an experiment
    pub fn get_analyses(&self, experiment_name: &str) -> Result<Vec<AnalysisSummary>> {
        let experiment = self.experiment(experiment_name)?;
        Ok(self.store.query(
            "SELECT a.analysis, a.experiment, a.name, a.description, a.operation, a.parameters, a.created_at,
                    (SELECT COUNT(*) FROM analysis_results r WHERE r.analysis = a.analysis)
             FROM analyses a
             WHERE a.experiment = ?1
             ORDER BY a.analysis",
            params![experiment.id.0],
            AnalysisSummary::from_row,
        )?)
    }

    /// Result rows of a committed analysis, in commit order
    pub fn get_results(&self, analysis: AnalysisId) -> Result<Vec<ResultRow>> {
        let raw = self.store.query(
            "SELECT member, input_handle, output_handle, metrics
             FROM analysis_results WHERE analysis = ?1 ORDER BY position",
            params![analysis.0],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )?;

        let mut rows = Vec::with_capacity(raw.len());
        for (member, input_handle, output_handle, metrics) in raw {
            let metrics = match metrics {
                Some(json) => serde_json::from_str(&json).map_err(|e| {
                    StoreError::Query(rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    ))
                })?,
                None => Default::default(),
            };
            rows.push(ResultRow {
                member: MemberId(member),
                input_handle,
                output_handle,
                metrics,
            });
        }
        Ok(rows)
    }

    /// Append a new analysis for an experiment.
    ///
    /// The header and every result row become visible together or not at
    /// all. An unknown experiment fails before any write is attempted.
    pub fn add_analysis(
        &mut self,
        experiment_name: &str,
        analysis: &NewAnalysis,
        results: &ResultTable,
    ) -> Result<AnalysisId> {
        let experiment = self.experiment(experiment_name)?;
        let commit_error = |reason: String| BrowserError::Commit {
            analysis: analysis.name.clone(),
            reason,
        };

        let tx = self
            .store
            .transaction()
            .map_err(|e| commit_error(e.to_string()))?;

        let id = write_analysis(&tx, &experiment, analysis, results).map_err(commit_error)?;

        tx.commit().map_err(|e| commit_error(e.to_string()))?;

        info!(
            experiment = experiment_name,
            analysis = %id,
            rows = results.len(),
            "analysis committed"
        );
        Ok(id)
    }
}

fn write_analysis(
    tx: &Transaction<'_>,
    experiment: &Experiment,
    analysis: &NewAnalysis,
    results: &ResultTable,
) -> std::result::Result<AnalysisId, String> {
    if analysis.name.trim().is_empty() {
        return Err("analysis name is empty".to_string());
    }

    let id: i64 = tx
        .query_row(
            "INSERT INTO analyses (experiment, name, description, operation, parameters, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING analysis",
            params![
                experiment.id.0,
                analysis.name,
                analysis.description,
                analysis.operation,
                analysis.parameters,
                chrono::Utc::now().timestamp(),
            ],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;

    for (position, row) in results.iter().enumerate() {
        check_member(tx, experiment, row)?;

        if row.output_handle.trim().is_empty() {
            return Err(format!(
                "result row for '{}' has no output handle",
                row.input_handle
            ));
        }

        if let Some((name, _)) = row.metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!(
                "result row '{}' has non-finite metric '{}'",
                row.input_handle, name
            ));
        }

        let metrics = if row.metrics.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&row.metrics).map_err(|e| e.to_string())?)
        };

        tx.execute(
            "INSERT INTO analysis_results (analysis, member, position, input_handle, output_handle, metrics)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                row.member.0,
                position as i64,
                row.input_handle,
                row.output_handle,
                metrics,
            ],
        )
        .map_err(|e| e.to_string())?;
    }

    Ok(AnalysisId(id))
}

/// A result row must name a member of this experiment, under that member's handle.
fn check_member(
    tx: &Transaction<'_>,
    experiment: &Experiment,
    row: &ResultRow,
) -> std::result::Result<(), String> {
    let owner: Option<(i64, String)> = tx
        .query_row(
            "SELECT experiment, handle FROM members WHERE memberid = ?1",
            params![row.member.0],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| e.to_string())?;

    match owner {
        Some((owner, handle)) if owner == experiment.id.0 && handle.trim() == row.input_handle => {
            Ok(())
        }
        Some(_) | None => Err(format!(
            "result row '{}' does not match a member of experiment '{}'",
            row.input_handle, experiment.name
        )),
    }
}
