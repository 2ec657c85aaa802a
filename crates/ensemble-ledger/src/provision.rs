// Experiment provisioning and member ingestion
//
// These helpers populate the fixed schema; the analysis run only reads
// experiments and members.

use crate::records::{ExperimentId, MemberId, NewMember};
use crate::schema::{Result, Store};
use rusqlite::params;
use tracing::info;

/// Register a new experiment and return its id.
///
/// Fails with a query error if the name is already taken.
pub fn register_experiment(
    store: &mut Store,
    name: &str,
    description: Option<&str>,
) -> Result<ExperimentId> {
    let id: i64 = store.conn().query_row(
        "INSERT INTO experiments (name, description) VALUES (?1, ?2) RETURNING experimentid",
        params![name, description],
        |row| row.get(0),
    )?;
    info!(experiment = name, id, "experiment registered");
    Ok(ExperimentId(id))
}

/// Append members to an experiment, after any existing members.
///
/// All members are inserted in one transaction.
pub fn add_members(
    store: &mut Store,
    experiment: ExperimentId,
    members: &[NewMember],
) -> Result<Vec<MemberId>> {
    let tx = store.transaction()?;

    let next_position: i64 = tx.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM members WHERE experiment = ?1",
        params![experiment.0],
        |row| row.get(0),
    )?;

    let mut ids = Vec::with_capacity(members.len());
    for (offset, member) in members.iter().enumerate() {
        tx.execute(
            "INSERT INTO members (experiment, position, handle, model, perturbation, initialization_time, forecast_hour)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                experiment.0,
                next_position + offset as i64,
                member.handle.trim(),
                member.model,
                member.perturbation,
                member.initialization_time,
                member.forecast_hour,
            ],
        )?;
        ids.push(MemberId(tx.last_insert_rowid()));
    }

    tx.commit()?;
    Ok(ids)
}
