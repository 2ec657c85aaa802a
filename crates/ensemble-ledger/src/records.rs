// Typed experiment, member, and analysis records

use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Surrogate key of an experiment (`experiments.experimentid`)
    ExperimentId
);
row_id!(
    /// Surrogate key of a manifest member (`members.memberid`)
    MemberId
);
row_id!(
    /// Identity assigned to a committed analysis (`analyses.analysis`)
    AnalysisId
);

/// A named collection of ensemble members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    /// Surrogate id
    pub id: ExperimentId,
    /// Unique experiment name
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
}

impl Experiment {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: ExperimentId(row.get(0)?),
            name: row.get(1)?,
            description: row.get(2)?,
        })
    }
}

/// One manifest row: a source file belonging to an experiment.
///
/// Only `handle` is interpreted by the analysis run; the descriptive
/// columns are carried through for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRow {
    /// Surrogate id
    pub id: MemberId,
    /// Ingestion order within the experiment
    pub position: i64,
    /// File locator, relative to the store directory unless absolute
    pub handle: String,
    /// Forecast model name
    pub model: Option<String>,
    /// Perturbation label
    pub perturbation: Option<String>,
    /// Initialization time (hour of day)
    pub initialization_time: Option<i64>,
    /// Forecast hour
    pub forecast_hour: Option<i64>,
}

impl MemberRow {
    pub(crate) const COLUMNS: &'static str =
        "memberid, position, handle, model, perturbation, initialization_time, forecast_hour";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let handle: String = row.get(2)?;
        Ok(Self {
            id: MemberId(row.get(0)?),
            position: row.get(1)?,
            handle: handle.trim().to_string(),
            model: row.get(3)?,
            perturbation: row.get(4)?,
            initialization_time: row.get(5)?,
            forecast_hour: row.get(6)?,
        })
    }
}

/// Restricts a manifest to members matching every set field.
///
/// An empty filter matches the whole experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFilter {
    /// Forecast model name
    pub model: Option<String>,
    /// Perturbation label
    pub perturbation: Option<String>,
    /// Initialization time
    pub initialization_time: Option<i64>,
    /// Forecast hour
    pub forecast_hour: Option<i64>,
}

impl MemberFilter {
    /// Whether no field is set
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.perturbation.is_none()
            && self.initialization_time.is_none()
            && self.forecast_hour.is_none()
    }
}

impl fmt::Display for MemberFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut terms = Vec::new();
        if let Some(model) = &self.model {
            terms.push(format!("model={}", model));
        }
        if let Some(perturbation) = &self.perturbation {
            terms.push(format!("perturbation={}", perturbation));
        }
        if let Some(time) = self.initialization_time {
            terms.push(format!("initialization_time={}", time));
        }
        if let Some(hour) = self.forecast_hour {
            terms.push(format!("forecast_hour={}", hour));
        }
        if terms.is_empty() {
            f.write_str("all members")
        } else {
            f.write_str(&terms.join(" "))
        }
    }
}

/// A member to be ingested into an experiment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    /// File locator
    pub handle: String,
    /// Forecast model name
    pub model: Option<String>,
    /// Perturbation label
    pub perturbation: Option<String>,
    /// Initialization time
    pub initialization_time: Option<i64>,
    /// Forecast hour
    pub forecast_hour: Option<i64>,
}

impl NewMember {
    /// Member with only a handle
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            ..Self::default()
        }
    }
}

/// Header fields of an analysis about to be committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAnalysis {
    /// Human name of the analysis
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Pipeline operation that produced the artifacts (e.g. `contour`)
    pub operation: String,
    /// Canonical parameter string (e.g. `contour_value=0.5`)
    pub parameters: String,
}

/// A committed analysis as listed for an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Analysis identity
    pub id: AnalysisId,
    /// Owning experiment
    pub experiment: ExperimentId,
    /// Human name
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Pipeline operation
    pub operation: String,
    /// Canonical parameter string
    pub parameters: String,
    /// Unix timestamp of the commit
    pub created_at: i64,
    /// Number of result rows
    pub result_count: i64,
}

impl AnalysisSummary {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: AnalysisId(row.get(0)?),
            experiment: ExperimentId(row.get(1)?),
            name: row.get(2)?,
            description: row.get(3)?,
            operation: row.get(4)?,
            parameters: row.get(5)?,
            created_at: row.get(6)?,
            result_count: row.get(7)?,
        })
    }
}

/// Per-member result of an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Manifest member the artifact was derived from
    pub member: MemberId,
    /// Handle of the input, as listed in the manifest
    pub input_handle: String,
    /// Handle of the produced artifact
    pub output_handle: String,
    /// Optional derived metrics
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

/// Ordered result rows accumulated during one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
}

impl ResultTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row
    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    /// Rows in insertion order
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over rows
    pub fn iter(&self) -> std::slice::Iter<'_, ResultRow> {
        self.rows.iter()
    }
}

impl FromIterator<ResultRow> for ResultTable {
    fn from_iter<I: IntoIterator<Item = ResultRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ResultTable {
    type Item = &'a ResultRow;
    type IntoIter = std::slice::Iter<'a, ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
