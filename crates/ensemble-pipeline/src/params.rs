// Pipeline operations and named parameters

use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw named parameter values, as given on a command line or in a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSet(BTreeMap<String, String>);

impl ParameterSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up a raw value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Parameter names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Parse `name=value` pairs
    pub fn parse_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut set = Self::new();
        for pair in pairs {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| PipelineError::invalid_parameter(pair, "expected name=value"))?;
            set.insert(name.trim(), value.trim());
        }
        Ok(set)
    }

    fn reject_unknown(&self, allowed: &[&str]) -> Result<()> {
        match self.names().find(|name| !allowed.contains(name)) {
            Some(unknown) => Err(PipelineError::invalid_parameter(
                unknown,
                format!("unknown parameter (expected one of: {})", allowed.join(", ")),
            )),
            None => Ok(()),
        }
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| PipelineError::invalid_parameter(name, "missing required parameter"))
    }

    fn required_f64(&self, name: &str) -> Result<f64> {
        let raw = self.required(name)?;
        let value: f64 = raw
            .parse()
            .map_err(|_| PipelineError::invalid_parameter(name, format!("'{}' is not a number", raw)))?;
        if !value.is_finite() {
            return Err(PipelineError::invalid_parameter(name, "value must be finite"));
        }
        Ok(value)
    }

    fn required_u32(&self, name: &str) -> Result<u32> {
        let raw = self.required(name)?;
        raw.parse().map_err(|_| {
            PipelineError::invalid_parameter(
                name,
                format!("'{}' is not a non-negative integer", raw),
            )
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A validated pipeline operation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    /// Extract the isosurface at `contour_value`
    Contour {
        /// Isovalue
        contour_value: f64,
    },
    /// Extract the sub-volume from the origin to `(x, y, z)`
    Subset {
        /// Upper x extent
        x: u32,
        /// Upper y extent
        y: u32,
        /// Upper z extent
        z: u32,
    },
}

impl Operation {
    /// Operation names accepted by [`Operation::from_parameters`]
    pub const NAMES: &'static [&'static str] = &["contour", "subset"];

    /// Validate raw parameters for the named operation.
    ///
    /// Fails before anything is run on an unknown operation, an unknown
    /// parameter name, a missing parameter, or a malformed value.
    pub fn from_parameters(operation: &str, params: &ParameterSet) -> Result<Self> {
        match operation {
            "contour" => {
                params.reject_unknown(&["contour_value"])?;
                Ok(Operation::Contour {
                    contour_value: params.required_f64("contour_value")?,
                })
            }
            "subset" => {
                params.reject_unknown(&["x", "y", "z"])?;
                Ok(Operation::Subset {
                    x: params.required_u32("x")?,
                    y: params.required_u32("y")?,
                    z: params.required_u32("z")?,
                })
            }
            other => Err(PipelineError::invalid_parameter(
                "operation",
                format!(
                    "unknown operation '{}' (expected one of: {})",
                    other,
                    Self::NAMES.join(", ")
                ),
            )),
        }
    }

    /// Contour operation with a checked isovalue
    pub fn contour(contour_value: f64) -> Result<Self> {
        if !contour_value.is_finite() {
            return Err(PipelineError::invalid_parameter(
                "contour_value",
                "value must be finite",
            ));
        }
        Ok(Operation::Contour { contour_value })
    }

    /// Operation name as recorded in the ledger
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Contour { .. } => "contour",
            Operation::Subset { .. } => "subset",
        }
    }

    /// Suffix replacing the input's extension in the artifact name
    pub fn output_suffix(&self) -> &'static str {
        match self {
            Operation::Contour { .. } => "_contours.vtk",
            Operation::Subset { .. } => "_subset.vti",
        }
    }

    /// Positional arguments passed to a pipeline script between input and output
    pub fn script_args(&self) -> Vec<String> {
        match self {
            Operation::Contour { contour_value } => vec![contour_value.to_string()],
            Operation::Subset { x, y, z } => vec![x.to_string(), y.to_string(), z.to_string()],
        }
    }

    /// Canonical `name=value` parameter string
    pub fn canonical_parameters(&self) -> String {
        match self {
            Operation::Contour { contour_value } => format!("contour_value={}", contour_value),
            Operation::Subset { x, y, z } => format!("x={} y={} z={}", x, y, z),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.canonical_parameters())
    }
}
