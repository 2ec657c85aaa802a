// Deterministic artifact naming

use crate::params::Operation;
use std::path::{Path, PathBuf};

/// Derive the artifact path for an input.
///
/// The input's final extension is replaced by the operation suffix, in the
/// same directory: `data/a.vti` becomes `data/a_contours.vtk` for a contour.
/// The name depends only on the input path and the operation kind, so
/// re-running a member overwrites the same artifact.
pub fn derive_output_path(input: &Path, operation: &Operation) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = format!("{}{}", stem, operation.output_suffix());
    match input.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}
