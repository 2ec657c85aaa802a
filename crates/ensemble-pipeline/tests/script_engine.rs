// Script engine tests against real shell scripts
//
// The scripts stand in for pvpython pipelines: they receive
// `<input> <args...> <output>` and write the artifact themselves.

#![cfg(unix)]

use ensemble_pipeline::{Operation, PipelineEngine, PipelineError, ScriptEngine, ScriptSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const CONTOUR_SCRIPT: &str = r#"
input="$1"
value="$2"
output="$3"
case "$input" in
  *corrupt*) echo "vtkXMLRectilinearGridReader: error parsing $input" >&2; exit 3 ;;
  *lazy*) exit 0 ;;
esac
echo "Generating contour lines for value $value"
printf 'contour %s of %s\n' "$value" "$input" > "$output"
echo "metric: mean=2.5"
echo "metric: spread=nan"
"#;

const SUBSET_SCRIPT: &str = r#"
printf 'subset %s %s %s\n' "$2" "$3" "$4" > "$5"
"#;

fn setup() -> (TempDir, ScriptEngine) {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("contour.sh"), CONTOUR_SCRIPT).unwrap();
    fs::write(dir.path().join("subset.sh"), SUBSET_SCRIPT).unwrap();
    let engine = ScriptEngine::new(
        Some(PathBuf::from("sh")),
        ScriptSet {
            contour: dir.path().join("contour.sh"),
            subset: dir.path().join("subset.sh"),
        },
    );
    (dir, engine)
}

fn member(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, "<VTKFile/>").unwrap();
    path
}

#[test]
fn contour_writes_named_artifact_with_metrics() {
    let (dir, engine) = setup();
    let input = member(dir.path(), "a.vti");

    let artifact = engine
        .process(&input, &Operation::Contour { contour_value: 0.5 })
        .unwrap();

    assert_eq!(artifact.output, dir.path().join("a_contours.vtk"));
    assert_eq!(artifact.metrics.get("mean"), Some(&2.5));
    assert!(!artifact.metrics.contains_key("spread"));
    let written = fs::read_to_string(&artifact.output).unwrap();
    assert!(written.contains("contour 0.5"));
}

#[test]
fn rerun_yields_same_output_handle() {
    let (dir, engine) = setup();
    let input = member(dir.path(), "a.vti");
    let op = Operation::Contour { contour_value: 0.5 };

    let first = engine.process(&input, &op).unwrap();
    let second = engine.process(&input, &op).unwrap();
    assert_eq!(first.output, second.output);
}

#[test]
fn subset_passes_extents() {
    let (dir, engine) = setup();
    let input = member(dir.path(), "b.vti");

    let artifact = engine
        .process(&input, &Operation::Subset { x: 4, y: 5, z: 6 })
        .unwrap();

    assert_eq!(artifact.output, dir.path().join("b_subset.vti"));
    assert_eq!(fs::read_to_string(&artifact.output).unwrap(), "subset 4 5 6\n");
}

#[test]
fn failing_pipeline_reports_stderr() {
    let (dir, engine) = setup();
    let input = member(dir.path(), "corrupt.vti");

    match engine.process(&input, &Operation::Contour { contour_value: 0.5 }) {
        Err(PipelineError::Processing { reason, .. }) => {
            assert!(reason.contains("error parsing"), "reason was: {}", reason)
        }
        other => panic!("expected processing error, got {:?}", other),
    }
}

#[test]
fn success_without_artifact_is_processing_error() {
    let (dir, engine) = setup();
    let input = member(dir.path(), "lazy.vti");

    let err = engine
        .process(&input, &Operation::Contour { contour_value: 0.5 })
        .err()
        .unwrap();
    assert!(err.to_string().contains("wrote no artifact"));
}

#[test]
fn missing_interpreter_is_processing_error() {
    let (dir, _) = setup();
    let engine = ScriptEngine::new(
        Some(PathBuf::from("definitely-not-an-interpreter-4821")),
        ScriptSet {
            contour: dir.path().join("contour.sh"),
            subset: dir.path().join("subset.sh"),
        },
    );
    let input = member(dir.path(), "a.vti");

    let err = engine
        .process(&input, &Operation::Contour { contour_value: 0.5 })
        .err()
        .unwrap();
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("not found"));
}

#[test]
fn previous_artifact_is_not_reused() {
    let (dir, engine) = setup();
    let input = member(dir.path(), "lazy.vti");
    let stale = dir.path().join("lazy_contours.vtk");
    fs::write(&stale, "from an earlier run").unwrap();

    let err = engine
        .process(&input, &Operation::Contour { contour_value: 0.5 })
        .err()
        .unwrap();
    assert!(err.to_string().contains("wrote no artifact"));
    assert!(!stale.exists());
}

#[test]
fn results_dir_receives_artifacts() {
    let (dir, engine) = setup();
    let results = dir.path().join("results/contours");
    let engine = engine.with_results_dir(&results);
    let input = member(dir.path(), "a.vti");

    let artifact = engine
        .process(&input, &Operation::Contour { contour_value: 0.5 })
        .unwrap();

    assert_eq!(artifact.output, results.join("a_contours.vtk"));
    assert!(artifact.output.is_file());
    assert!(!dir.path().join("a_contours.vtk").exists());
}
