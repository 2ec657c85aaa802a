use std::path::Path;

use ensemble_ledger::{MetadataBrowser, ResultRow, ResultTable};
use ensemble_pipeline::PipelineEngine;
use tracing::{debug, info, warn};

use super::{
    context::RunContext,
    model::RunRequest,
    report::{MemberOutcome, MemberStatus, RunReport},
    state::RunState,
};

/// Drives one analysis run: resolve the manifest, process every member,
/// then commit the successes as a single analysis.
pub struct Orchestrator<E: PipelineEngine> {
    state: RunState,
    engine: E,
}

impl<E: PipelineEngine> Orchestrator<E> {
    /// Create an orchestrator over a pipeline engine.
    pub fn new(engine: E) -> Self {
        Self {
            state: RunState::Pending,
            engine,
        }
    }

    /// State of the latest run.
    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal run transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "run state");
        self.state = next;
    }

    /// Execute one run to a terminal state.
    ///
    /// Per-member pipeline failures are recorded in the report and never
    /// stop the batch. Resolution and commit failures end the run.
    pub fn run(
        &mut self,
        browser: &mut MetadataBrowser<'_>,
        context: &RunContext,
        request: &RunRequest,
    ) -> RunReport {
        self.state = RunState::Pending;
        let mut report = RunReport {
            experiment: request.experiment.clone(),
            analysis_name: request.analysis_name.clone(),
            operation: request.operation,
            state: RunState::Pending,
            analysis: None,
            manifest_len: 0,
            members: Vec::new(),
            error: None,
        };

        self.transition(RunState::Resolving);
        let manifest = match browser.get_manifest_filtered(&request.experiment, &request.filter) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(experiment = %request.experiment, "cannot resolve experiment: {}", e);
                self.transition(RunState::Aborted);
                report.error = Some(e.to_string());
                report.state = self.state;
                return report;
            }
        };
        report.manifest_len = manifest.len();

        let store_dir = browser.base_dir();
        let data_dir = context.data_dir.clone().unwrap_or_else(|| store_dir.clone());

        self.transition(RunState::Processing);
        info!(
            experiment = %request.experiment,
            members = manifest.len(),
            filter = %request.filter,
            operation = %request.operation,
            "processing ensemble"
        );

        let mut results = ResultTable::new();
        for (index, member) in manifest.iter().enumerate() {
            if context.cancel.is_cancelled() {
                return self.cancelled(report, index);
            }

            let input = data_dir.join(&member.handle);
            match self.engine.process(&input, &request.operation) {
                Ok(artifact) => {
                    let output = recorded_handle(&store_dir, &artifact.output);
                    debug!(member = %member.handle, output = %output, "member processed");
                    results.push(ResultRow {
                        member: member.id,
                        input_handle: member.handle.clone(),
                        output_handle: output.clone(),
                        metrics: artifact.metrics,
                    });
                    report.members.push(MemberOutcome {
                        handle: member.handle.clone(),
                        status: MemberStatus::Succeeded { output },
                    });
                }
                Err(e) => {
                    warn!(member = %member.handle, "member skipped: {}", e);
                    report.members.push(MemberOutcome {
                        handle: member.handle.clone(),
                        status: MemberStatus::Failed {
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        if context.cancel.is_cancelled() {
            return self.cancelled(report, manifest.len());
        }

        self.transition(RunState::Committing);
        match browser.add_analysis(&request.experiment, &request.new_analysis(), &results) {
            Ok(id) => {
                info!(analysis = %id, rows = results.len(), "analysis committed");
                self.transition(RunState::Completed);
                report.analysis = Some(id);
            }
            Err(e) => {
                warn!(analysis = %request.analysis_name, "commit failed: {}", e);
                self.transition(RunState::Failed);
                report.error = Some(e.to_string());
            }
        }

        report.state = self.state;
        report
    }

    fn cancelled(&mut self, mut report: RunReport, attempted: usize) -> RunReport {
        warn!(
            attempted,
            remaining = report.manifest_len - attempted,
            "run cancelled; skipping commit"
        );
        self.transition(RunState::Cancelled);
        report.error = Some(format!(
            "cancelled after {} of {} members",
            attempted, report.manifest_len
        ));
        report.state = self.state;
        report
    }
}

/// Output handle as stored in the ledger: relative to the store directory
/// when the artifact lies under it, the full path otherwise.
fn recorded_handle(base_dir: &Path, output: &Path) -> String {
    match output.strip_prefix(base_dir) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative.display().to_string(),
        _ => output.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;

    use ensemble_ledger::{
        add_members, register_experiment, MemberFilter, NewMember, Store, StoreConfig,
    };
    use ensemble_pipeline::{derive_output_path, Artifact, Operation, PipelineError};
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::orchestrate::context::CancelFlag;

    /// Succeeds for every input except those whose file name is listed.
    struct FakeEngine {
        failing: Vec<&'static str>,
        calls: RefCell<Vec<PathBuf>>,
    }

    impl FakeEngine {
        fn failing(failing: Vec<&'static str>) -> Self {
            Self {
                failing,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl PipelineEngine for FakeEngine {
        fn process(
            &self,
            input: &Path,
            operation: &Operation,
        ) -> ensemble_pipeline::Result<Artifact> {
            self.calls.borrow_mut().push(input.to_path_buf());
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.failing.contains(&name.as_str()) {
                return Err(PipelineError::processing(
                    input.display().to_string(),
                    "malformed input",
                ));
            }
            Ok(Artifact::new(derive_output_path(input, operation)))
        }
    }

    /// Requests cancellation once it has processed `after` inputs.
    struct CancellingEngine {
        flag: CancelFlag,
        after: usize,
        calls: RefCell<usize>,
    }

    impl PipelineEngine for CancellingEngine {
        fn process(
            &self,
            input: &Path,
            operation: &Operation,
        ) -> ensemble_pipeline::Result<Artifact> {
            *self.calls.borrow_mut() += 1;
            if *self.calls.borrow() >= self.after {
                self.flag.cancel();
            }
            Ok(Artifact::new(derive_output_path(input, operation)))
        }
    }

    fn weather_store(handles: &[&str]) -> (TempDir, Store) {
        let dir = tempdir().expect("tempdir");
        let mut store =
            Store::create(dir.path().join("ensemble.db"), StoreConfig::default()).expect("store");
        let id = register_experiment(&mut store, "weather", Some("SREF members")).expect("exp");
        let members: Vec<_> = handles.iter().map(|h| NewMember::new(*h)).collect();
        add_members(&mut store, id, &members).expect("members");
        (dir, store)
    }

    fn contour_request() -> RunRequest {
        RunRequest::new(
            "weather",
            "test_contour",
            Operation::Contour { contour_value: 0.5 },
        )
    }

    #[test]
    fn weather_scenario_commits_partial_results() {
        let (_dir, mut store) = weather_store(&["a.vti", "b.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let mut orchestrator = Orchestrator::new(FakeEngine::failing(vec!["b.vti"]));

        let report = orchestrator.run(&mut browser, &RunContext::new(), &contour_request());

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.succeeded().collect::<Vec<_>>(), vec!["a.vti"]);
        assert_eq!(report.failed().collect::<Vec<_>>(), vec!["b.vti"]);

        let id = report.analysis.expect("analysis id");
        let rows = browser.get_results(id).expect("results");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].input_handle, "a.vti");
        assert_eq!(rows[0].output_handle, "a_contours.vtk");
    }

    #[test]
    fn failure_does_not_stop_later_members() {
        let (dir, mut store) = weather_store(&["m1.vti", "m2.vti", "m3.vti", "m4.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let engine = FakeEngine::failing(vec!["m2.vti"]);
        let mut orchestrator = Orchestrator::new(&engine);

        let report = orchestrator.run(&mut browser, &RunContext::new(), &contour_request());

        let calls = engine.calls.borrow();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3], dir.path().join("m4.vti"));
        assert_eq!(report.succeeded().count(), 3);

        let rows = browser
            .get_results(report.analysis.expect("analysis id"))
            .expect("results");
        let inputs: Vec<_> = rows.iter().map(|r| r.input_handle.as_str()).collect();
        assert_eq!(inputs, vec!["m1.vti", "m3.vti", "m4.vti"]);
    }

    #[test]
    fn unknown_experiment_aborts_without_processing() {
        let (_dir, mut store) = weather_store(&["a.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let engine = FakeEngine::failing(vec![]);
        let mut orchestrator = Orchestrator::new(&engine);

        let request = RunRequest::new("climate", "test_contour", Operation::Contour { contour_value: 1.0 });
        let report = orchestrator.run(&mut browser, &RunContext::new(), &request);

        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(orchestrator.state(), RunState::Aborted);
        assert!(engine.calls.borrow().is_empty());
        assert!(report.error.unwrap_or_default().contains("climate"));
        assert!(browser.get_analyses("weather").expect("analyses").is_empty());
    }

    #[test]
    fn empty_manifest_commits_empty_analysis() {
        let (_dir, mut store) = weather_store(&[]);
        let mut browser = MetadataBrowser::new(&mut store);
        let mut orchestrator = Orchestrator::new(FakeEngine::failing(vec![]));

        let report = orchestrator.run(&mut browser, &RunContext::new(), &contour_request());

        assert_eq!(report.state, RunState::Completed);
        let id = report.analysis.expect("analysis id");
        assert!(browser.get_results(id).expect("results").is_empty());
    }

    #[test]
    fn all_members_failing_still_commits() {
        let (_dir, mut store) = weather_store(&["a.vti", "b.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let mut orchestrator = Orchestrator::new(FakeEngine::failing(vec!["a.vti", "b.vti"]));

        let report = orchestrator.run(&mut browser, &RunContext::new(), &contour_request());

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.failed().count(), 2);
        let analyses = browser.get_analyses("weather").expect("analyses");
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].result_count, 0);
    }

    #[test]
    fn commit_failure_ends_in_failed() {
        let (_dir, mut store) = weather_store(&["a.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let mut orchestrator = Orchestrator::new(FakeEngine::failing(vec![]));

        // An empty analysis name is rejected by the ledger.
        let request = RunRequest::new("weather", "", Operation::Contour { contour_value: 1.0 });
        let report = orchestrator.run(&mut browser, &RunContext::new(), &request);

        assert_eq!(report.state, RunState::Failed);
        assert!(report.analysis.is_none());
        assert_eq!(report.succeeded().count(), 1);
        assert!(browser.get_analyses("weather").expect("analyses").is_empty());
    }

    #[test]
    fn cancellation_skips_commit() {
        let (_dir, mut store) = weather_store(&["a.vti", "b.vti", "c.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let flag = CancelFlag::new();
        let engine = CancellingEngine {
            flag: flag.clone(),
            after: 1,
            calls: RefCell::new(0),
        };
        let mut orchestrator = Orchestrator::new(engine);

        let report = orchestrator.run(&mut browser, &RunContext::with_cancel(flag), &contour_request());

        assert_eq!(report.state, RunState::Cancelled);
        assert_eq!(report.members.len(), 1);
        assert_eq!(report.manifest_len, 3);
        assert!(report.analysis.is_none());
        assert!(browser.get_analyses("weather").expect("analyses").is_empty());
    }

    #[test]
    fn data_dir_override_resolves_inputs() {
        let (_dir, mut store) = weather_store(&["a.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let engine = FakeEngine::failing(vec![]);
        let mut orchestrator = Orchestrator::new(&engine);
        let context = RunContext {
            data_dir: Some(PathBuf::from("/srv/ensemble")),
            ..RunContext::default()
        };

        let report = orchestrator.run(&mut browser, &context, &contour_request());

        assert_eq!(engine.calls.borrow()[0], PathBuf::from("/srv/ensemble/a.vti"));
        assert_eq!(report.state, RunState::Completed);

        // Handles are read back against the store directory, so an artifact
        // outside it is recorded with its full path.
        let rows = browser
            .get_results(report.analysis.expect("analysis id"))
            .expect("results");
        assert_eq!(rows[0].output_handle, "/srv/ensemble/a_contours.vtk");
    }

    #[test]
    fn data_dir_under_store_records_relative_handle() {
        let (dir, mut store) = weather_store(&["a.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let mut orchestrator = Orchestrator::new(FakeEngine::failing(vec![]));
        let context = RunContext {
            data_dir: Some(dir.path().join("members")),
            ..RunContext::default()
        };

        let report = orchestrator.run(&mut browser, &context, &contour_request());

        let rows = browser
            .get_results(report.analysis.expect("analysis id"))
            .expect("results");
        assert_eq!(
            PathBuf::from(&rows[0].output_handle),
            PathBuf::from("members").join("a_contours.vtk")
        );
    }

    #[test]
    fn cancel_during_last_member_skips_commit() {
        let (_dir, mut store) = weather_store(&["a.vti", "b.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let flag = CancelFlag::new();
        let engine = CancellingEngine {
            flag: flag.clone(),
            after: 2,
            calls: RefCell::new(0),
        };
        let mut orchestrator = Orchestrator::new(engine);

        let report = orchestrator.run(&mut browser, &RunContext::with_cancel(flag), &contour_request());

        assert_eq!(report.state, RunState::Cancelled);
        assert_eq!(report.members.len(), 2);
        assert!(report.analysis.is_none());
        assert!(browser.get_analyses("weather").expect("analyses").is_empty());
    }

    #[test]
    fn cancel_before_empty_run_skips_commit() {
        let (_dir, mut store) = weather_store(&[]);
        let mut browser = MetadataBrowser::new(&mut store);
        let flag = CancelFlag::new();
        flag.cancel();
        let mut orchestrator = Orchestrator::new(FakeEngine::failing(vec![]));

        let report = orchestrator.run(&mut browser, &RunContext::with_cancel(flag), &contour_request());

        assert_eq!(report.state, RunState::Cancelled);
        assert!(browser.get_analyses("weather").expect("analyses").is_empty());
    }

    #[test]
    fn filter_limits_processed_members() {
        let dir = tempdir().expect("tempdir");
        let mut store =
            Store::create(dir.path().join("ensemble.db"), StoreConfig::default()).expect("store");
        let id = register_experiment(&mut store, "weather", None).expect("exp");
        let member = |handle: &str, model: &str| NewMember {
            model: Some(model.to_string()),
            ..NewMember::new(handle)
        };
        add_members(
            &mut store,
            id,
            &[member("em.vti", "em"), member("nmm.vti", "nmm"), member("em2.vti", "em")],
        )
        .expect("members");
        let mut browser = MetadataBrowser::new(&mut store);
        let engine = FakeEngine::failing(vec![]);
        let mut orchestrator = Orchestrator::new(&engine);

        let request = contour_request().with_filter(MemberFilter {
            model: Some("em".to_string()),
            ..MemberFilter::default()
        });
        let report = orchestrator.run(&mut browser, &RunContext::new(), &request);

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.manifest_len, 2);
        assert_eq!(engine.calls.borrow().len(), 2);
        assert_eq!(report.succeeded().collect::<Vec<_>>(), vec!["em.vti", "em2.vti"]);
    }

    #[test]
    fn orchestrator_is_reusable_across_runs() {
        let (_dir, mut store) = weather_store(&["a.vti"]);
        let mut browser = MetadataBrowser::new(&mut store);
        let mut orchestrator = Orchestrator::new(FakeEngine::failing(vec![]));

        let first = orchestrator.run(&mut browser, &RunContext::new(), &contour_request());
        let second = orchestrator.run(&mut browser, &RunContext::new(), &contour_request());

        assert_eq!(first.state, RunState::Completed);
        assert_eq!(second.state, RunState::Completed);
        assert_ne!(first.analysis, second.analysis);
        assert_eq!(browser.get_analyses("weather").expect("analyses").len(), 2);
    }

    #[test]
    fn recorded_handle_is_relative_under_base() {
        let base = Path::new("/data/run");
        assert_eq!(
            recorded_handle(base, Path::new("/data/run/sub/a_contours.vtk")),
            "sub/a_contours.vtk"
        );
        assert_eq!(
            recorded_handle(base, Path::new("/elsewhere/a_contours.vtk")),
            "/elsewhere/a_contours.vtk"
        );
    }
}
