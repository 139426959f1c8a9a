//! Suites that need a live cluster with the operator installed and a
//! reachable Elasticsearch cluster. The environment is described through
//! `E2E_*` variables or the file named by `E2E_CONTEXT_FILE`.

use recipe_harness::{CaseReport, Context, Runner, Verdict, test_util::trace_init};

mod beat_recipes;

fn runner() -> Runner {
    trace_init();
    let context = Context::load().expect("test context is not ready");
    Runner::from_context(context).expect("telemetry backend is not ready")
}

/// Fails the test on a failed case; skipped cases pass.
fn assert_case(report: &CaseReport) {
    match &report.verdict {
        Verdict::Passed => {}
        Verdict::Skipped(reason) => eprintln!("{} skipped: {}", report.name, reason),
        Verdict::Failed(error) => panic!("{} failed: {}", report.name, error),
    }
    assert!(
        report.teardown_errors.is_empty(),
        "{} leaked objects: {:?}",
        report.name,
        report.teardown_errors
    );
}
