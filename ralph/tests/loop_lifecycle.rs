//! Loop-level tests driving `controller::run` with scripted agents.
//!
//! Each test runs the full loop in a temp directory: workspace preparation,
//! run log, per-iteration streaming, and the stop decision.

use std::fs;
use std::path::{Path, PathBuf};

use ralph::controller::{LoopStop, run};
use ralph::core::iteration::{InvocationFailure, IterationOutcome, IterationRecord};
use ralph::core::task::TaskStatus;
use ralph::exit_codes;
use ralph::test_support::{
    ScriptedInvoker, ScriptedRun, SharedBuffer, TaskAgent, assistant_line, result_line, task,
    test_config,
};

fn log_files(root: &Path) -> Vec<PathBuf> {
    fs::read_dir(root.join("logs"))
        .expect("read logs")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
        .collect()
}

#[test]
fn completes_on_third_invocation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let invoker = ScriptedInvoker::new(vec![
        ScriptedRun::result("did task 1"),
        ScriptedRun::result("did task 2"),
        ScriptedRun::result("<promise>COMPLETE</promise>"),
    ]);

    let outcome = run(
        temp.path(),
        &test_config(),
        &invoker,
        3,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");

    assert_eq!(outcome.exit_code(), exit_codes::OK);
    assert_eq!(outcome.stop, LoopStop::Complete { iter: 3 });
    assert_eq!(invoker.invocations(), 3);
}

#[test]
fn exhausts_budget_of_two() {
    let temp = tempfile::tempdir().expect("tempdir");
    let invoker = ScriptedInvoker::new(vec![
        ScriptedRun::result("still going"),
        ScriptedRun::result("still going"),
    ]);

    let outcome = run(
        temp.path(),
        &test_config(),
        &invoker,
        2,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");

    assert_eq!(outcome.exit_code(), exit_codes::FAILURE);
    assert_eq!(outcome.stop, LoopStop::Exhausted { max_iterations: 2 });
    assert_eq!(invoker.invocations(), 2);
}

#[test]
fn crashed_invocation_does_not_abort_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let invoker = ScriptedInvoker::new(vec![
        ScriptedRun::result("progress"),
        ScriptedRun::lines(Vec::new(), 2),
        ScriptedRun::result("progress"),
        ScriptedRun::result("progress"),
        ScriptedRun::result("progress"),
    ]);
    let mut records: Vec<IterationRecord> = Vec::new();

    let outcome = run(
        temp.path(),
        &test_config(),
        &invoker,
        5,
        Box::new(std::io::sink()),
        |record| records.push(record.clone()),
    )
    .expect("run");

    assert_eq!(invoker.invocations(), 5);
    assert_eq!(outcome.iterations, 5);
    assert_eq!(outcome.failed_invocations, 1);
    assert_eq!(
        records[1].failure,
        Some(InvocationFailure::ExitStatus { code: Some(2) })
    );
    assert_eq!(records[2].outcome, IterationOutcome::Continued);
    assert_eq!(records[4].outcome, IterationOutcome::Exhausted);
}

#[test]
fn sentinel_inside_other_text_completes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let invoker = ScriptedInvoker::new(vec![ScriptedRun::result(
        "not yet: <promise>COMPLETE</promise> unless tests pass",
    )]);

    let outcome = run(
        temp.path(),
        &test_config(),
        &invoker,
        4,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");

    assert_eq!(outcome.stop, LoopStop::Complete { iter: 1 });
    assert_eq!(invoker.invocations(), 1);
}

#[test]
fn sentinel_in_assistant_text_alone_does_not_complete() {
    let temp = tempfile::tempdir().expect("tempdir");
    let invoker = ScriptedInvoker::repeating(ScriptedRun::lines(
        vec![
            assistant_line("I will print <promise>COMPLETE</promise> when done"),
            result_line("one task finished"),
        ],
        0,
    ));

    let outcome = run(
        temp.path(),
        &test_config(),
        &invoker,
        2,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");

    assert_eq!(outcome.stop, LoopStop::Exhausted { max_iterations: 2 });
}

#[test]
fn timed_out_invocation_is_recorded_and_skipped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let invoker = ScriptedInvoker::new(vec![
        ScriptedRun::timed_out(vec![result_line("<promise>COMPLETE</promise>")]),
        ScriptedRun::result("<promise>COMPLETE</promise>"),
    ]);
    let mut failures = Vec::new();

    let outcome = run(
        temp.path(),
        &test_config(),
        &invoker,
        3,
        Box::new(std::io::sink()),
        |record| failures.push(record.failure.clone()),
    )
    .expect("run");

    assert_eq!(outcome.stop, LoopStop::Complete { iter: 2 });
    assert!(matches!(
        failures[0],
        Some(InvocationFailure::TimedOut { .. })
    ));
    assert_eq!(failures[1], None);
}

#[test]
fn run_log_keeps_status_and_raw_lines_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let invoker = ScriptedInvoker::new(vec![
        ScriptedRun::lines(
            vec![assistant_line("first"), result_line("done 1")],
            0,
        ),
        ScriptedRun::lines(
            vec![
                assistant_line("second"),
                result_line("<promise>COMPLETE</promise>"),
            ],
            0,
        ),
    ]);

    run(
        temp.path(),
        &test_config(),
        &invoker,
        5,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");

    let files = log_files(temp.path());
    assert_eq!(files.len(), 1);
    let contents = fs::read_to_string(&files[0]).expect("read log");
    let lines: Vec<&str> = contents.lines().collect();

    let position = |needle: &str| {
        lines
            .iter()
            .position(|line| line.contains(needle))
            .unwrap_or_else(|| panic!("missing {needle:?} in log"))
    };
    let iter1 = position("═══ Iteration 1 ═══");
    let first = position("\"first\"");
    let iter2 = position("═══ Iteration 2 ═══");
    let second = position("\"second\"");
    let done = position("Loop completed successfully");
    assert!(iter1 < first && first < iter2 && iter2 < second && second < done);
    assert!(lines[0].contains("Starting Ralph loop"));
}

#[test]
fn partial_output_of_failed_invocation_is_logged_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let invoker = ScriptedInvoker::new(vec![
        ScriptedRun::failing(vec![assistant_line("partial-A")], 3, "boom\n"),
        ScriptedRun::lines(
            vec![
                assistant_line("recovered-B"),
                result_line("<promise>COMPLETE</promise>"),
            ],
            0,
        ),
    ]);

    let outcome = run(
        temp.path(),
        &test_config(),
        &invoker,
        3,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");
    assert_eq!(outcome.stop, LoopStop::Complete { iter: 2 });

    let files = log_files(temp.path());
    let contents = fs::read_to_string(&files[0]).expect("read log");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.iter().filter(|l| l.contains("partial-A")).count(), 1);
    assert_eq!(lines.iter().filter(|l| l.contains("recovered-B")).count(), 1);

    let position = |needle: &str| {
        lines
            .iter()
            .position(|line| line.contains(needle))
            .unwrap_or_else(|| panic!("missing {needle:?} in log"))
    };
    let iter1 = position("═══ Iteration 1 ═══");
    let partial = position("partial-A");
    let failed = position("Iteration 1 failed: agent exited with status 3; stderr: boom");
    let iter2 = position("═══ Iteration 2 ═══");
    let recovered = position("recovered-B");
    assert!(iter1 < partial && partial < failed && failed < iter2 && iter2 < recovered);
}

#[test]
fn console_shows_status_and_live_text() {
    let temp = tempfile::tempdir().expect("tempdir");
    let console = SharedBuffer::default();
    let invoker = ScriptedInvoker::new(vec![ScriptedRun::lines(
        vec![
            assistant_line("looking at task 1"),
            result_line("<promise>COMPLETE</promise>"),
        ],
        0,
    )]);

    run(
        temp.path(),
        &test_config(),
        &invoker,
        1,
        Box::new(console.clone()),
        |_| {},
    )
    .expect("run");

    let shown = console.contents();
    assert!(shown.contains("] ═══ Iteration 1 ═══"));
    assert!(shown.contains("looking at task 1\r\n\n"));
    assert!(!shown.contains("\"type\""));
}

#[test]
fn payload_is_identical_across_iterations() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("prompt.md"), "Do the next task.\n").expect("write prompt");
    let invoker = ScriptedInvoker::repeating(ScriptedRun::result("ok"));

    run(
        temp.path(),
        &test_config(),
        &invoker,
        3,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");

    assert_eq!(invoker.payloads(), vec!["Do the next task.\n"; 3]);
}

#[test]
fn agent_logs_are_created_when_missing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let invoker = ScriptedInvoker::new(vec![ScriptedRun::result("<promise>COMPLETE</promise>")]);

    run(
        temp.path(),
        &test_config(),
        &invoker,
        1,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");

    assert!(temp.path().join("progress.txt").is_file());
    assert!(temp.path().join("knowledge.md").is_file());
}

/// Agent that follows the task protocol: one selectable task per iteration,
/// lowest id first, blocked tasks only after their blockers.
///
/// ```text
/// 1 setup
/// 2 parser      blockedBy 3
/// 3 lexer       blockedBy 1
/// 4 docs
/// ```
#[test]
fn task_agent_drains_graph_in_dependency_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = TaskAgent::new(vec![
        task("1", "setup", &[]),
        task("2", "parser", &["3"]),
        task("3", "lexer", &["1"]),
        task("4", "docs", &[]),
    ])
    .expect("agent");

    let outcome = run(
        temp.path(),
        &test_config(),
        &agent,
        10,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");

    assert_eq!(outcome.stop, LoopStop::Complete { iter: 4 });
    assert_eq!(agent.invocations(), 4);
    assert_eq!(agent.completed(), vec!["1", "3", "2", "4"]);
    let tasks = agent.tasks().expect("tasks");
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
}

#[test]
fn task_agent_stalls_when_budget_is_short() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = TaskAgent::new(vec![
        task("1", "a", &[]),
        task("2", "b", &[]),
        task("3", "c", &[]),
    ])
    .expect("agent");

    let outcome = run(
        temp.path(),
        &test_config(),
        &agent,
        2,
        Box::new(std::io::sink()),
        |_| {},
    )
    .expect("run");

    assert_eq!(outcome.exit_code(), exit_codes::FAILURE);
    assert_eq!(agent.completed(), vec!["1", "2"]);
}
