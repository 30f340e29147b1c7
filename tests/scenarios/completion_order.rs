//! Test: Completion Order - units finish and are finalized as they complete

use crate::helpers::*;
use jobrunner::core::context::ROOT_SCOPE;
use jobrunner::core::{Step, TaskResult};
use std::time::{Duration, Instant};

/// Finalization follows finish order, not declaration order
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_finalized_in_completion_order() {
    let runner = ScriptedRunner::new()
        .with("slow", Behavior::Succeed(Duration::from_millis(400)))
        .with("fast", Behavior::Succeed(Duration::from_millis(10)))
        .with("medium", Behavior::Succeed(Duration::from_millis(200)));
    let job = job();

    let steps = vec![
        Step::script("slow", "sleep 0.4"),
        Step::script("fast", "true"),
        Step::script("medium", "sleep 0.2"),
    ];
    let run = coordinator(runner).run(units(&job, steps), &job).await;

    assert_all_completed(&run, &["slow", "fast", "medium"]);
    assert_eq!(run.completion_order(), vec!["fast", "medium", "slow"]);
    assert_eq!(run.result(), Some(TaskResult::Succeeded));
}

/// Every step in a large group is finalized exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_group_finalizes_each_step_once() {
    let mut runner = ScriptedRunner::new();
    let mut ids = Vec::new();
    for i in 0..24u64 {
        let id = format!("step-{}", i);
        runner = runner.with(&id, Behavior::Succeed(Duration::from_millis((i * 37) % 90)));
        ids.push(id);
    }
    let job = job();
    let steps = ids.iter().map(|id| Step::script(id.as_str(), "true")).collect();

    let run = coordinator(runner).run(units(&job, steps), &job).await;

    let expected: Vec<&str> = ids.iter().map(String::as_str).collect();
    assert_all_completed(&run, &expected);
    assert_eq!(job.steps_context().scope(ROOT_SCOPE).len(), 24);

    // Declaration order is recoverable regardless of finish order
    let declared: Vec<String> = run
        .into_declaration_order()
        .iter()
        .map(|unit| unit.id().to_string())
        .collect();
    assert_eq!(declared, ids);
}

/// Steps run concurrently rather than one after another
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_steps_overlap_in_time() {
    let mut runner = ScriptedRunner::new();
    let mut steps = Vec::new();
    for i in 0..5 {
        let id = format!("s{}", i);
        runner = runner.with(&id, Behavior::Succeed(Duration::from_millis(300)));
        steps.push(Step::script(id.as_str(), "sleep 0.3"));
    }
    let job = job();

    let started = Instant::now();
    let run = coordinator(runner).run(units(&job, steps), &job).await;

    assert_eq!(run.len(), 5);
    assert!(
        started.elapsed() < Duration::from_millis(1200),
        "Group took {:?}, steps did not overlap",
        started.elapsed()
    );
}

/// One failing step does not stop the others from being finalized
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_does_not_abort_group() {
    let runner = ScriptedRunner::new()
        .with("broken", Behavior::Fail(Duration::ZERO, "exit 1".to_string()))
        .with("ok", Behavior::Succeed(Duration::from_millis(100)));
    let job = job();

    let steps = vec![Step::script("broken", "false"), Step::script("ok", "true")];
    let run = coordinator(runner).run(units(&job, steps), &job).await;

    assert_all_completed(&run, &["broken", "ok"]);
    assert_eq!(result_of(&run, "broken"), Some(TaskResult::Failed));
    assert_eq!(result_of(&run, "ok"), Some(TaskResult::Succeeded));
    assert_eq!(run.result(), Some(TaskResult::Failed));

    let recorded = job.steps_context().scope(ROOT_SCOPE).get("broken").unwrap();
    assert_eq!(recorded.outcome, TaskResult::Failed);
}
