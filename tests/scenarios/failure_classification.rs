//! Test: Failure Classification - timeout, cancellation, failure and result merging

use crate::helpers::*;
use jobrunner::core::{Step, TaskResult};
use jobrunner::execution::TIMEOUT_MESSAGE;
use std::time::Duration;

/// A step's own deadline is a timeout: failed, with the timeout message
#[tokio::test(flavor = "multi_thread")]
async fn test_step_timeout_is_failed() {
    let runner = ScriptedRunner::new()
        .with("hang", Behavior::WaitForCancel)
        .with("quick", Behavior::Succeed(Duration::from_millis(10)));
    let job = job();

    let steps = vec![Step::script("hang", "sleep 600"), Step::script("quick", "true")];
    let mut units = units(&job, steps);
    units[0].context.set_timeout(Some(Duration::from_millis(50)));

    let run = tokio::time::timeout(Duration::from_secs(10), coordinator(runner).run(units, &job))
        .await
        .expect("group should finish once the deadline fires");

    assert_all_completed(&run, &["hang", "quick"]);
    assert_eq!(result_of(&run, "hang"), Some(TaskResult::Failed));
    assert_eq!(errors_of(&run, "hang"), vec![TIMEOUT_MESSAGE.to_string()]);
    assert_eq!(result_of(&run, "quick"), Some(TaskResult::Succeeded));
    assert!(!job.cancellation_token().is_cancelled());
}

/// Cancelling the job cancels running steps instead of timing them out
#[tokio::test(flavor = "multi_thread")]
async fn test_job_cancellation_is_cancelled() {
    let runner = ScriptedRunner::new()
        .with("first", Behavior::WaitForCancel)
        .with("second", Behavior::WaitForCancel)
        .with("done", Behavior::Succeed(Duration::ZERO));
    let job = job();

    let token = job.cancellation_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let steps = vec![
        Step::script("first", "sleep 600"),
        Step::script("second", "sleep 600"),
        Step::script("done", "true"),
    ];
    let run = tokio::time::timeout(
        Duration::from_secs(10),
        coordinator(runner).run(units(&job, steps), &job),
    )
    .await
    .expect("group should finish after cancellation");

    assert_all_completed(&run, &["first", "second", "done"]);
    for id in ["first", "second"] {
        assert_eq!(result_of(&run, id), Some(TaskResult::Cancelled));
        assert!(errors_of(&run, id).iter().all(|e| e != TIMEOUT_MESSAGE));
    }
    assert_eq!(result_of(&run, "done"), Some(TaskResult::Succeeded));
    assert_eq!(run.result(), Some(TaskResult::Cancelled));
}

/// Timeout and job cancellation in the same group stay distinguishable
#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_and_cancel_side_by_side() {
    let runner = ScriptedRunner::new()
        .with("deadline", Behavior::WaitForCancel)
        .with("victim", Behavior::WaitForCancel);
    let job = job();

    let mut units = units(&job, vec![Step::script("deadline", "x"), Step::script("victim", "y")]);
    units[0].context.set_timeout(Some(Duration::from_millis(20)));

    let token = job.cancellation_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();
    });

    let run = coordinator(runner).run(units, &job).await;

    assert_eq!(result_of(&run, "deadline"), Some(TaskResult::Failed));
    assert_eq!(result_of(&run, "victim"), Some(TaskResult::Cancelled));
    assert_eq!(run.completion_order(), vec!["deadline", "victim"]);
}

/// Runtime errors and panics are contained as failures
#[tokio::test(flavor = "multi_thread")]
async fn test_runtime_failure_and_panic_are_failed() {
    let runner = ScriptedRunner::new()
        .with(
            "error",
            Behavior::Fail(
                Duration::ZERO,
                "Process completed with exit code 2.".to_string(),
            ),
        )
        .with("panic", Behavior::Panic);
    let job = job();

    let steps = vec![
        Step::script("error", "exit 2"),
        Step::script("panic", "true"),
        Step::script("fine", "true"),
    ];
    let run = coordinator(runner).run(units(&job, steps), &job).await;

    assert_all_completed(&run, &["error", "panic", "fine"]);
    assert_eq!(result_of(&run, "error"), Some(TaskResult::Failed));
    assert_eq!(errors_of(&run, "error"), vec!["Process completed with exit code 2.".to_string()]);
    assert_eq!(result_of(&run, "panic"), Some(TaskResult::Failed));
    assert!(errors_of(&run, "panic")[0].contains("scripted panic"));
    assert_eq!(result_of(&run, "fine"), Some(TaskResult::Succeeded));
}

/// The command result merges with the direct result, worse wins
#[tokio::test(flavor = "multi_thread")]
async fn test_command_result_merge() {
    let runner = ScriptedRunner::new()
        .with(
            "override-failed",
            Behavior::Results {
                direct: TaskResult::Succeeded,
                command: TaskResult::Failed,
            },
        )
        .with(
            "both-succeeded",
            Behavior::Results {
                direct: TaskResult::Succeeded,
                command: TaskResult::Succeeded,
            },
        )
        .with(
            "with-issues",
            Behavior::Results {
                direct: TaskResult::Succeeded,
                command: TaskResult::SucceededWithIssues,
            },
        )
        .with(
            "cancel-vs-fail",
            Behavior::Results {
                direct: TaskResult::Failed,
                command: TaskResult::Cancelled,
            },
        );
    let job = job();

    let steps = ["override-failed", "both-succeeded", "with-issues", "cancel-vs-fail"]
        .into_iter()
        .map(|id| Step::script(id, "true"))
        .collect();
    let run = coordinator(runner).run(units(&job, steps), &job).await;

    assert_eq!(result_of(&run, "override-failed"), Some(TaskResult::Failed));
    assert_eq!(result_of(&run, "both-succeeded"), Some(TaskResult::Succeeded));
    assert_eq!(result_of(&run, "with-issues"), Some(TaskResult::SucceededWithIssues));
    assert_eq!(result_of(&run, "cancel-vs-fail"), Some(TaskResult::Failed));
}

/// continue_on_error changes the conclusion, not the outcome
#[tokio::test(flavor = "multi_thread")]
async fn test_continue_on_error_conclusion() {
    let runner =
        ScriptedRunner::new().with("flaky", Behavior::Fail(Duration::ZERO, "flake".to_string()));
    let job = job();

    let mut step = Step::script("flaky", "false");
    step.common_mut().continue_on_error = true;
    let run = coordinator(runner).run(units(&job, vec![step]), &job).await;

    let unit = unit_for(&run, "flaky");
    assert_eq!(unit.context.result(), Some(TaskResult::Failed));
    assert_eq!(unit.context.conclusion(), Some(TaskResult::Succeeded));
    assert_eq!(run.result(), Some(TaskResult::Succeeded));
}
