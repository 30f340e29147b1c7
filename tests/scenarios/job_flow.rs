//! Test: Job Flow - sequential steps, parallel groups, conditions and events

use crate::helpers::*;
use jobrunner::core::config::JobConfig;
use jobrunner::core::TaskResult;
use jobrunner::execution::ExecutionEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const JOB: &str = r#"
name: "Release"
env:
  CHANNEL: stable
steps:
  - type: script
    id: build
    run: cargo build --release
  - type: parallel
    id: checks
    outputs:
      Coverage: "${{ steps.coverage.outputs.percent }}"
    steps:
      - type: script
        id: lint
        run: cargo clippy
      - type: script
        id: coverage
        run: cargo tarpaulin
      - type: script
        id: flaky
        run: ./flaky.sh
        continue_on_error: true
  - type: action
    id: publish
    uses: owner/publish@v1
    if: env.CHANNEL == 'stable'
    env:
      COVERAGE: "${{ steps.checks.outputs.coverage }}"
  - type: script
    id: notify-failure
    run: ./notify.sh
    if: failure()
"#;

/// Groups aggregate their children and later steps see group outputs
#[tokio::test(flavor = "multi_thread")]
async fn test_release_job() {
    let runner = ScriptedRunner::new()
        .with("lint", Behavior::Succeed(Duration::from_millis(50)))
        .with("coverage", Behavior::Output("percent".to_string(), "87".to_string()))
        .with("flaky", Behavior::Fail(Duration::from_millis(10), "flaked".to_string()));
    let config = JobConfig::from_yaml(JOB).unwrap();
    let job = config.to_job_context(&[], CancellationToken::new());

    let report = job_runner(runner.clone()).run(&config.steps, &job).await;

    assert_eq!(report.result(), TaskResult::Succeeded);
    let ids: Vec<&str> = report.steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(ids, vec!["build", "checks", "publish", "notify-failure"]);

    let checks = &report.steps[1];
    assert_eq!(checks.conclusion, TaskResult::Succeeded);
    assert_eq!(checks.children.len(), 3);
    assert_eq!(checks.children[2].outcome, TaskResult::Failed);
    assert_eq!(checks.children[2].conclusion, TaskResult::Succeeded);
    assert_eq!(checks.outputs.get("coverage").map(String::as_str), Some("87"));

    assert_eq!(report.steps[2].conclusion, TaskResult::Succeeded);
    assert_eq!(
        runner.record_for("publish").env.get("COVERAGE").map(String::as_str),
        Some("87")
    );
    assert_eq!(report.steps[3].conclusion, TaskResult::Skipped);
}

/// A failing child fails the group, later steps are skipped and failure() runs
#[tokio::test(flavor = "multi_thread")]
async fn test_failed_group_fails_job() {
    let runner = ScriptedRunner::new().with(
        "lint",
        Behavior::Fail(Duration::ZERO, "warnings".to_string()),
    );
    let config = JobConfig::from_yaml(JOB).unwrap();
    let job = config.to_job_context(&[], CancellationToken::new());

    let report = job_runner(runner.clone()).run(&config.steps, &job).await;

    assert_eq!(report.result(), TaskResult::Failed);
    assert_eq!(report.steps[1].conclusion, TaskResult::Failed);
    assert_eq!(report.steps[2].conclusion, TaskResult::Skipped);
    assert_eq!(report.steps[3].conclusion, TaskResult::Succeeded);
    assert!(runner.records().iter().all(|r| r.step_id != "publish"));
}

/// Overrides from the command line feed conditions
#[tokio::test(flavor = "multi_thread")]
async fn test_env_override_changes_condition() {
    let runner = ScriptedRunner::new();
    let config = JobConfig::from_yaml(JOB).unwrap();
    let job = config.to_job_context(
        &[("channel".to_string(), "nightly".to_string())],
        CancellationToken::new(),
    );

    let report = job_runner(runner).run(&config.steps, &job).await;

    assert_eq!(report.steps[2].step_id, "publish");
    assert_eq!(report.steps[2].conclusion, TaskResult::Skipped);
    assert_eq!(report.result(), TaskResult::Succeeded);
}

/// Handlers see start, per-child completion and the job result
#[tokio::test(flavor = "multi_thread")]
async fn test_events_cover_group_children() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let runner = job_runner(ScriptedRunner::new());
    runner
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;

    let config = JobConfig::from_yaml(JOB).unwrap();
    let job = config.to_job_context(&[], CancellationToken::new());
    runner.run(&config.steps, &job).await;

    let events = events.lock().unwrap();
    let completed: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::StepCompleted { step_id, .. } => Some(step_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(completed.len(), 6);
    assert!(completed.contains(&"lint") && completed.contains(&"coverage"));
    assert!(events.iter().any(|event| matches!(
        event,
        ExecutionEvent::StepSkipped { step_id } if step_id == "notify-failure"
    )));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::JobCompleted { result: TaskResult::Succeeded, .. })
    ));
}

/// Cancelling the job marks the job cancelled and skips what is left
#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_job() {
    let runner = ScriptedRunner::new().with("build", Behavior::WaitForCancel);
    let config = JobConfig::from_yaml(JOB).unwrap();
    let token = CancellationToken::new();
    let job = config.to_job_context(&[], token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let report = job_runner(runner).run(&config.steps, &job).await;

    assert_eq!(report.steps[0].conclusion, TaskResult::Cancelled);
    assert_eq!(report.steps[1].conclusion, TaskResult::Skipped);
    assert_eq!(report.result(), TaskResult::Cancelled);
}

/// A child whose condition is false is skipped and never launched
#[tokio::test(flavor = "multi_thread")]
async fn test_group_child_condition() {
    let yaml = r#"
name: "Conditional children"
env:
  TARGET: staging
steps:
  - type: parallel
    id: deploy
    steps:
      - type: script
        id: staging
        run: ./deploy.sh staging
        if: env.TARGET == 'staging'
      - type: script
        id: production
        run: ./deploy.sh production
        if: env.DEPLOY == 'yes'
      - type: script
        id: smoke
        run: ./smoke.sh
"#;
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let runner = ScriptedRunner::new();
    let job_runner = job_runner(runner.clone());
    job_runner
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;

    let config = JobConfig::from_yaml(yaml).unwrap();
    let job = config.to_job_context(&[], CancellationToken::new());
    let report = job_runner.run(&config.steps, &job).await;

    let group = &report.steps[0];
    let children: Vec<(&str, TaskResult)> = group
        .children
        .iter()
        .map(|child| (child.step_id.as_str(), child.conclusion))
        .collect();
    assert_eq!(
        children,
        vec![
            ("staging", TaskResult::Succeeded),
            ("production", TaskResult::Skipped),
            ("smoke", TaskResult::Succeeded),
        ]
    );
    assert_eq!(group.conclusion, TaskResult::Succeeded);
    assert!(runner.records().iter().all(|r| r.step_id != "production"));
    assert!(events.lock().unwrap().iter().any(|event| matches!(
        event,
        ExecutionEvent::StepSkipped { step_id } if step_id == "production"
    )));
    assert_eq!(report.result(), TaskResult::Succeeded);
}

/// Group children see the job status from before the group started
#[tokio::test(flavor = "multi_thread")]
async fn test_group_children_after_failure() {
    let yaml = r#"
name: "Cleanup"
steps:
  - type: script
    id: build
    run: cargo build
  - type: parallel
    id: cleanup
    if: always()
    steps:
      - type: script
        id: report
        run: ./report.sh
        if: failure()
      - type: script
        id: upload
        run: ./upload.sh
"#;
    let runner = ScriptedRunner::new().with(
        "build",
        Behavior::Fail(Duration::ZERO, "broken".to_string()),
    );
    let config = JobConfig::from_yaml(yaml).unwrap();
    let job = config.to_job_context(&[], CancellationToken::new());

    let report = job_runner(runner.clone()).run(&config.steps, &job).await;

    let cleanup = &report.steps[1];
    assert_eq!(cleanup.children[0].conclusion, TaskResult::Succeeded);
    assert_eq!(cleanup.children[1].conclusion, TaskResult::Skipped);
    assert_eq!(cleanup.conclusion, TaskResult::Succeeded);
    assert_eq!(report.result(), TaskResult::Failed);
}

/// End to end through real shell processes
#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_shell_job_end_to_end() {
    use jobrunner::execution::JobRunner;

    let yaml = r#"
name: "Shell"
env:
  GREETING: hello
steps:
  - type: parallel
    id: fan-out
    outputs:
      joined: "${{ steps.left.outputs.word }} ${{ steps.right.outputs.word }}"
    steps:
      - type: script
        id: left
        run: |
          sleep 0.2
          echo "::set-output name=word::$GREETING"
      - type: script
        id: right
        run: echo "::set-output name=word::world"
  - type: script
    id: fails
    run: exit 4
    continue_on_error: true
"#;
    let config = JobConfig::from_yaml(yaml).unwrap();
    let job = config.to_job_context(&[], CancellationToken::new());

    let report = JobRunner::with_shell(Some("sh".to_string()))
        .run(&config.steps, &job)
        .await;

    assert_eq!(report.result(), TaskResult::Succeeded);
    assert_eq!(
        report.steps[0].outputs.get("joined").map(String::as_str),
        Some("hello world")
    );
    assert_eq!(report.steps[1].outcome, TaskResult::Failed);
    assert_eq!(
        report.steps[1].errors,
        vec!["Process completed with exit code 4.".to_string()]
    );
}
