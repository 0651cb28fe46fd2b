//! Test: step and run deadlines

use crate::helpers::*;
use stagehand::core::{
    HookKind, HookOutcome, PipelineDefinition, RunOptions, ShellCommand, Stage, StageStatus,
    Step, StepError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const HANG: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_step_timeout_fails_the_step() {
    let pipeline = PipelineDefinition::new("deploy").stage(Stage::with_steps(
        "Deploy",
        vec![
            Step::shell("echo start"),
            Step::Shell(
                ShellCommand::new("kubectl rollout status deployment/web")
                    .with_timeout(Duration::from_millis(100)),
            ),
            Step::shell("echo done"),
        ],
    ));

    let invoker = Arc::new(MockInvoker::new().slow_on("rollout", HANG));
    let started = Instant::now();
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    assert!(started.elapsed() < HANG);
    let (stage, step_index, reason) = run.failure();
    assert_eq!((stage, step_index), ("Deploy", 1));
    assert!(matches!(
        reason,
        StepError::Timeout { command, .. } if command == "kubectl rollout status deployment/web"
    ));
    assert!(!invoker.commands().iter().any(|c| c == "echo done"));
}

#[tokio::test]
async fn test_default_step_timeout_comes_from_options() {
    let pipeline = PipelineDefinition::new("deploy")
        .with_options(RunOptions {
            step_timeout: Some(Duration::from_millis(100)),
            ..RunOptions::default()
        })
        .stage(Stage::with_steps("Build", vec![Step::shell("docker build .")]));

    let invoker = Arc::new(MockInvoker::new().slow_on("docker build", HANG));
    let run = run_pipeline(&pipeline, invoker).await;

    assert!(matches!(run.failure().2, StepError::Timeout { .. }));
}

#[tokio::test]
async fn test_run_timeout_fails_at_the_running_step() {
    let pipeline = PipelineDefinition::new("deploy")
        .with_options(RunOptions {
            run_timeout: Some(Duration::from_millis(200)),
            ..RunOptions::default()
        })
        .stage(Stage::with_steps("Build", vec![Step::shell("echo built")]))
        .stage(Stage::with_steps(
            "Deploy",
            vec![Step::shell("echo apply"), Step::shell("wait for rollout")],
        ))
        .on_failure(vec![Step::shell("echo cleanup")]);

    let invoker = Arc::new(MockInvoker::new().slow_on("wait for", HANG));
    let started = Instant::now();
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    assert!(started.elapsed() < HANG);
    let (stage, step_index, reason) = run.failure();
    assert_eq!((stage, step_index), ("Deploy", 1));
    assert!(matches!(reason, StepError::Timeout { command, .. } if command == "run"));

    assert_eq!(run.report.stage("Build").unwrap().status, StageStatus::Succeeded);
    assert_eq!(run.report.stage("Deploy").unwrap().status, StageStatus::Failed);

    assert_eq!(run.report.hook.kind, HookKind::Failure);
    assert_eq!(run.report.hook.outcome, HookOutcome::Succeeded);
    assert_eq!(invoker.commands().last().unwrap(), "echo cleanup");
}
