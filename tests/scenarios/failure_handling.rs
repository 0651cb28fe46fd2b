//! Test: failure aborts the run and selects exactly one hook

use crate::helpers::*;
use stagehand::core::{
    HookKind, HookOutcome, PipelineDefinition, RunState, Stage, StageStatus, Step, StepError,
};
use stagehand::invoke::CheckoutSpec;
use std::sync::Arc;

fn pipeline_with_hooks() -> PipelineDefinition {
    PipelineDefinition::new("deploy")
        .stage(Stage::with_steps("Build", vec![Step::shell("docker build -t web .")]))
        .stage(Stage::with_steps(
            "Push",
            vec![
                Step::shell("docker tag web registry/web"),
                Step::shell("docker push registry/web"),
                Step::shell("echo pushed"),
            ],
        ))
        .stage(Stage::with_steps("Deploy", vec![Step::shell("kubectl apply -f k8s")]))
        .on_success(vec![Step::shell("notify ok")])
        .on_failure(vec![Step::shell(
            "notify $PIPELINE_STATUS in $FAILED_STAGE at $FAILED_STEP",
        )])
}

#[tokio::test]
async fn test_failure_aborts_remaining_stages() {
    let invoker = Arc::new(MockInvoker::new().fail_on("docker push"));
    let run = run_pipeline(&pipeline_with_hooks(), invoker.clone()).await;

    let (stage, step_index, reason) = run.failure();
    assert_eq!(stage, "Push");
    assert_eq!(step_index, 1);
    assert!(matches!(
        reason,
        StepError::StepExecution {
            exit_code: Some(1),
            ..
        }
    ));

    let commands = invoker.commands();
    assert!(!commands.iter().any(|c| c == "echo pushed"));
    assert!(!commands.iter().any(|c| c.starts_with("kubectl")));

    assert_eq!(run.report.stage("Build").unwrap().status, StageStatus::Succeeded);
    assert_eq!(run.report.stage("Push").unwrap().status, StageStatus::Failed);
    assert_eq!(run.report.stage("Deploy").unwrap().status, StageStatus::NotRun);
    assert_eq!(
        run.report.state,
        RunState::Failed {
            stage_index: 1,
            step_index: 1
        }
    );
}

#[tokio::test]
async fn test_exactly_one_hook_runs() {
    let failing = Arc::new(MockInvoker::new().fail_on("kubectl"));
    let run = run_pipeline(&pipeline_with_hooks(), failing.clone()).await;

    let commands = failing.commands();
    assert_eq!(commands.last().unwrap(), "notify FAILURE in Deploy at 0");
    assert!(!commands.iter().any(|c| c == "notify ok"));
    assert_eq!(run.report.hook.kind, HookKind::Failure);
    assert_eq!(run.report.hook.outcome, HookOutcome::Succeeded);

    let passing = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline_with_hooks(), passing.clone()).await;

    let commands = passing.commands();
    assert_eq!(commands.last().unwrap(), "notify ok");
    assert!(!commands.iter().any(|c| c.contains("FAILURE")));
    assert_eq!(run.report.hook.kind, HookKind::Success);
}

#[tokio::test]
async fn test_hook_failure_keeps_the_verdict() {
    let invoker = Arc::new(MockInvoker::new().fail_on("notify ok"));
    let run = run_pipeline(&pipeline_with_hooks(), invoker).await;

    assert!(run.report.succeeded());
    assert!(matches!(run.report.hook.outcome, HookOutcome::Failed(_)));
    assert_eq!(run.report.state, RunState::Succeeded);
}

#[tokio::test]
async fn test_failure_hook_failure_keeps_original_reason() {
    let invoker = Arc::new(MockInvoker::new().fail_on("docker build").fail_on("notify"));
    let run = run_pipeline(&pipeline_with_hooks(), invoker).await;

    let (stage, step_index, _) = run.failure();
    assert_eq!((stage, step_index), ("Build", 0));
    assert_eq!(run.report.hook.kind, HookKind::Failure);
    assert!(matches!(run.report.hook.outcome, HookOutcome::Failed(_)));
}

#[tokio::test]
async fn test_failure_diagnostic_includes_stderr() {
    let invoker = Arc::new(MockInvoker::new().fail_on("docker build"));
    let run = run_pipeline(&pipeline_with_hooks(), invoker).await;

    let (_, _, reason) = run.failure();
    let text = reason.to_string();
    assert!(text.contains("exited with code 1"));
    assert!(text.contains("command failed"));
}

#[tokio::test]
async fn test_failed_checkout_aborts_the_run() {
    let pipeline = PipelineDefinition::new("deploy")
        .with_scm(
            CheckoutSpec::new("https://git.example.com/web.git")
                .with_directory("/nonexistent/stagehand-checkout"),
        )
        .stage(Stage::with_steps("Checkout", vec![Step::checkout()]))
        .stage(Stage::with_steps("Build", vec![Step::shell("docker build -t web .")]))
        .on_failure(vec![Step::shell("notify $FAILED_STAGE at $FAILED_STEP")]);

    let invoker = Arc::new(MockInvoker::new().fail_on("clone"));
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    let (stage, step_index, reason) = run.failure();
    assert_eq!(stage, "Checkout");
    assert_eq!(step_index, 0);
    assert!(matches!(reason, StepError::StepExecution { command, .. } if command == "checkout"));

    assert_eq!(
        invoker.commands(),
        vec![
            "git clone https://git.example.com/web.git /nonexistent/stagehand-checkout",
            "notify Checkout at 0",
        ]
    );
    assert_eq!(run.report.stage("Build").unwrap().status, StageStatus::NotRun);
    assert_eq!(run.report.hook.kind, HookKind::Failure);
    assert_eq!(run.report.hook.outcome, HookOutcome::Succeeded);
}
