//! Test: stages and steps run strictly in declaration order

use crate::helpers::*;
use stagehand::core::{ExecutionResult, HookKind, HookOutcome, PipelineDefinition, Stage, StageStatus, Step};
use stagehand::execution::ExecutionEvent;
use std::sync::Arc;

fn three_stages() -> PipelineDefinition {
    PipelineDefinition::new("ordered")
        .stage(Stage::with_steps(
            "Build",
            vec![Step::shell("echo build-1"), Step::shell("echo build-2")],
        ))
        .stage(Stage::with_steps("Test", vec![Step::shell("echo test")]))
        .stage(Stage::with_steps("Ship", vec![Step::shell("echo ship")]))
}

#[tokio::test]
async fn test_steps_run_in_declaration_order() {
    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&three_stages(), invoker.clone()).await;

    assert!(run.report.succeeded());
    assert_eq!(
        invoker.commands(),
        vec!["echo build-1", "echo build-2", "echo test", "echo ship"]
    );
    assert!(run
        .report
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Succeeded));
}

#[tokio::test]
async fn test_stage_events_never_interleave() {
    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&three_stages(), invoker).await;

    let stage_events: Vec<String> = run
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StageStarted { stage, .. } => Some(format!("start {}", stage)),
            ExecutionEvent::StageCompleted { stage, .. } => Some(format!("end {}", stage)),
            _ => None,
        })
        .collect();

    assert_eq!(
        stage_events,
        vec![
            "start Build",
            "end Build",
            "start Test",
            "end Test",
            "start Ship",
            "end Ship"
        ]
    );
    assert!(matches!(
        run.events.first(),
        Some(ExecutionEvent::PipelineStarted { stage_count: 3, .. })
    ));
    assert!(matches!(
        run.events.last(),
        Some(ExecutionEvent::PipelineCompleted {
            result: ExecutionResult::Success,
            ..
        })
    ));
}

#[tokio::test]
async fn test_success_without_hooks_reports_not_defined() {
    let run = run_pipeline(&three_stages(), Arc::new(MockInvoker::new())).await;

    assert_eq!(run.report.hook.kind, HookKind::Success);
    assert_eq!(run.report.hook.outcome, HookOutcome::NotDefined);
}

#[tokio::test]
async fn test_same_pipeline_runs_identically_twice() {
    let pipeline = three_stages()
        .with_env("IMAGE", "web")
        .stage(Stage::with_steps("Tag", vec![Step::shell("docker tag $IMAGE web:1")]));

    let first = Arc::new(MockInvoker::new());
    let second = Arc::new(MockInvoker::new());
    let a = run_pipeline(&pipeline, first.clone()).await;
    let b = run_pipeline(&pipeline, second.clone()).await;

    assert_eq!(a.report.result, b.report.result);
    assert_eq!(first.commands(), second.commands());
    assert_ne!(a.report.execution_id, b.report.execution_id);
}
