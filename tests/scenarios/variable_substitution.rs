//! Test: variable lookup and interpolation across scopes

use crate::helpers::*;
use stagehand::core::{PipelineDefinition, ShellCommand, Stage, Step, StepError};
use std::sync::Arc;

#[tokio::test]
async fn test_undefined_variable_never_becomes_empty() {
    let pipeline = PipelineDefinition::new("deploy")
        .stage(Stage::with_steps("Deploy", vec![Step::shell("kubectl set image web=$IMAGE")]));

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    assert_eq!(run.failure().2, &StepError::undefined("IMAGE"));
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_inner_scopes_shadow_outer_ones() {
    let pipeline = PipelineDefinition::new("deploy")
        .with_env("TAG", "latest")
        .with_env("IMAGE", "web")
        .stage(
            Stage::new("Build")
                .with_env("TAG", "rc")
                .step(Step::shell("build ${IMAGE}:$TAG"))
                .step(Step::Shell(
                    ShellCommand::new("build $IMAGE:$TAG").with_env("TAG", "$TAG-1"),
                )),
        )
        .stage(Stage::with_steps("Ship", vec![Step::shell("ship $IMAGE:$TAG")]));

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    assert!(run.report.succeeded());
    assert_eq!(
        invoker.commands(),
        vec!["build web:rc", "build web:rc-1", "ship web:latest"]
    );
}

#[tokio::test]
async fn test_escaped_dollar_and_shell_syntax_pass_through() {
    let pipeline = PipelineDefinition::new("misc").stage(Stage::with_steps(
        "Run",
        vec![Step::shell("echo $$HOME $(date) $1")],
    ));

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    assert!(run.report.succeeded());
    assert_eq!(invoker.commands(), vec!["echo $HOME $(date) $1"]);
}

#[tokio::test]
async fn test_builtins_and_globals_reach_the_process_env() {
    let pipeline = PipelineDefinition::new("deploy")
        .with_env("REGION", "eu-west-1")
        .stage(Stage::with_steps("Run", vec![Step::shell("echo $PIPELINE_NAME")]));

    let invoker = Arc::new(MockInvoker::new());
    run_pipeline(&pipeline, invoker.clone()).await;

    let call = &invoker.calls()[0];
    assert_eq!(call.command, "echo deploy");
    assert_eq!(call.env.get("REGION").unwrap(), "eu-west-1");
    assert_eq!(call.env.get("PIPELINE_NAME").unwrap(), "deploy");
    assert!(call.env.contains_key("WORKSPACE"));
}

#[tokio::test]
async fn test_bad_stage_environment_fails_at_first_step() {
    let pipeline = PipelineDefinition::new("deploy")
        .stage(Stage::new("Deploy").with_env("TARGET", "$CLUSTER/web").step(Step::shell("echo hi")));

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    let (stage, step_index, reason) = run.failure();
    assert_eq!((stage, step_index), ("Deploy", 0));
    assert_eq!(reason, &StepError::undefined("CLUSTER"));
    assert!(invoker.calls().is_empty());
}
