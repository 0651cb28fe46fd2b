//! Test: credential bindings exist only inside their block

use crate::helpers::*;
use stagehand::core::{PipelineDefinition, Stage, Step, StepError};
use stagehand::execution::ExecutionEvent;
use std::sync::Arc;

#[tokio::test]
async fn test_binding_is_visible_inside_the_block() {
    let pipeline = PipelineDefinition::new("push").stage(Stage::with_steps(
        "Push",
        vec![Step::with_credentials(
            "reg-cred",
            vec![Step::shell("docker login -p $REGISTRY_TOKEN registry")],
        )],
    ));

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    assert!(run.report.succeeded());
    let calls = invoker.calls();
    assert_eq!(calls[0].command, "docker login -p s3cr3t-token registry");
    assert_eq!(calls[0].env.get("REGISTRY_TOKEN").unwrap(), "s3cr3t-token");
}

#[tokio::test]
async fn test_binding_does_not_leak_to_later_siblings() {
    let pipeline = PipelineDefinition::new("push").stage(Stage::with_steps(
        "Push",
        vec![
            Step::with_credentials("reg-cred", vec![Step::shell("docker push web")]),
            Step::shell("echo $REGISTRY_TOKEN"),
        ],
    ));

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    let (stage, step_index, reason) = run.failure();
    assert_eq!((stage, step_index), ("Push", 1));
    assert_eq!(reason, &StepError::undefined("REGISTRY_TOKEN"));
    assert_eq!(invoker.commands(), vec!["docker push web"]);
}

#[tokio::test]
async fn test_binding_is_absent_from_later_stage_environments() {
    let pipeline = PipelineDefinition::new("push")
        .stage(Stage::with_steps(
            "Push",
            vec![Step::with_credentials("reg-cred", vec![Step::shell("docker push web")])],
        ))
        .stage(Stage::with_steps("Deploy", vec![Step::shell("kubectl apply -f k8s")]));

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    assert!(run.report.succeeded());
    let calls = invoker.calls();
    assert!(calls[0].env.contains_key("REGISTRY_TOKEN"));
    assert!(!calls[1].env.contains_key("REGISTRY_TOKEN"));
}

#[tokio::test]
async fn test_binding_is_released_when_the_block_fails() {
    let pipeline = PipelineDefinition::new("push")
        .stage(Stage::with_steps(
            "Push",
            vec![Step::with_credentials("reg-cred", vec![Step::shell("docker push web")])],
        ))
        .on_failure(vec![Step::shell("echo $REGISTRY_TOKEN")]);

    let invoker = Arc::new(MockInvoker::new().fail_on("docker push"));
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    let (stage, _, _) = run.failure();
    assert_eq!(stage, "Push");
    assert!(matches!(
        run.report.hook.outcome,
        stagehand::core::HookOutcome::Failed(StepError::UndefinedVariable { .. })
    ));

    let exited = run.events.iter().any(|e| {
        matches!(e, ExecutionEvent::CredentialScopeExited { credential, .. } if credential == "reg-cred")
    });
    assert!(exited);
}

#[tokio::test]
async fn test_unknown_credential_fails_the_step() {
    let pipeline = PipelineDefinition::new("push").stage(Stage::with_steps(
        "Push",
        vec![
            Step::shell("echo before"),
            Step::with_credentials("missing-cred", vec![Step::shell("docker push web")]),
        ],
    ));

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    let (_, step_index, reason) = run.failure();
    assert_eq!(step_index, 1);
    assert!(matches!(
        reason,
        StepError::CredentialResolution { credential, .. } if credential == "missing-cred"
    ));
    assert_eq!(invoker.commands(), vec!["echo before"]);
}

#[tokio::test]
async fn test_secret_values_are_masked_in_output() {
    let pipeline = PipelineDefinition::new("push").stage(Stage::with_steps(
        "Push",
        vec![Step::with_credentials(
            "reg-cred",
            vec![
                Step::shell("echo token=$REGISTRY_TOKEN"),
                Step::shell("fail with $REGISTRY_TOKEN"),
            ],
        )],
    ));

    let invoker = Arc::new(MockInvoker::new().fail_on("fail with"));
    let run = run_pipeline(&pipeline, invoker).await;

    assert_eq!(run.outputs(), vec!["echo token=****\n"]);
    let (_, _, reason) = run.failure();
    let text = reason.to_string();
    assert!(!text.contains("s3cr3t-token"));
    assert!(text.contains("****"));
}

#[tokio::test]
async fn test_nested_scopes_shadow_and_restore() {
    let pipeline = PipelineDefinition::new("deploy").stage(Stage::with_steps(
        "Deploy",
        vec![Step::with_credentials(
            "reg-cred",
            vec![
                Step::with_credentials("aws-cred", vec![Step::shell("aws $AWS_ACCESS_KEY_ID $REGISTRY_TOKEN")]),
                Step::shell("echo $REGISTRY_TOKEN"),
                Step::shell("echo $AWS_ACCESS_KEY_ID"),
            ],
        )],
    ));

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    assert_eq!(
        invoker.commands(),
        vec!["aws AKIAEXAMPLE s3cr3t-token", "echo s3cr3t-token"]
    );
    assert_eq!(run.failure().2, &StepError::undefined("AWS_ACCESS_KEY_ID"));
}
