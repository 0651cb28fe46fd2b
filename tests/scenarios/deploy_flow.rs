//! Test: a YAML-defined build, push and deploy pipeline end to end

use crate::helpers::*;
use stagehand::core::config::PipelineConfig;
use stagehand::core::{HookKind, PipelineDefinition};
use stagehand::credentials::StaticCredentialProvider;
use stagehand::execution::ExecutionEngine;
use std::path::Path;
use std::sync::Arc;

fn deploy_yaml(checkout_dir: &Path) -> String {
    format!(
        r#"
name: web-deploy
environment:
  IMAGE: web
  REGISTRY: registry.example.com
scm:
  repository: https://git.example.com/web.git
  branch: main
  directory: "{}"
stages:
  - name: Checkout
    steps:
      - checkout
  - name: Build
    steps:
      - build: {{ image: "$IMAGE" }}
  - name: Push
    steps:
      - with_credentials:
          id: reg-cred
          steps:
            - push: {{ image: "$IMAGE", tag: latest, registry: "$REGISTRY" }}
  - name: Deploy
    environment: {{ AWS_REGION: us-east-1 }}
    steps:
      - with_credentials:
          id: aws-cred
          steps:
            - update_kubeconfig: {{ region: "$AWS_REGION", cluster: prod }}
            - apply: {{ manifests: [deployment.yaml, service.yaml] }}
      - sh: kubectl rollout status deployment/$IMAGE
post:
  success:
    - sh: echo deployed $IMAGE
  failure:
    - sh: echo failed in $FAILED_STAGE
"#,
        checkout_dir.display()
    )
}

fn load(checkout_dir: &Path) -> PipelineDefinition {
    PipelineConfig::from_yaml(&deploy_yaml(checkout_dir))
        .unwrap()
        .to_pipeline()
}

#[tokio::test]
async fn test_full_deploy_runs_every_collaborator() {
    let dir = tempfile::tempdir().unwrap();
    let checkout_dir = dir.path().join("web");
    let pipeline = load(&checkout_dir);

    let invoker = Arc::new(MockInvoker::new());
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    assert!(run.report.succeeded(), "{:?}", run.report.result);
    assert_eq!(
        invoker.commands(),
        vec![
            format!(
                "git clone --branch main https://git.example.com/web.git {}",
                checkout_dir.display()
            ),
            "docker build -t web .".to_string(),
            "docker tag web registry.example.com/web:latest && docker push registry.example.com/web:latest"
                .to_string(),
            "aws eks update-kubeconfig --region us-east-1 --name prod".to_string(),
            "kubectl apply -f deployment.yaml -f service.yaml".to_string(),
            "kubectl rollout status deployment/web".to_string(),
            "echo deployed web".to_string(),
        ]
    );
    assert_eq!(run.report.hook.kind, HookKind::Success);
}

#[tokio::test]
async fn test_credentials_reach_only_their_collaborators() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&dir.path().join("web"));

    let invoker = Arc::new(MockInvoker::new());
    run_pipeline(&pipeline, invoker.clone()).await;

    let calls = invoker.calls();
    let env_of = |prefix: &str| {
        calls
            .iter()
            .find(|c| c.command.starts_with(prefix))
            .map(|c| c.env.clone())
            .unwrap()
    };

    assert!(env_of("docker tag").contains_key("REGISTRY_TOKEN"));
    assert!(!env_of("docker tag").contains_key("AWS_SECRET_ACCESS_KEY"));
    assert!(env_of("kubectl apply").contains_key("AWS_SECRET_ACCESS_KEY"));
    assert!(!env_of("kubectl apply").contains_key("REGISTRY_TOKEN"));
    assert!(!env_of("kubectl rollout").contains_key("AWS_SECRET_ACCESS_KEY"));
    assert!(!env_of("docker build").contains_key("REGISTRY_TOKEN"));
}

#[tokio::test]
async fn test_failed_apply_runs_failure_hook_with_location() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&dir.path().join("web"));

    let invoker = Arc::new(MockInvoker::new().fail_on("kubectl apply"));
    let run = run_pipeline(&pipeline, invoker.clone()).await;

    let (stage, step_index, _) = run.failure();
    assert_eq!((stage, step_index), ("Deploy", 0));
    let commands = invoker.commands();
    assert!(!commands.iter().any(|c| c.contains("rollout")));
    assert_eq!(commands.last().unwrap(), "echo failed in Deploy");
}

#[tokio::test]
async fn test_pipeline_and_credentials_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("registry-token");
    std::fs::write(&token_path, "from-disk-token\n").unwrap();
    std::fs::write(
        dir.path().join("credentials.yaml"),
        format!(
            "credentials:\n  reg-cred:\n    REGISTRY_TOKEN:\n      from_file: \"{}\"\n",
            token_path.display()
        ),
    )
    .unwrap();

    let pipeline_path = dir.path().join("pipeline.yaml");
    std::fs::write(
        &pipeline_path,
        r#"
name: push-only
credentials_file: credentials.yaml
stages:
  - name: Push
    steps:
      - with_credentials:
          id: reg-cred
          steps:
            - sh: docker login -p $REGISTRY_TOKEN registry.example.com
"#,
    )
    .unwrap();

    let config = PipelineConfig::from_file(&pipeline_path).unwrap();
    let provider =
        StaticCredentialProvider::from_file(config.credentials_path().unwrap()).unwrap();

    let invoker = Arc::new(MockInvoker::new());
    let engine = ExecutionEngine::new(invoker.clone(), provider);
    let report = engine.execute(&config.to_pipeline()).await;

    assert!(report.succeeded());
    assert_eq!(
        invoker.commands(),
        vec!["docker login -p from-disk-token registry.example.com"]
    );
}
