//! Test utilities for stagehand scenarios

use async_trait::async_trait;
use stagehand::core::{ExecutionResult, PipelineDefinition, RunReport, StepError};
use stagehand::credentials::StaticCredentialProvider;
use stagehand::execution::{ExecutionEngine, ExecutionEvent};
use stagehand::invoke::{CommandInvoker, Invocation, InvocationOutput, InvokeError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One invocation seen by the mock
#[derive(Debug, Clone)]
pub struct Call {
    /// Shell script, or `program arg...` for direct invocations such as git
    pub command: String,
    pub env: BTreeMap<String, String>,
}

/// Invoker that records every call instead of spawning processes
///
/// Commands succeed and echo themselves on stdout unless they contain one of
/// the configured failure patterns.
#[derive(Default)]
pub struct MockInvoker {
    calls: Mutex<Vec<Call>>,
    fail_on: Vec<String>,
    slow_on: Vec<(String, Duration)>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command containing `pattern`
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.fail_on.push(pattern.to_string());
        self
    }

    /// Delay every command containing `pattern`
    pub fn slow_on(mut self, pattern: &str, delay: Duration) -> Self {
        self.slow_on.push((pattern.to_string(), delay));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }
}

#[async_trait]
impl CommandInvoker for MockInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<InvocationOutput, InvokeError> {
        let command = match invocation.args.first().map(String::as_str) {
            Some("-c") => invocation.script().unwrap_or_default().to_string(),
            _ => format!("{} {}", invocation.program, invocation.args.join(" ")),
        };
        self.calls.lock().unwrap().push(Call {
            command: command.clone(),
            env: invocation.env.clone(),
        });

        if let Some((_, delay)) = self.slow_on.iter().find(|(p, _)| command.contains(p)) {
            tokio::time::sleep(*delay).await;
        }

        if self.fail_on.iter().any(|p| command.contains(p)) {
            return Ok(InvocationOutput::failure(1, format!("{}: command failed", command)));
        }
        Ok(InvocationOutput::success(format!("{}\n", command)))
    }
}

/// Outcome of a test run
pub struct TestRun {
    pub report: RunReport,
    pub events: Vec<ExecutionEvent>,
}

impl TestRun {
    /// Stage and top-level step of the failure, panicking on success
    pub fn failure(&self) -> (&str, usize, &StepError) {
        match &self.report.result {
            ExecutionResult::Failure {
                stage,
                step_index,
                reason,
            } => (stage.as_str(), *step_index, reason),
            ExecutionResult::Success => panic!("expected the run to fail"),
        }
    }

    /// Output of every `StepOutput` event, in order
    pub fn outputs(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::StepOutput { output, .. } => Some(output.clone()),
                _ => None,
            })
            .collect()
    }
}

pub fn credentials() -> StaticCredentialProvider {
    StaticCredentialProvider::new()
        .with_credential("reg-cred", [("REGISTRY_TOKEN", "s3cr3t-token")])
        .with_credential(
            "aws-cred",
            [
                ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"),
                ("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI"),
            ],
        )
}

/// Run a pipeline with the given invoker and the standard test credentials
pub async fn run_pipeline(pipeline: &PipelineDefinition, invoker: Arc<MockInvoker>) -> TestRun {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let mut engine = ExecutionEngine::new(invoker, credentials());
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let report = engine.execute(pipeline).await;
    let events = events.lock().unwrap().clone();
    TestRun { report, events }
}
