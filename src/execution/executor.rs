//! Step runner - executes one leaf step through the invoker

use crate::{
    core::{
        context::{EnvironmentContext, ScopeKind},
        error::StepError,
        pipeline::{PipelineDefinition, RunOptions},
        step::ShellCommand,
    },
    invoke::{CheckoutSpec, CommandInvoker, Invocation, InvocationOutput},
};
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info};

/// Lines of stderr kept in a failure diagnostic
const DIAGNOSTIC_LINES: usize = 5;

/// Captured output of a successful step, with secrets masked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes single leaf steps for one pipeline run
pub struct StepRunner<'a, I> {
    invoker: &'a I,
    options: &'a RunOptions,
    scm: &'a CheckoutSpec,
    git: &'a str,
    sealed: BTreeSet<String>,
}

impl<'a, I: CommandInvoker> StepRunner<'a, I> {
    pub fn new(invoker: &'a I, options: &'a RunOptions, scm: &'a CheckoutSpec, git: &'a str) -> Self {
        Self {
            invoker,
            options,
            scm,
            git,
            sealed: BTreeSet::new(),
        }
    }

    /// Keep these runner variables away from every step
    pub fn with_sealed_env(mut self, names: BTreeSet<String>) -> Self {
        self.sealed = names;
        self
    }

    /// Runner using the options, source and tools of `pipeline`
    pub fn for_pipeline(invoker: &'a I, pipeline: &'a PipelineDefinition) -> Self {
        Self::new(invoker, &pipeline.options, &pipeline.scm, &pipeline.tools.git)
    }

    /// Interpolate and run a shell command; success iff it exits 0
    pub async fn run_shell(
        &self,
        command: &ShellCommand,
        ctx: &EnvironmentContext,
    ) -> Result<StepOutput, StepError> {
        info!("Running: {}", command.command);

        let ctx = step_context(ctx, &command.env)?;
        let script = ctx.interpolate(&command.command)?;
        let mut invocation = Invocation::shell(&self.options.shell, script).envs(ctx.flatten());
        if let Some(dir) = &command.working_dir {
            invocation = invocation.current_dir(ctx.interpolate(dir)?);
        }

        let limit = command.timeout.or(self.options.step_timeout);
        self.invoke(&command.command, invocation, limit, &ctx).await
    }

    /// Fetch or verify the pipeline's source
    pub async fn run_checkout(&self, ctx: &EnvironmentContext) -> Result<StepOutput, StepError> {
        info!("Checking out {}", self.scm.repository.as_deref().unwrap_or("existing work tree"));

        let invocation = self.scm.invocation(self.git, ctx)?.envs(ctx.flatten());
        self.invoke("checkout", invocation, self.options.step_timeout, ctx)
            .await
    }

    async fn invoke(
        &self,
        label: &str,
        invocation: Invocation,
        limit: Option<Duration>,
        ctx: &EnvironmentContext,
    ) -> Result<StepOutput, StepError> {
        let invocation = invocation.hide_env(self.sealed.iter().cloned());
        let pending = self.invoker.invoke(&invocation);
        let result = match limit {
            Some(limit) => match timeout(limit, pending).await {
                Ok(result) => result,
                Err(_) => {
                    error!("Timeout for `{}` after {}s", label, limit.as_secs());
                    return Err(StepError::Timeout {
                        command: label.to_string(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => pending.await,
        };

        let output = result.map_err(|e| StepError::StepExecution {
            command: label.to_string(),
            exit_code: None,
            message: ctx.mask(&e.to_string()),
        })?;

        if output.succeeded() {
            debug!("`{}` succeeded", label);
            return Ok(StepOutput {
                stdout: ctx.mask(&output.stdout),
                stderr: ctx.mask(&output.stderr),
            });
        }

        let message = diagnostic(&output, ctx);
        error!("`{}` failed: {}", label, message);
        Err(StepError::StepExecution {
            command: label.to_string(),
            exit_code: output.exit_code,
            message,
        })
    }
}

/// Layer step-local variables over `parent`, interpolating their values first
fn step_context(
    parent: &EnvironmentContext,
    env: &BTreeMap<String, String>,
) -> Result<EnvironmentContext, StepError> {
    if env.is_empty() {
        return Ok(parent.clone());
    }
    let vars = env
        .iter()
        .map(|(name, value)| Ok((name.clone(), parent.interpolate(value)?)))
        .collect::<Result<BTreeMap<_, _>, StepError>>()?;
    Ok(parent.extend(ScopeKind::Step, vars))
}

fn diagnostic(output: &InvocationOutput, ctx: &EnvironmentContext) -> String {
    let status = match output.exit_code {
        Some(code) => format!("exited with code {}", code),
        None => "terminated by signal".to_string(),
    };

    let stream = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    let lines: Vec<&str> = stream.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return status;
    }

    let tail = lines[lines.len().saturating_sub(DIAGNOSTIC_LINES)..].join("\n");
    format!("{}: {}", status, ctx.mask(&tail))
}
