//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{
        context::{EnvironmentContext, EnvironmentResolver, ScopeKind},
        error::StepError,
        pipeline::{HookKind, PipelineDefinition, Stage},
        state::{ExecutionResult, HookReport, RunReport, RunState, StageReport, StageStatus},
        step::{Step, StepPath},
    },
    credentials::{CredentialBinder, CredentialProvider},
    execution::{
        dispatcher::{HookRunner, OutcomeDispatcher},
        executor::{StepOutput, StepRunner},
    },
    invoke::CommandInvoker,
};
use async_recursion::async_recursion;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        stage_count: usize,
    },
    StageStarted {
        stage: String,
        index: usize,
    },
    StepStarted {
        stage: String,
        path: StepPath,
        description: String,
    },
    StepOutput {
        stage: String,
        path: StepPath,
        output: String,
    },
    StepSucceeded {
        stage: String,
        path: StepPath,
    },
    StepFailed {
        stage: String,
        path: StepPath,
        error: StepError,
    },
    CredentialScopeEntered {
        stage: String,
        credential: String,
    },
    CredentialScopeExited {
        stage: String,
        credential: String,
    },
    StageCompleted {
        stage: String,
        status: StageStatus,
    },
    HookStarted {
        kind: HookKind,
    },
    HookFinished {
        report: HookReport,
    },
    PipelineCompleted {
        execution_id: Uuid,
        result: ExecutionResult,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main pipeline execution engine
///
/// Runs stages strictly in order, one step at a time. The first failing step
/// aborts the rest of the stage sequence; the matching post hook always runs.
pub struct ExecutionEngine<I, P> {
    invoker: I,
    binder: CredentialBinder<P>,
    resolver: EnvironmentResolver,
    event_handlers: Vec<EventHandler>,
}

impl<I: CommandInvoker, P: CredentialProvider> ExecutionEngine<I, P> {
    pub fn new(invoker: I, credentials: P) -> Self {
        Self {
            invoker,
            binder: CredentialBinder::new(credentials),
            resolver: EnvironmentResolver::new(),
            event_handlers: Vec::new(),
        }
    }

    /// Use a custom resolver (variable overrides, process environment)
    pub fn with_resolver(mut self, resolver: EnvironmentResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute the entire pipeline
    ///
    /// Never fails as a whole: every outcome, including hook failures, is
    /// part of the returned report.
    pub async fn execute(&self, pipeline: &PipelineDefinition) -> RunReport {
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(
            "Starting pipeline execution: {} ({})",
            pipeline.name, execution_id
        );
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            stage_count: pipeline.stages.len(),
        });

        let sealed = self.binder.provider().sealed_env_vars();
        if !sealed.is_empty() {
            debug!("Withholding {} credential source variables from steps", sealed.len());
        }

        let resolver = self.resolver.clone().seal(sealed.iter().cloned());
        let resolver = if pipeline.options.inherit_env {
            resolver.inherit_process_env(true)
        } else {
            resolver
        };
        let root = resolver.resolve(&pipeline.name, &pipeline.environment);

        let run = Run {
            engine: self,
            runner: StepRunner::for_pipeline(&self.invoker, pipeline).with_sealed_env(sealed),
            tracker: RunTracker::new(&pipeline.stages),
        };

        let stages_done = run.run_stages(pipeline, &root);
        let result = match pipeline.options.run_timeout {
            Some(limit) => {
                let outcome = timeout(limit, stages_done).await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => run.timed_out(pipeline, limit),
                }
            }
            None => stages_done.await,
        };

        match &result {
            ExecutionResult::Success => info!("Pipeline {} succeeded", pipeline.name),
            ExecutionResult::Failure {
                stage,
                step_index,
                reason,
            } => error!(
                "Pipeline {} failed in stage {} at step {}: {}",
                pipeline.name, stage, step_index, reason
            ),
        }

        let hook = OutcomeDispatcher::dispatch(&pipeline.post, &result, &root, &run).await;
        self.emit_event(ExecutionEvent::HookFinished {
            report: hook.clone(),
        });

        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            result: result.clone(),
        });

        RunReport {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            result,
            state: run.tracker.state(),
            hook,
            stages: run.tracker.stages(),
            started_at,
            completed_at: Utc::now(),
        }
    }
}

/// A failed leaf step and where it sits in its stage
#[derive(Debug)]
struct StepFailure {
    path: StepPath,
    error: StepError,
}

/// Position and per-stage outcomes of a run in progress
///
/// Kept outside the stage future so the run timeout can still tell where
/// the run was when it fired.
struct RunTracker {
    inner: Mutex<TrackerState>,
}

struct TrackerState {
    state: RunState,
    stages: Vec<StageReport>,
}

impl RunTracker {
    fn new(stages: &[Stage]) -> Self {
        Self {
            inner: Mutex::new(TrackerState {
                state: RunState::Pending,
                stages: stages.iter().map(|s| StageReport::pending(&s.name)).collect(),
            }),
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut TrackerState) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    fn step_started(&self, stage_index: usize, step_index: usize) {
        self.update(|t| {
            t.state = RunState::Running {
                stage_index,
                step_index,
            }
        });
    }

    fn stage_started(&self, stage_index: usize) {
        self.update(|t| {
            t.state = RunState::Running {
                stage_index,
                step_index: 0,
            };
            if let Some(report) = t.stages.get_mut(stage_index) {
                report.start();
            }
        });
    }

    fn stage_finished(&self, stage_index: usize, status: StageStatus) {
        self.update(|t| {
            if let Some(report) = t.stages.get_mut(stage_index) {
                report.finish(status);
            }
        });
    }

    fn fail(&self, stage_index: usize, step_index: usize) {
        self.update(|t| {
            t.state = RunState::Failed {
                stage_index,
                step_index,
            }
        });
    }

    fn succeed(&self) {
        self.update(|t| t.state = RunState::Succeeded);
    }

    fn state(&self) -> RunState {
        self.update(|t| t.state)
    }

    fn stages(&self) -> Vec<StageReport> {
        self.update(|t| t.stages.clone())
    }
}

/// State shared by the stages and hook of one run
struct Run<'a, I, P> {
    engine: &'a ExecutionEngine<I, P>,
    runner: StepRunner<'a, I>,
    tracker: RunTracker,
}

impl<'a, I: CommandInvoker, P: CredentialProvider> Run<'a, I, P> {
    async fn run_stages(
        &self,
        pipeline: &PipelineDefinition,
        root: &EnvironmentContext,
    ) -> ExecutionResult {
        let total = pipeline.stages.len();

        for (stage_index, stage) in pipeline.stages.iter().enumerate() {
            info!("Starting stage {} ({}/{})", stage.name, stage_index + 1, total);
            self.tracker.stage_started(stage_index);
            self.engine.emit_event(ExecutionEvent::StageStarted {
                stage: stage.name.clone(),
                index: stage_index,
            });

            let outcome = match stage_context(root, stage) {
                Ok(ctx) => {
                    self.run_block(
                        &stage.steps,
                        &ctx,
                        &stage.name,
                        Some(stage_index),
                        &StepPath::root(),
                    )
                    .await
                }
                Err(error) => {
                    let path = StepPath::root().child(0);
                    self.engine.emit_event(ExecutionEvent::StepFailed {
                        stage: stage.name.clone(),
                        path: path.clone(),
                        error: error.clone(),
                    });
                    Err(StepFailure { path, error })
                }
            };

            match outcome {
                Ok(()) => {
                    self.tracker.stage_finished(stage_index, StageStatus::Succeeded);
                    self.engine.emit_event(ExecutionEvent::StageCompleted {
                        stage: stage.name.clone(),
                        status: StageStatus::Succeeded,
                    });
                }
                Err(failure) => {
                    let step_index = failure.path.top();
                    error!(
                        "Stage {} aborted at step {}: {}",
                        stage.name, failure.path, failure.error
                    );
                    self.tracker.stage_finished(stage_index, StageStatus::Failed);
                    self.tracker.fail(stage_index, step_index);
                    self.engine.emit_event(ExecutionEvent::StageCompleted {
                        stage: stage.name.clone(),
                        status: StageStatus::Failed,
                    });
                    if stage_index + 1 < total {
                        debug!("Skipping {} remaining stages", total - stage_index - 1);
                    }
                    return ExecutionResult::Failure {
                        stage: stage.name.clone(),
                        step_index,
                        reason: failure.error,
                    };
                }
            }
        }

        self.tracker.succeed();
        ExecutionResult::Success
    }

    /// Run steps in order, stopping at the first failure
    ///
    /// `stage_index` is `None` for hook steps, which do not move the run's
    /// position.
    #[async_recursion]
    async fn run_block(
        &self,
        steps: &[Step],
        ctx: &EnvironmentContext,
        stage: &str,
        stage_index: Option<usize>,
        prefix: &StepPath,
    ) -> Result<(), StepFailure> {
        for (index, step) in steps.iter().enumerate() {
            let path = prefix.child(index);
            match stage_index {
                Some(stage_index) if prefix.is_root() => {
                    self.tracker.step_started(stage_index, index)
                }
                _ => {}
            }

            self.engine.emit_event(ExecutionEvent::StepStarted {
                stage: stage.to_string(),
                path: path.clone(),
                description: step.describe(),
            });

            match step {
                Step::Checkout => {
                    let result = self.runner.run_checkout(ctx).await;
                    self.finish_leaf(result, stage, &path)?;
                }
                Step::Shell(command) => {
                    let result = self.runner.run_shell(command, ctx).await;
                    self.finish_leaf(result, stage, &path)?;
                }
                Step::WithCredentials(scope) => {
                    let credential = scope.credential.to_string();
                    let scope_path = &path;

                    let outcome = self
                        .engine
                        .binder
                        .with_credential(&scope.credential, ctx, |child| async move {
                            self.engine.emit_event(ExecutionEvent::CredentialScopeEntered {
                                stage: stage.to_string(),
                                credential: scope.credential.to_string(),
                            });
                            self.run_block(&scope.steps, &child, stage, stage_index, scope_path)
                                .await
                        })
                        .await;

                    match outcome {
                        Ok(inner) => {
                            self.engine.emit_event(ExecutionEvent::CredentialScopeExited {
                                stage: stage.to_string(),
                                credential,
                            });
                            inner?;
                        }
                        Err(error) => {
                            self.engine.emit_event(ExecutionEvent::StepFailed {
                                stage: stage.to_string(),
                                path: path.clone(),
                                error: error.clone(),
                            });
                            return Err(StepFailure { path, error });
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn finish_leaf(
        &self,
        result: Result<StepOutput, StepError>,
        stage: &str,
        path: &StepPath,
    ) -> Result<(), StepFailure> {
        match result {
            Ok(output) => {
                if !output.stdout.trim().is_empty() {
                    self.engine.emit_event(ExecutionEvent::StepOutput {
                        stage: stage.to_string(),
                        path: path.clone(),
                        output: output.stdout,
                    });
                }
                self.engine.emit_event(ExecutionEvent::StepSucceeded {
                    stage: stage.to_string(),
                    path: path.clone(),
                });
                Ok(())
            }
            Err(error) => {
                warn!("Step {} in stage {} failed: {}", path, stage, error);
                self.engine.emit_event(ExecutionEvent::StepFailed {
                    stage: stage.to_string(),
                    path: path.clone(),
                    error: error.clone(),
                });
                Err(StepFailure {
                    path: path.clone(),
                    error,
                })
            }
        }
    }

    /// Turn an elapsed run deadline into a failure at the running step
    fn timed_out(&self, pipeline: &PipelineDefinition, limit: Duration) -> ExecutionResult {
        let (stage_index, step_index) = match self.tracker.state() {
            RunState::Running {
                stage_index,
                step_index,
            } => (stage_index, step_index),
            _ => (0, 0),
        };
        let stage = pipeline
            .stages
            .get(stage_index)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let reason = StepError::Timeout {
            command: "run".to_string(),
            secs: limit.as_secs(),
        };

        error!(
            "Run deadline of {}s elapsed in stage {} at step {}",
            limit.as_secs(),
            stage,
            step_index
        );
        self.tracker.stage_finished(stage_index, StageStatus::Failed);
        self.tracker.fail(stage_index, step_index);
        self.engine.emit_event(ExecutionEvent::StepFailed {
            stage: stage.clone(),
            path: StepPath::root().child(step_index),
            error: reason.clone(),
        });
        self.engine.emit_event(ExecutionEvent::StageCompleted {
            stage: stage.clone(),
            status: StageStatus::Failed,
        });

        ExecutionResult::Failure {
            stage,
            step_index,
            reason,
        }
    }
}

#[async_trait]
impl<'a, I: CommandInvoker, P: CredentialProvider> HookRunner for Run<'a, I, P> {
    async fn run_hook(
        &self,
        kind: HookKind,
        steps: &[Step],
        ctx: &EnvironmentContext,
    ) -> Result<(), StepError> {
        self.engine.emit_event(ExecutionEvent::HookStarted { kind });
        let label = format!("post:{}", kind);
        self.run_block(steps, ctx, &label, None, &StepPath::root())
            .await
            .map_err(|failure| failure.error)
    }
}

/// Layer a stage's variables over the root context
fn stage_context(root: &EnvironmentContext, stage: &Stage) -> Result<EnvironmentContext, StepError> {
    let vars = stage
        .environment
        .iter()
        .map(|(name, value)| Ok((name.clone(), root.interpolate(value)?)))
        .collect::<Result<BTreeMap<_, _>, StepError>>()?;
    Ok(root.extend(ScopeKind::Stage(stage.name.clone()), vars))
}
