//! Outcome dispatcher - runs exactly one post hook per run

use crate::core::{
    context::{EnvironmentContext, ScopeKind},
    error::StepError,
    pipeline::{HookKind, PostHooks},
    state::{ExecutionResult, HookOutcome, HookReport},
    step::Step,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Something that can execute a hook's steps
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run_hook(
        &self,
        kind: HookKind,
        steps: &[Step],
        ctx: &EnvironmentContext,
    ) -> Result<(), StepError>;
}

/// Selects and runs the hook matching a run's verdict
pub struct OutcomeDispatcher;

impl OutcomeDispatcher {
    /// Run the success hook on `Success`, the failure hook on `Failure`
    ///
    /// A missing hook is reported as [`HookOutcome::NotDefined`]. A failing
    /// hook is reported but never changes `result`.
    pub async fn dispatch<R: HookRunner + ?Sized>(
        hooks: &PostHooks,
        result: &ExecutionResult,
        root: &EnvironmentContext,
        runner: &R,
    ) -> HookReport {
        let kind = result.hook_kind();

        let Some(hook) = hooks.get(kind) else {
            debug!("No {} hook defined", kind);
            return HookReport {
                kind,
                outcome: HookOutcome::NotDefined,
            };
        };

        info!("Running {} hook ({} steps)", kind, hook.steps.len());
        let ctx = hook_context(root, result);

        let outcome = match runner.run_hook(kind, &hook.steps, &ctx).await {
            Ok(()) => HookOutcome::Succeeded,
            Err(e) => {
                warn!("{} hook failed: {}", kind, e);
                HookOutcome::Failed(e)
            }
        };

        HookReport { kind, outcome }
    }
}

/// Child of the root context binding the run's verdict
pub fn hook_context(root: &EnvironmentContext, result: &ExecutionResult) -> EnvironmentContext {
    let mut vars = BTreeMap::new();
    match result {
        ExecutionResult::Success => {
            vars.insert("PIPELINE_STATUS".to_string(), "SUCCESS".to_string());
        }
        ExecutionResult::Failure {
            stage, step_index, ..
        } => {
            vars.insert("PIPELINE_STATUS".to_string(), "FAILURE".to_string());
            vars.insert("FAILED_STAGE".to_string(), stage.clone());
            vars.insert("FAILED_STEP".to_string(), step_index.to_string());
        }
    }
    root.extend(ScopeKind::Hook, vars)
}
