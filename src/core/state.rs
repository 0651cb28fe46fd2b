//! Execution state models

use crate::core::error::StepError;
use crate::core::pipeline::HookKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall run status, as stored in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is currently executing stages
    Running,
    /// Every stage succeeded
    Succeeded,
    /// A step failed
    Failed,
}

/// Position of the run in the stage sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running { stage_index: usize, step_index: usize },
    Succeeded,
    Failed { stage_index: usize, step_index: usize },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed { .. })
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            RunState::Pending => ExecutionStatus::Pending,
            RunState::Running { .. } => ExecutionStatus::Running,
            RunState::Succeeded => ExecutionStatus::Succeeded,
            RunState::Failed { .. } => ExecutionStatus::Failed,
        }
    }
}

/// Verdict of the stage sequence, produced once per run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success,
    Failure {
        /// Name of the failing stage
        stage: String,
        /// Index of the failing top-level step within that stage
        step_index: usize,
        reason: StepError,
    },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success)
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionResult::Success => ExecutionStatus::Succeeded,
            ExecutionResult::Failure { .. } => ExecutionStatus::Failed,
        }
    }

    /// The hook this result selects
    pub fn hook_kind(&self) -> HookKind {
        match self {
            ExecutionResult::Success => HookKind::Success,
            ExecutionResult::Failure { .. } => HookKind::Failure,
        }
    }

    pub fn reason(&self) -> Option<&StepError> {
        match self {
            ExecutionResult::Success => None,
            ExecutionResult::Failure { reason, .. } => Some(reason),
        }
    }
}

/// Outcome of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    NotRun,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageReport {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::NotRun,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: StageStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// What happened to the selected hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    NotDefined,
    Succeeded,
    Failed(StepError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    pub kind: HookKind,
    pub outcome: HookOutcome,
}

impl HookReport {
    /// Short label stored in history: `success:succeeded`, `failure:not_defined`, ...
    pub fn label(&self) -> String {
        let outcome = match self.outcome {
            HookOutcome::NotDefined => "not_defined",
            HookOutcome::Succeeded => "succeeded",
            HookOutcome::Failed(_) => "failed",
        };
        format!("{}:{}", self.kind, outcome)
    }
}

/// Terminal report of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub result: ExecutionResult,
    /// Where the stage sequence ended
    pub state: RunState,
    pub hook: HookReport,
    pub stages: Vec<StageReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_success()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }
}
