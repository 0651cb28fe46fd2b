//! Persistence layer for pipeline run history
//!
//! Only run summaries are stored. Credential material never reaches this
//! layer: failure reasons are the already-masked step errors.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::{ExecutionResult, RunReport, StageStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Final status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run (hook included) finished
    pub completed_at: Option<DateTime<Utc>>,

    /// Stage the run failed in
    pub failed_stage: Option<String>,

    /// Index of the failing step within that stage
    pub failed_step: Option<usize>,

    /// Why it failed
    pub reason: Option<String>,

    /// Which hook ran and how it went, e.g. `failure:succeeded`
    pub hook: String,

    /// Number of stages that succeeded
    pub stages_succeeded: usize,

    /// Total number of stages
    pub total_stages: usize,
}

impl ExecutionSummary {
    /// Fraction of stages that succeeded (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        self.stages_succeeded as f64 / self.total_stages as f64
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List all runs of a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// Most recent run of a pipeline
    async fn get_latest_execution(&self, pipeline_name: &str) -> Result<Option<ExecutionSummary>>;

    /// Remove a run from history
    async fn delete_execution(&self, execution_id: Uuid) -> Result<()>;

    /// List all pipeline names, sorted
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history` runs)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        execs.insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs
            .values()
            .filter(|e| e.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn get_latest_execution(&self, pipeline_name: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.list_executions(pipeline_name).await?.into_iter().next())
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        self.executions.write().await.remove(&execution_id);
        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<String> = execs.values().map(|e| e.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Save a run summary, logging rather than failing when the store rejects it
///
/// Returns whether the summary was stored.
pub async fn record_execution(store: &dyn PersistenceBackend, summary: &ExecutionSummary) -> bool {
    match store.save_execution(summary).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Could not save execution {} to history: {:#}",
                summary.execution_id, e
            );
            false
        }
    }
}

/// Create a summary from a run report
pub fn create_summary(report: &RunReport) -> ExecutionSummary {
    let (failed_stage, failed_step, reason) = match &report.result {
        ExecutionResult::Success => (None, None, None),
        ExecutionResult::Failure {
            stage,
            step_index,
            reason,
        } => (Some(stage.clone()), Some(*step_index), Some(reason.to_string())),
    };

    ExecutionSummary {
        execution_id: report.execution_id,
        pipeline_name: report.pipeline_name.clone(),
        status: report.result.status(),
        started_at: report.started_at,
        completed_at: Some(report.completed_at),
        failed_stage,
        failed_step,
        reason,
        hook: report.hook.label(),
        stages_succeeded: report
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Succeeded)
            .count(),
        total_stages: report.stages.len(),
    }
}
