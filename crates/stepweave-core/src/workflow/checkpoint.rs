//! Durable checkpoint manager for workflow runs.
//!
//! Wraps `WorkflowRunRepository` with a run-level API: the coordinator writes
//! a checkpoint after every merged step result, archives the run summary when
//! the run finishes, and restores the latest checkpoint to resume a run.

use chrono::Utc;
use stepweave_types::decision::DecisionRecord;
use stepweave_types::history::{RunCheckpoint, WorkflowRunSummary};
use uuid::Uuid;

use crate::repository::workflow::WorkflowRunRepository;

use super::context::WorkflowContext;
use super::plan::ExecutionPlan;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable execution checkpoints for workflow runs.
///
/// Generic over `R: WorkflowRunRepository` so it works with any storage
/// backend (SQLite, in-memory, etc.).
pub struct CheckpointManager<R: WorkflowRunRepository> {
    repo: R,
}

impl<R: WorkflowRunRepository> CheckpointManager<R> {
    /// Create a new checkpoint manager backed by the given repository.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Run checkpoints
    // -----------------------------------------------------------------------

    /// Persist the current plan progress and context of a run.
    pub async fn checkpoint(
        &self,
        plan: &ExecutionPlan,
        ctx: &WorkflowContext,
    ) -> Result<(), CheckpointError> {
        let mut completed: Vec<String> = plan.completed().iter().cloned().collect();
        let mut failed: Vec<String> = plan.failed().iter().cloned().collect();
        completed.sort_unstable();
        failed.sort_unstable();

        let checkpoint = RunCheckpoint {
            run_id: ctx.run_id,
            workflow_id: ctx.workflow_id.clone(),
            status: plan.status(),
            step_ids: plan.steps().iter().map(|s| s.id.clone()).collect(),
            completed,
            failed,
            context: ctx.to_json(),
            updated_at: Utc::now(),
        };

        self.repo
            .save_checkpoint(&checkpoint)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            run_id = %ctx.run_id,
            status = ?checkpoint.status,
            completed = checkpoint.completed.len(),
            failed = checkpoint.failed.len(),
            "checkpointed run"
        );

        Ok(())
    }

    /// Load the latest checkpoint of a run.
    pub async fn restore(&self, run_id: Uuid) -> Result<RunCheckpoint, CheckpointError> {
        self.repo
            .load_checkpoint(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::RunNotFound(run_id))
    }

    // -----------------------------------------------------------------------
    // History persistence
    // -----------------------------------------------------------------------

    /// Archive the summary of a finished run.
    pub async fn archive_run(&self, summary: &WorkflowRunSummary) -> Result<(), CheckpointError> {
        self.repo
            .record_run(summary)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            run_id = %summary.run_id,
            status = %summary.status,
            "archived run summary"
        );
        Ok(())
    }

    /// Persist a decision record.
    pub async fn record_decision(&self, record: &DecisionRecord) -> Result<(), CheckpointError> {
        self.repo
            .record_decision(record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    /// No checkpoint exists for the run.
    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
