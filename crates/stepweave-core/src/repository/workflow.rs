//! Workflow run repository trait definition.
//!
//! Defines the storage interface for run checkpoints, archived run summaries,
//! and decision records. The infrastructure layer (stepweave-infra)
//! implements this trait with SQLite persistence; `InMemoryWorkflowRunRepository`
//! covers tests and database-less runs.

use stepweave_types::decision::DecisionRecord;
use stepweave_types::error::RepositoryError;
use stepweave_types::history::{RunCheckpoint, WorkflowRunSummary};
use uuid::Uuid;

/// Repository trait for workflow run persistence.
///
/// Covers three entity families:
/// - **Checkpoints:** latest resumable snapshot per run (upsert by run id).
/// - **Runs:** archived summaries of finished runs.
/// - **Decisions:** audit records produced by decision nodes.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRunRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Insert or replace the checkpoint for `checkpoint.run_id`.
    fn save_checkpoint(
        &self,
        checkpoint: &RunCheckpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load the latest checkpoint of a run.
    fn load_checkpoint(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RunCheckpoint>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Archive the summary of a finished run (replaces an earlier summary of
    /// the same run, e.g. after a resume).
    fn record_run(
        &self,
        summary: &WorkflowRunSummary,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List archived runs, most recent first.
    fn list_runs(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRunSummary>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    /// Append a decision record.
    fn record_decision(
        &self,
        record: &DecisionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List decision records, most recent first, optionally for one workflow.
    fn list_decisions(
        &self,
        workflow_id: Option<&str>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<DecisionRecord>, RepositoryError>> + Send;
}
