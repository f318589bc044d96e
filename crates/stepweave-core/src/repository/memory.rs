//! In-memory workflow run repository.
//!
//! Used when no database is configured, and by tests.

use std::collections::HashMap;
use std::sync::Arc;

use stepweave_types::decision::DecisionRecord;
use stepweave_types::error::RepositoryError;
use stepweave_types::history::{RunCheckpoint, WorkflowRunSummary};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::workflow::WorkflowRunRepository;

/// In-memory implementation of `WorkflowRunRepository`.
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowRunRepository {
    checkpoints: Arc<RwLock<HashMap<Uuid, RunCheckpoint>>>,
    runs: Arc<RwLock<Vec<WorkflowRunSummary>>>,
    decisions: Arc<RwLock<Vec<DecisionRecord>>>,
}

impl InMemoryWorkflowRunRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRunRepository for InMemoryWorkflowRunRepository {
    async fn save_checkpoint(&self, checkpoint: &RunCheckpoint) -> Result<(), RepositoryError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(checkpoint.run_id, checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, run_id: &Uuid) -> Result<Option<RunCheckpoint>, RepositoryError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(run_id).cloned())
    }

    async fn record_run(&self, summary: &WorkflowRunSummary) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        runs.retain(|r| r.run_id != summary.run_id);
        runs.push(summary.clone());
        Ok(())
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<WorkflowRunSummary>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs.iter().rev().take(limit as usize).cloned().collect())
    }

    async fn record_decision(&self, record: &DecisionRecord) -> Result<(), RepositoryError> {
        let mut decisions = self.decisions.write().await;
        if decisions.iter().any(|d| d.decision_id == record.decision_id) {
            return Err(RepositoryError::Conflict(format!(
                "decision '{}' already recorded",
                record.decision_id
            )));
        }
        decisions.push(record.clone());
        Ok(())
    }

    async fn list_decisions(
        &self,
        workflow_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DecisionRecord>, RepositoryError> {
        let decisions = self.decisions.read().await;
        Ok(decisions
            .iter()
            .rev()
            .filter(|d| workflow_id.is_none_or(|w| d.workflow_id == w))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use stepweave_types::result::WorkflowStatus;
    use stepweave_types::step::PlanStatus;

    fn checkpoint(run_id: Uuid, completed: &[&str]) -> RunCheckpoint {
        RunCheckpoint {
            run_id,
            workflow_id: "etl".to_string(),
            status: PlanStatus::Executing,
            step_ids: completed.iter().map(|s| s.to_string()).collect(),
            completed: completed.iter().map(|s| s.to_string()).collect(),
            failed: vec![],
            context: json!({}),
            updated_at: Utc::now(),
        }
    }

    fn summary(workflow_id: &str) -> WorkflowRunSummary {
        WorkflowRunSummary {
            run_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            status: WorkflowStatus::Success,
            completed_steps: 1,
            failed_steps: 0,
            not_attempted_steps: 0,
            total_steps: 1,
            duration_ms: 5,
            decisions: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            error: None,
        }
    }

    fn decision(workflow_id: &str) -> DecisionRecord {
        DecisionRecord {
            decision_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            source_node: "route".to_string(),
            timestamp: Utc::now(),
            considered_options: vec!["a".to_string()],
            selected_option: "a".to_string(),
            destination: "next".to_string(),
            criterion_value: "a".to_string(),
            source: Some("path:variables.kind".to_string()),
            used_fallback: false,
            context_snapshot: json!({}),
        }
    }

    #[tokio::test]
    async fn checkpoint_upsert_replaces_previous() {
        let repo = InMemoryWorkflowRunRepository::new();
        let run_id = Uuid::now_v7();

        repo.save_checkpoint(&checkpoint(run_id, &["a"])).await.unwrap();
        repo.save_checkpoint(&checkpoint(run_id, &["a", "b"])).await.unwrap();

        let loaded = repo.load_checkpoint(&run_id).await.unwrap().unwrap();
        assert_eq!(loaded.completed, vec!["a", "b"]);
        assert!(repo.load_checkpoint(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn runs_listed_most_recent_first() {
        let repo = InMemoryWorkflowRunRepository::new();
        repo.record_run(&summary("first")).await.unwrap();
        repo.record_run(&summary("second")).await.unwrap();
        repo.record_run(&summary("third")).await.unwrap();

        let runs = repo.list_runs(2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].workflow_id, "third");
        assert_eq!(runs[1].workflow_id, "second");
    }

    #[tokio::test]
    async fn decisions_filter_by_workflow() {
        let repo = InMemoryWorkflowRunRepository::new();
        repo.record_decision(&decision("a")).await.unwrap();
        repo.record_decision(&decision("b")).await.unwrap();
        repo.record_decision(&decision("a")).await.unwrap();

        assert_eq!(repo.list_decisions(Some("a"), 10).await.unwrap().len(), 2);
        assert_eq!(repo.list_decisions(None, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn duplicate_decision_is_conflict() {
        let repo = InMemoryWorkflowRunRepository::new();
        let record = decision("a");
        repo.record_decision(&record).await.unwrap();
        let err = repo.record_decision(&record).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }
}
