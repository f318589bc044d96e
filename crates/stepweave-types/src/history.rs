//! Run history entries, aggregate statistics, and resumable checkpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::{WorkflowResult, WorkflowStatus};
use crate::step::PlanStatus;

// ---------------------------------------------------------------------------
// WorkflowRunSummary
// ---------------------------------------------------------------------------

/// Archived summary of one finished workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunSummary {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub not_attempted_steps: usize,
    pub total_steps: usize,
    pub duration_ms: u64,
    /// Decisions taken during the run (graph runs only).
    #[serde(default)]
    pub decisions: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRunSummary {
    /// Summarise a finished result.
    pub fn from_result(
        result: &WorkflowResult,
        started_at: DateTime<Utc>,
        decisions: usize,
    ) -> Self {
        let duration_ms = (result.execution_time * 1000.0).round().max(0.0) as u64;
        Self {
            run_id: result.run_id,
            workflow_id: result.workflow_id.clone(),
            status: result.status,
            completed_steps: result.completed_steps,
            failed_steps: result.failed_steps,
            not_attempted_steps: result.not_attempted_steps,
            total_steps: result.total_steps,
            duration_ms,
            decisions,
            started_at,
            finished_at: Utc::now(),
            error: result.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionStats
// ---------------------------------------------------------------------------

/// Aggregate statistics over the retained history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub runs_with_warnings: usize,
    pub failed_runs: usize,
    pub cancelled_runs: usize,
    pub average_duration_ms: f64,
    pub total_steps_completed: usize,
    pub total_steps_failed: usize,
    pub total_decisions: usize,
    pub fallback_decisions: usize,
    /// Number of decisions that routed to each destination node.
    pub destination_counts: BTreeMap<String, usize>,
}

impl ExecutionStats {
    /// Fraction of runs that ended in `success`, 0.0 when there are none.
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successful_runs as f64 / self.total_runs as f64
        }
    }
}

// ---------------------------------------------------------------------------
// RunCheckpoint
// ---------------------------------------------------------------------------

/// Durable snapshot of a run, written after every merged step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub status: PlanStatus,
    /// Every step id of the run, in submission order.
    #[serde(default)]
    pub step_ids: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Serialized workflow context (variables, step results, caller context).
    pub context: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
