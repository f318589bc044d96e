//! Workflow result payloads returned to callers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::step::StepStatus;

/// Final status of a workflow run as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Every step completed.
    Success,
    /// Only non-critical steps failed; completed results are usable.
    CompletedWithWarnings,
    /// A critical step failed, the graph had a cycle, or the plan deadlocked.
    Failed,
    /// Cancelled by an external request between waves.
    Cancelled,
    /// The submission was rejected before any step ran.
    ValidationError,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::CompletedWithWarnings => "completed_with_warnings",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::ValidationError => "validation_error",
        };
        f.write_str(s)
    }
}

/// Outcome of one step, as reported in a `WorkflowResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Executor invocations made for this step.
    #[serde(default)]
    pub attempts: u32,
    /// 1-based wave the step ran in (absent for steps never dispatched).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Aggregate result of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    pub workflow_id: String,
    pub run_id: Uuid,
    /// Per-step outcomes in submission order.
    pub results: Vec<StepResult>,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub not_attempted_steps: usize,
    pub total_steps: usize,
    /// Elapsed wall-clock time in seconds.
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowResult {
    /// Build the payload reported for a submission rejected by validation.
    pub fn rejected(
        workflow_id: impl Into<String>,
        total_steps: usize,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: WorkflowStatus::ValidationError,
            workflow_id: workflow_id.into(),
            run_id: Uuid::nil(),
            results: Vec::new(),
            completed_steps: 0,
            failed_steps: 0,
            not_attempted_steps: total_steps,
            total_steps,
            execution_time: 0.0,
            error: Some(error.into()),
        }
    }

    /// Look up a single step's outcome.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }

    /// Ids of steps with the given status, in submission order.
    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.step_id.as_str())
            .collect()
    }
}
