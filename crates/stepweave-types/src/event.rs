//! Event types for the Stepweave event bus.
//!
//! `WorkflowEvent` is broadcast during workflow execution. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::WorkflowStatus;

/// Lifecycle events emitted by the coordinator and the decision router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A workflow run has started.
    RunStarted {
        run_id: Uuid,
        workflow_id: String,
        total_steps: usize,
    },

    /// A new wave of ready steps is being dispatched.
    WaveStarted {
        run_id: Uuid,
        wave: u32,
        step_ids: Vec<String>,
    },

    /// A step attempt has started.
    StepStarted {
        run_id: Uuid,
        step_id: String,
        attempt: u32,
    },

    /// A step attempt failed and will be retried after a backoff.
    StepRetrying {
        run_id: Uuid,
        step_id: String,
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },

    /// A step completed successfully.
    StepCompleted {
        run_id: Uuid,
        step_id: String,
        attempts: u32,
        duration_ms: u64,
    },

    /// A step failed for good.
    StepFailed {
        run_id: Uuid,
        step_id: String,
        attempts: u32,
        critical: bool,
        error: String,
    },

    /// A decision node selected a destination.
    DecisionMade {
        decision_id: Uuid,
        workflow_id: String,
        node: String,
        destination: String,
        used_fallback: bool,
    },

    /// A workflow run reached a final status.
    RunFinished {
        run_id: Uuid,
        workflow_id: String,
        status: WorkflowStatus,
        duration_ms: u64,
        completed_steps: usize,
        failed_steps: usize,
    },
}

impl WorkflowEvent {
    /// Returns the run id for run-scoped variants, or None for decisions.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::WaveStarted { run_id, .. }
            | WorkflowEvent::StepStarted { run_id, .. }
            | WorkflowEvent::StepRetrying { run_id, .. }
            | WorkflowEvent::StepCompleted { run_id, .. }
            | WorkflowEvent::StepFailed { run_id, .. }
            | WorkflowEvent::RunFinished { run_id, .. } => Some(*run_id),

            WorkflowEvent::DecisionMade { .. } => None,
        }
    }
}
